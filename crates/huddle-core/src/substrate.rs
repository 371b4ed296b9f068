//! The session's view of the bus.
//!
//! [`SubstrateAdapter`] owns one participant with a writer and a reader on
//! the user topic and on the message topic. The message pair lives in the
//! partition named after the session's group and the message reader is
//! content filtered to traffic addressed to the user or the group.

use crate::router::{FilterParameters, MESSAGE_FILTER_EXPRESSION};
use crate::session::SessionConfig;
use huddle_bus::{
    BusError, ContentFilter, DataState, Domain, Participant, QosLibrary, QosProfile, Reader,
    ReaderOptions, WaitSet, Writer, WriterOptions,
};
use huddle_protocol::{MessageRecord, UserRecord};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Resolve a QoS profile by name, degrading to the default profile.
pub(crate) fn resolve_profile(qos: &QosLibrary, name: &str) -> QosProfile {
    match qos.profile(name) {
        Ok(profile) => profile.clone(),
        Err(e) => {
            warn!(profile = %name, error = %e, "QoS profile unavailable, running degraded with default profile");
            QosProfile::default()
        }
    }
}

/// Writers and readers of one session.
pub struct SubstrateAdapter {
    participant: Participant,
    user_writer: Writer<UserRecord>,
    user_reader: Reader<UserRecord>,
    message_writer: Writer<MessageRecord>,
    message_reader: Reader<MessageRecord>,
}

impl SubstrateAdapter {
    /// Create the session's entities for `user`.
    ///
    /// # Errors
    ///
    /// Returns an error if any entity cannot be created.
    pub fn open(
        domain: Arc<Domain>,
        config: &SessionConfig,
        user: &UserRecord,
        params: &FilterParameters,
    ) -> Result<Self, BusError> {
        let user_profile = resolve_profile(domain.qos(), &config.user_profile);
        let message_profile = resolve_profile(domain.qos(), &config.message_profile);
        let participant = Participant::new(domain);

        let user_writer = participant.create_writer::<UserRecord>(
            &config.user_topic,
            WriterOptions::new(user_profile.clone()),
        )?;
        let user_reader = participant
            .create_reader::<UserRecord>(&config.user_topic, ReaderOptions::new(user_profile))?;

        let message_writer = participant.create_writer::<MessageRecord>(
            &config.message_topic,
            WriterOptions::new(message_profile.clone()).partition(&user.group),
        )?;
        let filter = ContentFilter::new(MESSAGE_FILTER_EXPRESSION, params.to_vec())?;
        let message_reader = participant.create_reader::<MessageRecord>(
            &config.message_topic,
            ReaderOptions::new(message_profile)
                .partition(&user.group)
                .filter(filter),
        )?;

        debug!(
            user = %user.username,
            group = %user.group,
            participant = participant.id(),
            "Substrate entities created"
        );

        Ok(Self {
            participant,
            user_writer,
            user_reader,
            message_writer,
            message_reader,
        })
    }

    /// Publish the user's presence record.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer is closed.
    pub fn announce(&self, user: &UserRecord) -> Result<(), BusError> {
        self.user_writer.write(user)?;
        Ok(())
    }

    /// Unregister the user's presence instance if this session registered it.
    ///
    /// Returns whether an instance was unregistered.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer is closed.
    pub fn retract(&self, user: &UserRecord) -> Result<bool, BusError> {
        match self.user_writer.lookup_instance(user) {
            Some(handle) => {
                self.user_writer.unregister_instance(&handle)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Publish a message in the current partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer is closed.
    pub fn publish(&self, message: &MessageRecord) -> Result<usize, BusError> {
        self.message_writer.write(message)
    }

    /// Move the message writer and reader to `params.group` and rebind the
    /// reader's filter. The reader is switched first, then the writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition name or parameters are rejected
    /// (nothing is changed then) or an entity is closed.
    pub fn reroute(&self, params: &FilterParameters) -> Result<(), BusError> {
        self.message_reader
            .reconfigure(Some(&params.group), Some(params.to_vec()))?;
        self.message_writer.set_partition(&params.group)?;
        debug!(group = %params.group, "Message routing switched");
        Ok(())
    }

    /// Presence records not yet read and still alive; marks them read.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader is closed.
    pub fn fresh_users(&self) -> Result<Vec<UserRecord>, BusError> {
        self.user_reader.read_data(DataState::not_read().alive())
    }

    /// Presence records that are no longer alive; removes them.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader is closed.
    pub fn dropped_users(&self) -> Result<Vec<UserRecord>, BusError> {
        self.user_reader.take_data(DataState::any().not_alive())
    }

    /// Every alive and every pending not-alive presence record, without
    /// changing reader state.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader is closed.
    pub fn observed_users(&self) -> Result<(Vec<UserRecord>, Vec<UserRecord>), BusError> {
        let alive = self.user_reader.peek(DataState::any().alive())?;
        let dropped = self.user_reader.peek(DataState::any().not_alive())?;
        Ok((
            alive.into_iter().map(|s| s.data).collect(),
            dropped.into_iter().map(|s| s.data).collect(),
        ))
    }

    /// Take every unread message.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader is closed.
    pub fn take_messages(&self) -> Result<Vec<MessageRecord>, BusError> {
        self.message_reader.take_data(DataState::not_read())
    }

    /// Wait set over unread presence records.
    #[must_use]
    pub fn presence_waitset(&self, guard: CancellationToken) -> WaitSet {
        let mut waitset = WaitSet::new(guard);
        waitset.attach(self.user_reader.read_condition(DataState::not_read()));
        waitset
    }

    /// Wait set over unread messages.
    #[must_use]
    pub fn message_waitset(&self, guard: CancellationToken) -> WaitSet {
        let mut waitset = WaitSet::new(guard);
        waitset.attach(self.message_reader.read_condition(DataState::not_read()));
        waitset
    }

    /// Close every entity. Registered presence instances become not alive.
    pub fn close(&self) {
        self.participant.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::MessageRouter;

    fn open(domain: &Arc<Domain>, user: &UserRecord) -> SubstrateAdapter {
        let params = MessageRouter::new().build_filter_parameters(user);
        SubstrateAdapter::open(Arc::clone(domain), &SessionConfig::default(), user, &params)
            .unwrap()
    }

    #[test]
    fn test_missing_profile_degrades() {
        let profile = resolve_profile(&QosLibrary::builtin(), "Nope_Profile");
        assert_eq!(profile, QosProfile::default());

        let library = QosLibrary::builtin();
        assert!(resolve_profile(&library, "Chat_Library::ChatUser_Profile").is_transient_local());
    }

    #[test]
    fn test_presence_round_trip() {
        let domain = Domain::new(0);
        let alice = UserRecord::new("alice", "teamA");
        let bob = UserRecord::new("bob", "teamA");
        let a = open(&domain, &alice);
        let b = open(&domain, &bob);

        a.announce(&alice).unwrap();
        assert_eq!(b.fresh_users().unwrap(), vec![alice.clone()]);
        assert!(b.fresh_users().unwrap().is_empty());

        let (alive, dropped) = b.observed_users().unwrap();
        assert_eq!(alive, vec![alice.clone()]);
        assert!(dropped.is_empty());

        assert!(a.retract(&alice).unwrap());
        assert!(!a.retract(&alice).unwrap());
        assert_eq!(b.dropped_users().unwrap(), vec![alice]);
    }

    #[test]
    fn test_reroute_moves_messages() {
        let domain = Domain::new(0);
        let alice = UserRecord::new("alice", "teamA");
        let bob = UserRecord::new("bob", "teamB");
        let a = open(&domain, &alice);
        let b = open(&domain, &bob);

        a.publish(&MessageRecord::group("alice", "teamA", "not for bob"))
            .unwrap();
        assert!(b.take_messages().unwrap().is_empty());
        assert_eq!(a.take_messages().unwrap().len(), 1);

        let moved = UserRecord::new("alice", "teamB");
        a.reroute(&MessageRouter::new().build_filter_parameters(&moved))
            .unwrap();
        a.publish(&MessageRecord::group("alice", "teamB", "hello teamB"))
            .unwrap();

        let received = b.take_messages().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message, "hello teamB");

        // Alice now hears her new group
        assert_eq!(a.take_messages().unwrap().len(), 1);
    }

    #[test]
    fn test_close_drops_presence() {
        let domain = Domain::new(0);
        let alice = UserRecord::new("alice", "teamA");
        let bob = UserRecord::new("bob", "teamA");
        let a = open(&domain, &alice);
        let b = open(&domain, &bob);

        a.announce(&alice).unwrap();
        b.fresh_users().unwrap();
        a.close();

        assert_eq!(b.dropped_users().unwrap(), vec![alice.clone()]);
        assert!(matches!(a.announce(&alice), Err(BusError::Closed(_))));
    }
}
