//! The session controller.
//!
//! A [`SessionController`] is the public API of a chat session: it joins a
//! user to a group, sends messages, changes group, lists who is online and
//! queries history. While joined it owns the session's substrate entities
//! and its two monitor tasks.

use crate::error::SessionError;
use crate::handler::SessionHandler;
use crate::history::{History, HistoryEntry, HistorySource, DEFAULT_HISTORY_CAPACITY};
use crate::metrics;
use crate::monitor::{deliver_messages, MonitorContext, SessionMonitor};
use crate::presence::PresenceRegistry;
use crate::router::MessageRouter;
use crate::substrate::SubstrateAdapter;
use huddle_bus::partition::validate_partition_name;
use huddle_bus::qos::{MESSAGE_PROFILE, USER_PROFILE};
use huddle_bus::Domain;
use huddle_protocol::{MessageRecord, UserRecord};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

/// Default presence topic name.
pub const DEFAULT_USER_TOPIC: &str = "userInfo";

/// Default message topic name.
pub const DEFAULT_MESSAGE_TOPIC: &str = "message";

/// Default bound on a single monitor wait.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Presence topic.
    pub user_topic: String,
    /// Message topic.
    pub message_topic: String,
    /// QoS profile for the presence topic.
    pub user_profile: String,
    /// QoS profile for the message topic.
    pub message_profile: String,
    /// Upper bound on a single monitor wait, and so on how long `leave` waits.
    pub wait_timeout: Duration,
    /// In-memory history capacity.
    pub history_capacity: usize,
    /// Publish presence as part of `join`.
    pub auto_announce: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_topic: DEFAULT_USER_TOPIC.to_string(),
            message_topic: DEFAULT_MESSAGE_TOPIC.to_string(),
            user_profile: USER_PROFILE.to_string(),
            message_profile: MESSAGE_PROFILE.to_string(),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            auto_announce: true,
        }
    }
}

struct ActiveSession {
    user: UserRecord,
    adapter: Arc<SubstrateAdapter>,
    monitor: SessionMonitor,
    group: watch::Sender<String>,
}

fn require(field: &str, value: &str) -> Result<(), SessionError> {
    if value.is_empty() {
        return Err(SessionError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// A group names the partition the session's readers and writers attach to.
fn check_group(group: &str) -> Result<(), SessionError> {
    require("group", group)?;
    validate_partition_name(group)
        .map_err(|e| SessionError::Validation(format!("invalid group `{group}`: {e}")))
}

/// A chat session on a domain.
pub struct SessionController {
    domain: Arc<Domain>,
    config: SessionConfig,
    router: MessageRouter,
    registry: Arc<Mutex<PresenceRegistry>>,
    history: Arc<History>,
    handler: Arc<dyn SessionHandler>,
    active: RwLock<Option<ActiveSession>>,
}

impl SessionController {
    /// Create a controller that is not yet joined.
    #[must_use]
    pub fn new(domain: Arc<Domain>, config: SessionConfig, handler: Arc<dyn SessionHandler>) -> Self {
        let history = Arc::new(History::new(config.history_capacity));
        Self {
            domain,
            config,
            router: MessageRouter::new(),
            registry: Arc::new(Mutex::new(PresenceRegistry::new())),
            history,
            handler,
            active: RwLock::new(None),
        }
    }

    /// Search a durable source before the in-memory history.
    #[must_use]
    pub fn with_history_source(mut self, source: Arc<dyn HistorySource>) -> Self {
        self.history = Arc::new(History::with_source(self.config.history_capacity, source));
        self
    }

    /// Session settings.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Join `group` as `username`, leaving first if already joined.
    ///
    /// Messages retained by the substrate for the group are moved into
    /// history once and reported through the handler.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Validation`] for empty or oversized fields or a
    /// group that is not a usable partition name, and
    /// [`SessionError::SubstrateUnavailable`] if entities cannot be created.
    pub async fn join(
        &self,
        username: &str,
        group: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<UserRecord, SessionError> {
        require("username", username)?;
        check_group(group)?;
        let mut user = UserRecord::new(username, group);
        if let Some(first) = first_name {
            user = user.with_first_name(first);
        }
        if let Some(last) = last_name {
            user = user.with_last_name(last);
        }
        user.validate()
            .map_err(|e| SessionError::Validation(e.to_string()))?;

        let mut active = self.active.write().await;
        if let Some(previous) = active.take() {
            debug!(user = %previous.user.username, "Leaving before rejoin");
            self.teardown(previous).await;
        }

        let params = self.router.build_filter_parameters(&user);
        let adapter = Arc::new(SubstrateAdapter::open(
            Arc::clone(&self.domain),
            &self.config,
            &user,
            &params,
        )?);

        let (group_tx, group_rx) = watch::channel(user.group.clone());
        match adapter.take_messages() {
            Ok(retained) => {
                debug!(count = retained.len(), "Retained messages at join");
                deliver_messages(retained, &self.history, self.handler.as_ref(), &group_rx).await;
            }
            Err(e) => warn!(error = %e, "Failed to take retained messages"),
        }

        let mut monitor = SessionMonitor::spawn(
            MonitorContext {
                adapter: Arc::clone(&adapter),
                registry: Arc::clone(&self.registry),
                history: Arc::clone(&self.history),
                handler: Arc::clone(&self.handler),
                group: group_rx,
                wait_timeout: self.config.wait_timeout,
            },
            &user.username,
        );

        if self.config.auto_announce {
            if let Err(e) = adapter.announce(&user) {
                monitor.shutdown().await;
                adapter.close();
                return Err(e.into());
            }
        }

        info!(user = %user.username, group = %user.group, "Joined");
        metrics::session_started();
        *active = Some(ActiveSession {
            user: user.clone(),
            adapter,
            monitor,
            group: group_tx,
        });
        Ok(user)
    }

    /// Move the session to `new_group` and republish presence.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotJoined`] if not joined,
    /// [`SessionError::Validation`] for an empty, oversized or wildcard group, and
    /// [`SessionError::SubstrateUnavailable`] if rerouting fails.
    pub async fn update_group(&self, new_group: &str) -> Result<UserRecord, SessionError> {
        let mut active = self.active.write().await;
        let session = active.as_mut().ok_or(SessionError::NotJoined)?;
        check_group(new_group)?;

        let mut user = session.user.clone();
        user.group = new_group.to_string();
        user.validate()
            .map_err(|e| SessionError::Validation(e.to_string()))?;

        let params = self.router.build_filter_parameters(&user);
        session.adapter.reroute(&params)?;
        session.group.send_replace(user.group.clone());
        let previous = std::mem::replace(&mut session.user, user.clone());
        session.adapter.announce(&user)?;

        info!(
            user = %user.username,
            from = %previous.group,
            to = %user.group,
            "Group changed"
        );
        Ok(user)
    }

    /// Leave the session. Does nothing if not joined.
    pub async fn leave(&self) {
        let mut active = self.active.write().await;
        if let Some(session) = active.take() {
            self.teardown(session).await;
        }
    }

    async fn teardown(&self, mut session: ActiveSession) {
        match session.adapter.retract(&session.user) {
            Ok(true) => debug!(user = %session.user.username, "Presence retracted"),
            Ok(false) => {}
            Err(e) => warn!(user = %session.user.username, error = %e, "Failed to retract presence"),
        }
        session.monitor.shutdown().await;
        session.adapter.close();

        self.registry.lock().clear();
        metrics::set_users_online(&session.user.username, 0);
        metrics::session_ended();
        info!(user = %session.user.username, group = %session.user.group, "Left");
    }

    /// Users currently online, including presence changes the monitor has
    /// not applied yet.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotJoined`] if not joined.
    pub async fn list_users(&self) -> Result<Vec<UserRecord>, SessionError> {
        let active = self.active.read().await;
        let session = active.as_ref().ok_or(SessionError::NotJoined)?;
        let (alive, dropped) = session.adapter.observed_users()?;
        Ok(self.registry.lock().reconcile(&alive, &dropped))
    }

    /// Send `text` to a user or, if `destination` is the current group (or
    /// empty), to the group. Returns the published record.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotJoined`] if not joined, a validation error
    /// for bad text or destination, and [`SessionError::SubstrateUnavailable`]
    /// if publishing fails.
    pub async fn send(&self, destination: &str, text: &str) -> Result<MessageRecord, SessionError> {
        let active = self.active.read().await;
        let session = active.as_ref().ok_or(SessionError::NotJoined)?;

        let record = self.router.build_outgoing(&session.user, destination, text)?;
        let delivered = session.adapter.publish(&record)?;
        metrics::record_message_sent();
        debug!(
            from = %record.from_user,
            to_user = %record.to_user,
            to_group = %record.to_group,
            delivered,
            "Message sent"
        );
        Ok(record)
    }

    /// Publish presence now. Needed after joining with `auto_announce` off.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotJoined`] if not joined.
    pub async fn announce(&self) -> Result<(), SessionError> {
        let active = self.active.read().await;
        let session = active.as_ref().ok_or(SessionError::NotJoined)?;
        session.adapter.announce(&session.user)?;
        Ok(())
    }

    /// History, most recent `limit`. Also reported through the handler.
    pub async fn load_history(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        let entries = self.history.all(limit);
        self.handler.on_history_results(&entries);
        entries
    }

    /// Search history; see [`History::search`]. Also reported through the
    /// handler.
    pub async fn search(&self, term: &str, limit: Option<usize>) -> Vec<HistoryEntry> {
        let entries = self.history.search(term, limit).await;
        self.handler.on_history_results(&entries);
        entries
    }

    /// The local user record, if joined.
    pub async fn current_user(&self) -> Option<UserRecord> {
        self.active.read().await.as_ref().map(|s| s.user.clone())
    }

    /// Whether the session is joined.
    pub async fn is_joined(&self) -> bool {
        self.active.read().await.is_some()
    }
}
