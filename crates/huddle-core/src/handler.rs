//! Outward session callbacks.
//!
//! Each controller is given its own handler. Callbacks run on the monitor
//! tasks (or the caller's task for history results) and should not block.

use crate::history::HistoryEntry;
use huddle_protocol::{MessageRecord, UserRecord};
use tokio::sync::mpsc;
use tracing::trace;

/// Receives session events. Every method defaults to doing nothing.
pub trait SessionHandler: Send + Sync {
    /// Users joined or moved to another group.
    fn on_users_joined_or_updated(&self, _users: &[UserRecord]) {}

    /// Users left.
    fn on_users_dropped(&self, _users: &[UserRecord]) {}

    /// Messages arrived.
    fn on_messages_received(&self, _messages: &[MessageRecord]) {}

    /// Result of a history listing or search.
    fn on_history_results(&self, _entries: &[HistoryEntry]) {}
}

/// A handler that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl SessionHandler for NoopHandler {}

/// A session event as delivered by [`ChannelHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// See [`SessionHandler::on_users_joined_or_updated`].
    UsersJoinedOrUpdated(Vec<UserRecord>),
    /// See [`SessionHandler::on_users_dropped`].
    UsersDropped(Vec<UserRecord>),
    /// See [`SessionHandler::on_messages_received`].
    MessagesReceived(Vec<MessageRecord>),
    /// See [`SessionHandler::on_history_results`].
    HistoryResults(Vec<HistoryEntry>),
}

/// Forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelHandler {
    /// Create a handler and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            trace!("Session event dropped, receiver closed");
        }
    }
}

impl SessionHandler for ChannelHandler {
    fn on_users_joined_or_updated(&self, users: &[UserRecord]) {
        self.forward(SessionEvent::UsersJoinedOrUpdated(users.to_vec()));
    }

    fn on_users_dropped(&self, users: &[UserRecord]) {
        self.forward(SessionEvent::UsersDropped(users.to_vec()));
    }

    fn on_messages_received(&self, messages: &[MessageRecord]) {
        self.forward(SessionEvent::MessagesReceived(messages.to_vec()));
    }

    fn on_history_results(&self, entries: &[HistoryEntry]) {
        self.forward(SessionEvent::HistoryResults(entries.to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_handler_forwards_in_order() {
        let (handler, mut rx) = ChannelHandler::new();
        let alice = UserRecord::new("alice", "teamA");

        handler.on_users_joined_or_updated(&[alice.clone()]);
        handler.on_users_dropped(&[alice.clone()]);

        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::UsersJoinedOrUpdated(vec![alice.clone()])
        );
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::UsersDropped(vec![alice]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (handler, rx) = ChannelHandler::new();
        drop(rx);
        handler.on_messages_received(&[MessageRecord::group("alice", "teamA", "hi")]);
        NoopHandler.on_history_results(&[]);
    }
}
