//! Outgoing message routing.
//!
//! A message addressed to the sender's own group is a group message; any
//! other destination is a user. Inbound delivery is scoped by partition (the
//! current group) and by the content filter [`MESSAGE_FILTER_EXPRESSION`],
//! bound to the session's username and group.

use crate::error::SessionError;
use huddle_protocol::{MessageRecord, UserRecord, MAX_MSG_SIZE};

/// Content filter for inbound messages: addressed to me or to my group.
pub const MESSAGE_FILTER_EXPRESSION: &str = "toUser = %0 OR toGroup = %1";

/// Parameters bound to [`MESSAGE_FILTER_EXPRESSION`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParameters {
    /// Matched against `toUser`.
    pub username: String,
    /// Matched against `toGroup`.
    pub group: String,
}

impl FilterParameters {
    /// Parameters as quoted filter literals, in expression order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        vec![quote(&self.username), quote(&self.group)]
    }
}

fn quote(value: &str) -> String {
    format!("'{value}'")
}

/// Builds outgoing messages and filter parameters.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    max_message_size: usize,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MSG_SIZE,
        }
    }
}

impl MessageRouter {
    /// Create a router with the default message size bound.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the record for `text` sent by `sender` to `destination`.
    ///
    /// An empty destination falls back to the sender's own group.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Validation`] for empty or oversized text and
    /// [`SessionError::InvalidRecord`] if the built record breaks a bound.
    pub fn build_outgoing(
        &self,
        sender: &UserRecord,
        destination: &str,
        text: &str,
    ) -> Result<MessageRecord, SessionError> {
        if text.is_empty() {
            return Err(SessionError::Validation("message cannot be empty".into()));
        }
        if text.len() > self.max_message_size {
            return Err(SessionError::Validation(format!(
                "message exceeds {} bytes",
                self.max_message_size
            )));
        }

        let record = if destination.is_empty() || destination == sender.group {
            MessageRecord::group(&sender.username, &sender.group, text)
        } else {
            MessageRecord::direct(&sender.username, destination, text)
        };
        record.validate()?;
        Ok(record)
    }

    /// Filter parameters for a session running as `user`.
    #[must_use]
    pub fn build_filter_parameters(&self, user: &UserRecord) -> FilterParameters {
        FilterParameters {
            username: user.username.clone(),
            group: user.group.clone(),
        }
    }
}

/// Where a received message was addressed, from the receiver's point of view:
/// the user, else the group, else the receiver's own group.
#[must_use]
pub fn resolve_destination(record: &MessageRecord, own_group: &str) -> String {
    record.destination().unwrap_or(own_group).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::MAX_NAME_SIZE;

    fn alice() -> UserRecord {
        UserRecord::new("alice", "teamA")
    }

    #[test]
    fn test_group_message() {
        let record = MessageRouter::new()
            .build_outgoing(&alice(), "teamA", "hi")
            .unwrap();
        assert_eq!(record.from_user, "alice");
        assert_eq!(record.to_group, "teamA");
        assert_eq!(record.to_user, "");
        assert_eq!(record.message, "hi");
        assert!(record.timestamp_ms > 0);
    }

    #[test]
    fn test_direct_message() {
        let record = MessageRouter::new()
            .build_outgoing(&alice(), "bob", "hi")
            .unwrap();
        assert_eq!(record.to_user, "bob");
        assert_eq!(record.to_group, "");
    }

    #[test]
    fn test_empty_destination_uses_own_group() {
        let record = MessageRouter::new()
            .build_outgoing(&alice(), "", "hi")
            .unwrap();
        assert_eq!(record.to_group, "teamA");
        assert_eq!(record.to_user, "");
    }

    #[test]
    fn test_text_bounds() {
        let router = MessageRouter::new();
        assert!(matches!(
            router.build_outgoing(&alice(), "teamA", ""),
            Err(SessionError::Validation(_))
        ));
        let long = "x".repeat(MAX_MSG_SIZE + 1);
        assert!(matches!(
            router.build_outgoing(&alice(), "teamA", &long),
            Err(SessionError::Validation(_))
        ));
        let exact = "x".repeat(MAX_MSG_SIZE);
        assert!(router.build_outgoing(&alice(), "teamA", &exact).is_ok());
    }

    #[test]
    fn test_destination_bound() {
        let long = "b".repeat(MAX_NAME_SIZE + 1);
        assert!(matches!(
            MessageRouter::new().build_outgoing(&alice(), &long, "hi"),
            Err(SessionError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_filter_parameters() {
        let params = MessageRouter::new().build_filter_parameters(&alice());
        assert_eq!(params.username, "alice");
        assert_eq!(params.group, "teamA");
        assert_eq!(params.to_vec(), vec!["'alice'", "'teamA'"]);
    }

    #[test]
    fn test_resolve_destination() {
        let direct = MessageRecord::direct("bob", "alice", "hi");
        let group = MessageRecord::group("bob", "teamA", "hi");
        let bare = MessageRecord {
            from_user: "bob".into(),
            message: "hi".into(),
            ..MessageRecord::default()
        };

        assert_eq!(resolve_destination(&direct, "teamB"), "alice");
        assert_eq!(resolve_destination(&group, "teamB"), "teamA");
        assert_eq!(resolve_destination(&bare, "teamB"), "teamB");
    }
}
