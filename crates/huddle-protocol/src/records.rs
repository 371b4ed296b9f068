//! Record types exchanged over the substrate.
//!
//! Field names on the wire use the camelCase spelling (`fromUser`, `toGroup`,
//! ...), which is also the spelling content filters refer to.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Maximum length of any name field in bytes.
pub const MAX_NAME_SIZE: usize = 128;

/// Maximum length of a message payload in bytes.
pub const MAX_MSG_SIZE: usize = 512;

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Record validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// A required field is empty.
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    /// A field exceeds its size bound.
    #[error("{field} exceeds {max} bytes")]
    TooLong {
        /// Field name.
        field: &'static str,
        /// Bound in bytes.
        max: usize,
    },

    /// A message carries both a user and a group destination.
    #[error("message cannot address both a user and a group")]
    AmbiguousDestination,
}

/// Access to the key and named fields of a record.
///
/// The substrate uses the key to track instances (alive / not alive) and the
/// fields to evaluate content filters.
pub trait Record: Clone + Send + Sync + 'static {
    /// Instance key, or `None` for unkeyed records.
    fn key(&self) -> Option<&str>;

    /// Value of a named string field.
    fn field(&self, name: &str) -> Option<&str>;
}

fn check_name(field: &'static str, value: &str, required: bool) -> Result<(), RecordError> {
    if required && value.is_empty() {
        return Err(RecordError::Empty(field));
    }
    if value.len() > MAX_NAME_SIZE {
        return Err(RecordError::TooLong {
            field,
            max: MAX_NAME_SIZE,
        });
    }
    Ok(())
}

/// A participant's presence record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Unique username, the instance key.
    pub username: String,
    /// Current group, which is also the message partition.
    pub group: String,
    /// Optional first name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Optional last name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl UserRecord {
    /// Create a user record without display names.
    #[must_use]
    pub fn new(username: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            group: group.into(),
            first_name: None,
            last_name: None,
        }
    }

    /// Set the first name. Empty names are treated as absent.
    #[must_use]
    pub fn with_first_name(mut self, name: impl Into<String>) -> Self {
        self.first_name = Some(name.into()).filter(|n: &String| !n.is_empty());
        self
    }

    /// Set the last name. Empty names are treated as absent.
    #[must_use]
    pub fn with_last_name(mut self, name: impl Into<String>) -> Self {
        self.last_name = Some(name.into()).filter(|n: &String| !n.is_empty());
        self
    }

    /// Full display name built from the optional name fields, if any.
    #[must_use]
    pub fn full_name(&self) -> Option<String> {
        match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(name), None) | (None, Some(name)) => Some(name.to_string()),
            (None, None) => None,
        }
    }

    /// Validate required fields and size bounds.
    ///
    /// # Errors
    ///
    /// Returns an error if the username or group is empty, or any field is too long.
    pub fn validate(&self) -> Result<(), RecordError> {
        check_name("username", &self.username, true)?;
        check_name("group", &self.group, true)?;
        check_name("firstName", self.first_name.as_deref().unwrap_or_default(), false)?;
        check_name("lastName", self.last_name.as_deref().unwrap_or_default(), false)?;
        Ok(())
    }
}

impl Record for UserRecord {
    fn key(&self) -> Option<&str> {
        Some(&self.username)
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "username" => Some(&self.username),
            "group" => Some(&self.group),
            "firstName" => self.first_name.as_deref(),
            "lastName" => self.last_name.as_deref(),
            _ => None,
        }
    }
}

/// How a message is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Addressed to a single user.
    Direct,
    /// Addressed to a group.
    Group,
    /// Neither field set; the receiver treats it as its own group.
    Unaddressed,
}

/// A chat message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Sender username.
    pub from_user: String,
    /// Recipient username for direct messages, empty otherwise.
    #[serde(default)]
    pub to_user: String,
    /// Recipient group for group messages, empty otherwise.
    #[serde(default)]
    pub to_group: String,
    /// Text payload.
    pub message: String,
    /// Publish time in milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp_ms: u64,
}

impl MessageRecord {
    /// Create a direct message stamped with the current time.
    #[must_use]
    pub fn direct(
        from_user: impl Into<String>,
        to_user: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            from_user: from_user.into(),
            to_user: to_user.into(),
            to_group: String::new(),
            message: message.into(),
            timestamp_ms: now_millis(),
        }
    }

    /// Create a group message stamped with the current time.
    #[must_use]
    pub fn group(
        from_user: impl Into<String>,
        to_group: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            from_user: from_user.into(),
            to_user: String::new(),
            to_group: to_group.into(),
            message: message.into(),
            timestamp_ms: now_millis(),
        }
    }

    /// Classify the addressing of this message.
    #[must_use]
    pub fn addressing(&self) -> Addressing {
        match (self.to_user.is_empty(), self.to_group.is_empty()) {
            (false, _) => Addressing::Direct,
            (true, false) => Addressing::Group,
            (true, true) => Addressing::Unaddressed,
        }
    }

    /// The explicit destination (user, else group), if any.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        match self.addressing() {
            Addressing::Direct => Some(&self.to_user),
            Addressing::Group => Some(&self.to_group),
            Addressing::Unaddressed => None,
        }
    }

    /// Validate addressing and size bounds.
    ///
    /// # Errors
    ///
    /// Returns an error if both destinations are set, the sender is empty,
    /// or any field is too long.
    pub fn validate(&self) -> Result<(), RecordError> {
        check_name("fromUser", &self.from_user, true)?;
        check_name("toUser", &self.to_user, false)?;
        check_name("toGroup", &self.to_group, false)?;
        if !self.to_user.is_empty() && !self.to_group.is_empty() {
            return Err(RecordError::AmbiguousDestination);
        }
        if self.message.len() > MAX_MSG_SIZE {
            return Err(RecordError::TooLong {
                field: "message",
                max: MAX_MSG_SIZE,
            });
        }
        Ok(())
    }
}

impl Record for MessageRecord {
    fn key(&self) -> Option<&str> {
        None
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "fromUser" => Some(&self.from_user),
            "toUser" => Some(&self.to_user),
            "toGroup" => Some(&self.to_group),
            "message" => Some(&self.message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_record_names() {
        let user = UserRecord::new("alice", "teamA")
            .with_first_name("Alice")
            .with_last_name("");

        assert_eq!(user.first_name.as_deref(), Some("Alice"));
        assert!(user.last_name.is_none());
        assert_eq!(user.full_name(), Some("Alice".to_string()));

        let user = user.with_last_name("Smith");
        assert_eq!(user.full_name(), Some("Alice Smith".to_string()));
    }

    #[test]
    fn test_user_record_validation() {
        assert!(UserRecord::new("alice", "teamA").validate().is_ok());
        assert_eq!(
            UserRecord::new("", "teamA").validate(),
            Err(RecordError::Empty("username"))
        );
        assert_eq!(
            UserRecord::new("alice", "").validate(),
            Err(RecordError::Empty("group"))
        );

        let long = "a".repeat(MAX_NAME_SIZE + 1);
        assert!(matches!(
            UserRecord::new(long, "teamA").validate(),
            Err(RecordError::TooLong { field: "username", .. })
        ));
    }

    #[test]
    fn test_user_record_fields() {
        let user = UserRecord::new("alice", "teamA").with_first_name("Alice");
        assert_eq!(user.key(), Some("alice"));
        assert_eq!(user.field("group"), Some("teamA"));
        assert_eq!(user.field("firstName"), Some("Alice"));
        assert_eq!(user.field("lastName"), None);
        assert_eq!(user.field("bogus"), None);
    }

    #[test]
    fn test_message_addressing() {
        let dm = MessageRecord::direct("alice", "bob", "hi");
        assert_eq!(dm.addressing(), Addressing::Direct);
        assert_eq!(dm.destination(), Some("bob"));
        assert!(dm.to_group.is_empty());

        let group = MessageRecord::group("alice", "teamA", "hi");
        assert_eq!(group.addressing(), Addressing::Group);
        assert_eq!(group.destination(), Some("teamA"));
        assert!(group.to_user.is_empty());

        let bare = MessageRecord {
            from_user: "alice".into(),
            message: "hi".into(),
            ..Default::default()
        };
        assert_eq!(bare.addressing(), Addressing::Unaddressed);
        assert_eq!(bare.destination(), None);
        assert!(bare.key().is_none());
    }

    #[test]
    fn test_message_validation() {
        let mut msg = MessageRecord::direct("alice", "bob", "hi");
        assert!(msg.validate().is_ok());

        msg.to_group = "teamA".into();
        assert_eq!(msg.validate(), Err(RecordError::AmbiguousDestination));

        let long = MessageRecord::group("alice", "teamA", "x".repeat(MAX_MSG_SIZE + 1));
        assert!(matches!(
            long.validate(),
            Err(RecordError::TooLong { field: "message", .. })
        ));
    }

    #[test]
    fn test_timestamp_is_set() {
        let msg = MessageRecord::group("alice", "teamA", "hi");
        assert!(msg.timestamp_ms > 0);
    }
}
