//! Presence tracking.
//!
//! The registry is the local view of who is online, keyed by username and
//! kept in the order users were first seen.

use crate::error::InconsistentState;
use huddle_protocol::UserRecord;
use tracing::{debug, warn};

/// What an [`PresenceRegistry::upsert`] changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// The user was not known before.
    Joined,
    /// The user moved from `previous_group`.
    Updated {
        /// Group the user was in before.
        previous_group: String,
    },
    /// The user was already known in the same group; nothing changed.
    Duplicate,
}

/// Changes actually applied by [`PresenceRegistry::handle_notify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceDelta {
    /// Users that joined or changed group, as now stored.
    pub joined: Vec<UserRecord>,
    /// Users that were removed.
    pub dropped: Vec<UserRecord>,
}

impl PresenceDelta {
    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.dropped.is_empty()
    }
}

/// Online users in insertion order.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    members: Vec<UserRecord>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of online users.
    #[must_use]
    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// Whether nobody is online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Look up a user.
    #[must_use]
    pub fn get(&self, username: &str) -> Option<&UserRecord> {
        self.members.iter().find(|u| u.username == username)
    }

    /// Insert a user or move a known user to a new group.
    pub fn upsert(&mut self, record: UserRecord) -> Upsert {
        match self
            .members
            .iter_mut()
            .find(|u| u.username == record.username)
        {
            Some(existing) if existing.group == record.group => {
                let inconsistency = InconsistentState::DuplicateJoin {
                    username: record.username,
                    group: record.group,
                };
                warn!(%inconsistency, "Presence: duplicate join ignored");
                Upsert::Duplicate
            }
            Some(existing) => {
                let previous_group = std::mem::replace(&mut existing.group, record.group);
                debug!(
                    user = %existing.username,
                    from = %previous_group,
                    to = %existing.group,
                    "Presence: member changed group"
                );
                Upsert::Updated { previous_group }
            }
            None => {
                debug!(user = %record.username, group = %record.group, "Presence: member joined");
                self.members.push(record);
                Upsert::Joined
            }
        }
    }

    /// Remove a user, returning the stored record.
    pub fn remove(&mut self, username: &str) -> Option<UserRecord> {
        let Some(pos) = self.members.iter().position(|u| u.username == username) else {
            let inconsistency = InconsistentState::UnknownUser(username.to_string());
            warn!(%inconsistency, "Presence: drop of unknown user ignored");
            return None;
        };
        debug!(user = %username, "Presence: member left");
        Some(self.members.remove(pos))
    }

    /// All online users in insertion order.
    #[must_use]
    pub fn list(&self) -> Vec<UserRecord> {
        self.members.clone()
    }

    /// Forget everyone.
    pub fn clear(&mut self) {
        self.members.clear();
    }

    /// Apply a batch of fresh and dropped records from the substrate.
    ///
    /// Duplicates and unknown drops are left out of the returned delta.
    pub fn handle_notify(
        &mut self,
        fresh: Vec<UserRecord>,
        dropped: Vec<UserRecord>,
    ) -> PresenceDelta {
        let mut delta = PresenceDelta::default();

        for record in fresh {
            let username = record.username.clone();
            if self.upsert(record) != Upsert::Duplicate {
                if let Some(stored) = self.get(&username) {
                    delta.joined.push(stored.clone());
                }
            }
        }
        for record in dropped {
            if let Some(removed) = self.remove(&record.username) {
                delta.dropped.push(removed);
            }
        }

        delta
    }

    /// The registry as it will look once pending substrate state is applied,
    /// without changing the registry.
    ///
    /// `alive` are records the substrate currently reports alive and
    /// `dropped` are not-alive records not yet consumed.
    #[must_use]
    pub fn reconcile(&self, alive: &[UserRecord], dropped: &[UserRecord]) -> Vec<UserRecord> {
        let mut view: Vec<UserRecord> = self
            .members
            .iter()
            .filter(|u| !dropped.iter().any(|d| d.username == u.username))
            .cloned()
            .collect();

        for record in alive {
            match view.iter_mut().find(|u| u.username == record.username) {
                Some(existing) => existing.group.clone_from(&record.group),
                None => view.push(record.clone()),
            }
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str, group: &str) -> UserRecord {
        UserRecord::new(name, group)
    }

    #[test]
    fn test_upsert_outcomes() {
        let mut registry = PresenceRegistry::new();

        assert_eq!(registry.upsert(user("alice", "teamA")), Upsert::Joined);
        assert_eq!(registry.upsert(user("alice", "teamA")), Upsert::Duplicate);
        assert_eq!(
            registry.upsert(user("alice", "teamB")),
            Upsert::Updated {
                previous_group: "teamA".into()
            }
        );

        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get("alice").unwrap().group, "teamB");
    }

    #[test]
    fn test_list_keeps_insertion_order() {
        let mut registry = PresenceRegistry::new();
        registry.upsert(user("carol", "teamA"));
        registry.upsert(user("alice", "teamA"));
        registry.upsert(user("bob", "teamB"));
        registry.upsert(user("carol", "teamB"));

        let names: Vec<_> = registry.list().into_iter().map(|u| u.username).collect();
        assert_eq!(names, vec!["carol", "alice", "bob"]);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut registry = PresenceRegistry::new();
        registry.upsert(user("alice", "teamA"));

        assert!(registry.remove("bob").is_none());
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.remove("alice").unwrap().username, "alice");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handle_notify_reports_applied_changes() {
        let mut registry = PresenceRegistry::new();
        registry.upsert(user("alice", "teamA"));

        let delta = registry.handle_notify(
            vec![user("alice", "teamA"), user("bob", "teamA")],
            vec![user("alice", "teamA"), user("ghost", "teamA")],
        );

        assert_eq!(delta.joined, vec![user("bob", "teamA")]);
        assert_eq!(delta.dropped, vec![user("alice", "teamA")]);
        assert_eq!(registry.list(), vec![user("bob", "teamA")]);

        assert!(registry.handle_notify(vec![user("bob", "teamA")], vec![]).is_empty());
    }

    #[test]
    fn test_updated_member_keeps_names() {
        let mut registry = PresenceRegistry::new();
        registry.upsert(user("alice", "teamA").with_first_name("Alice"));

        let delta = registry.handle_notify(vec![user("alice", "teamB")], vec![]);
        assert_eq!(delta.joined.len(), 1);
        assert_eq!(delta.joined[0].group, "teamB");
        assert_eq!(delta.joined[0].first_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_reconcile_does_not_mutate() {
        let mut registry = PresenceRegistry::new();
        registry.upsert(user("alice", "teamA"));
        registry.upsert(user("bob", "teamA"));

        let view = registry.reconcile(
            &[user("alice", "teamB"), user("carol", "teamC")],
            &[user("bob", "teamA")],
        );

        assert_eq!(
            view,
            vec![user("alice", "teamB"), user("carol", "teamC")]
        );
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.get("alice").unwrap().group, "teamA");
    }

    #[test]
    fn test_clear() {
        let mut registry = PresenceRegistry::new();
        registry.upsert(user("alice", "teamA"));
        registry.clear();
        assert!(registry.list().is_empty());
    }
}
