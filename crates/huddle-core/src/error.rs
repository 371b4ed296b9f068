//! Session errors.

use huddle_bus::BusError;
use huddle_protocol::RecordError;
use thiserror::Error;

/// Errors returned by [`SessionController`](crate::SessionController) operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Caller supplied an unusable value.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The operation requires a joined session.
    #[error("Not joined")]
    NotJoined,

    /// The substrate could not create or operate an entity.
    #[error("Substrate unavailable: {0}")]
    SubstrateUnavailable(#[from] BusError),

    /// A record failed validation before publish.
    #[error("Invalid record: {0}")]
    InvalidRecord(#[from] RecordError),
}

/// Non-fatal inconsistencies between the registry and what the substrate
/// reports. These are logged, never returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InconsistentState {
    /// A user was announced again with the group it already had.
    #[error("{username} joined {group} twice")]
    DuplicateJoin {
        /// Username.
        username: String,
        /// Group the user was already in.
        group: String,
    },

    /// A user that was never seen was reported as dropped.
    #[error("unknown user {0} dropped")]
    UnknownUser(String),
}
