//! Bus errors.

use thiserror::Error;

/// Errors raised by bus entities.
#[derive(Debug, Error)]
pub enum BusError {
    /// The entity (or its participant) has been closed.
    #[error("{0} is closed")]
    Closed(&'static str),

    /// No QoS profile with this name exists in the library.
    #[error("Unknown QoS profile: {0}")]
    UnknownProfile(String),

    /// The QoS library could not be parsed.
    #[error("Invalid QoS library: {0}")]
    InvalidQos(String),

    /// A content filter expression or its parameters are invalid.
    #[error("Invalid content filter: {0}")]
    InvalidFilter(String),

    /// Invalid partition name.
    #[error("Invalid partition name: {0}")]
    InvalidPartition(&'static str),

    /// The instance is not registered by this writer.
    #[error("Instance not registered: {0}")]
    NotRegistered(String),

    /// Instance operations on a topic whose records carry no key.
    #[error("Topic {0} is unkeyed")]
    Unkeyed(String),

    /// A topic already exists with a different record type.
    #[error("Topic {0} exists with a different record type")]
    TypeMismatch(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
