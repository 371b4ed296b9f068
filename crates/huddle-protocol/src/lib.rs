//! # huddle-protocol
//!
//! Record definitions and wire encoding for the Huddle chat session layer.
//!
//! ## Records
//!
//! - `UserRecord` - Presence record, keyed by username
//! - `MessageRecord` - A chat message, direct or group addressed
//!
//! Both implement [`Record`], which gives the pub/sub substrate access to an
//! instance key and named fields for content filtering.
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{codec, MessageRecord};
//!
//! let record = MessageRecord::group("alice", "teamA", "hi");
//!
//! let encoded = codec::encode(&record).unwrap();
//! let decoded: MessageRecord = codec::decode(&encoded).unwrap();
//! assert_eq!(record, decoded);
//! ```

pub mod codec;
pub mod records;

pub use codec::{decode, encode, ProtocolError};
pub use records::{
    now_millis, Addressing, MessageRecord, Record, RecordError, UserRecord, MAX_MSG_SIZE,
    MAX_NAME_SIZE,
};
