//! # huddle-core
//!
//! The session layer of Huddle: presence, routed messaging and history on
//! top of the `huddle-bus` substrate.
//!
//! - **SessionController** - Public API: join, leave, change group, send,
//!   list users, search history
//! - **PresenceRegistry** - Local view of who is online
//! - **MessageRouter** - Direct vs. group addressing and inbound filter
//!   parameters
//! - **History** - Bounded message history with search, optionally backed
//!   by a durable [`HistorySource`] such as the file [`Journal`]
//! - **SessionMonitor** - Background tasks turning substrate notifications
//!   into registry/history updates and [`SessionHandler`] callbacks
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────┐ commands ┌───────────────────┐
//! │ SessionController │────────▶│ SubstrateAdapter  │
//! └───────────────────┘          └───────────────────┘
//!       │  reads                         │ notifications
//!       ▼                                ▼
//! ┌───────────────────┐ updates  ┌───────────────────┐
//! │ Registry, History │◀────────│  SessionMonitor   │──▶ SessionHandler
//! └───────────────────┘          └───────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use huddle_bus::Domain;
//! use huddle_core::{NoopHandler, SessionConfig, SessionController};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), huddle_core::SessionError> {
//! let domain = Domain::new(0);
//! let session = SessionController::new(domain, SessionConfig::default(), Arc::new(NoopHandler));
//!
//! session.join("alice", "teamA", Some("Alice"), None).await?;
//! session.send("teamA", "hello team").await?;
//! session.send("bob", "hello bob").await?;
//! let online = session.list_users().await?;
//! session.leave().await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handler;
pub mod history;
pub mod journal;
pub mod metrics;
pub mod monitor;
pub mod presence;
pub mod router;
pub mod session;
pub mod substrate;

pub use error::{InconsistentState, SessionError};
pub use handler::{ChannelHandler, NoopHandler, SessionEvent, SessionHandler};
pub use history::{
    History, HistoryEntry, HistoryError, HistorySource, HistoryStore, DEFAULT_HISTORY_CAPACITY,
};
pub use journal::Journal;
pub use monitor::{MonitorContext, SessionMonitor};
pub use presence::{PresenceDelta, PresenceRegistry, Upsert};
pub use router::{resolve_destination, FilterParameters, MessageRouter, MESSAGE_FILTER_EXPRESSION};
pub use session::{SessionConfig, SessionController};
pub use substrate::SubstrateAdapter;
