//! # huddle-bus
//!
//! An in-process publish/subscribe substrate for the Huddle session layer.
//!
//! The bus follows a data-centric model:
//!
//! - **Domain** - Shared space in which typed topics live
//! - **Participant** - Owns writers and readers; closing it closes them all
//! - **Writer** - Publishes records to a topic within a partition, registers
//!   and unregisters keyed instances
//! - **Reader** - Caches matching samples with sample/instance state, scoped by
//!   partition and an optional content filter
//! - **WaitSet** - Cancellable, timeout-bounded wait on reader conditions
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  write   ┌─────────────┐  offer   ┌─────────────┐
//! │   Writer    │────────▶│    Topic    │────────▶│   Reader    │
//! └─────────────┘          └─────────────┘          └─────────────┘
//!                                                         │ notify
//!                                                         ▼
//!                                                  ┌─────────────┐
//!                                                  │   WaitSet   │
//!                                                  └─────────────┘
//! ```

pub mod domain;
pub mod error;
pub mod filter;
pub mod participant;
pub mod partition;
pub mod qos;
pub mod reader;
pub mod topic;
pub mod waitset;
pub mod writer;

pub use domain::Domain;
pub use error::BusError;
pub use filter::ContentFilter;
pub use participant::{Participant, ReaderOptions, WriterOptions};
pub use qos::{Durability, QosLibrary, QosProfile};
pub use reader::{DataState, InstanceState, Reader, Sample, SampleInfo, SampleState};
pub use waitset::{Condition, ReadCondition, WaitOutcome, WaitSet};
pub use writer::{InstanceHandle, Writer};
