//! Message history.
//!
//! [`HistoryStore`] is a bounded FIFO of received messages with a
//! case-insensitive substring search. [`History`] wraps it for shared use by
//! the monitor and the controller and optionally consults a durable
//! [`HistorySource`] first when searching.

use crate::metrics;
use crate::router::resolve_destination;
use async_trait::async_trait;
use huddle_protocol::{MessageRecord, ProtocolError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Default number of entries kept in memory.
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

/// History source errors.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encoding or decoding failure.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The stored data uses another storage format.
    #[error("Unsupported journal format {0}")]
    Incompatible(u16),

    /// The stored data is malformed.
    #[error("Corrupt journal: {0}")]
    Corrupt(&'static str),
}

/// A received message and where it was addressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The message as received.
    pub record: MessageRecord,
    /// Resolved destination: user, group, or the receiver's group.
    pub destination: String,
}

impl HistoryEntry {
    /// Create an entry for a message received while in `own_group`.
    #[must_use]
    pub fn new(record: MessageRecord, own_group: &str) -> Self {
        let destination = resolve_destination(&record, own_group);
        Self {
            record,
            destination,
        }
    }

    /// Whether any of sender, destination or text contains `needle`, which
    /// must already be lowercase.
    #[must_use]
    pub fn matches(&self, needle: &str) -> bool {
        [
            self.record.from_user.as_str(),
            self.destination.as_str(),
            self.record.message.as_str(),
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
    }
}

/// Keep only the last `limit` entries.
pub(crate) fn most_recent(mut entries: Vec<HistoryEntry>, limit: Option<usize>) -> Vec<HistoryEntry> {
    if let Some(limit) = limit {
        let excess = entries.len().saturating_sub(limit);
        entries.drain(..excess);
    }
    entries
}

/// Bounded, insertion-ordered message buffer.
#[derive(Debug)]
pub struct HistoryStore {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryStore {
    /// Create a store with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding at most `capacity` entries (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry, returning the evicted oldest entry when full.
    pub fn append(&mut self, entry: HistoryEntry) -> Option<HistoryEntry> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    /// All entries, oldest first, limited to the most recent `limit`.
    #[must_use]
    pub fn all(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        most_recent(self.entries.iter().cloned().collect(), limit)
    }

    /// Entries where any field contains `term`, ignoring case, limited to
    /// the most recent `limit` matches.
    #[must_use]
    pub fn search(&self, term: &str, limit: Option<usize>) -> Vec<HistoryEntry> {
        let needle = term.to_lowercase();
        let hits = self
            .entries
            .iter()
            .filter(|e| e.matches(&needle))
            .cloned()
            .collect();
        most_recent(hits, limit)
    }
}

/// A durable store of history entries.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &str;

    /// Persist an entry.
    async fn record(&self, entry: &HistoryEntry) -> Result<(), HistoryError>;

    /// Entries matching `term` (case-insensitive), most recent `limit`.
    async fn query(
        &self,
        term: &str,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryEntry>, HistoryError>;
}

/// Shared history: the in-memory store plus an optional durable source.
pub struct History {
    store: Mutex<HistoryStore>,
    source: Option<Arc<dyn HistorySource>>,
}

impl History {
    /// In-memory history only.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            store: Mutex::new(HistoryStore::with_capacity(capacity)),
            source: None,
        }
    }

    /// History backed by a durable source.
    #[must_use]
    pub fn with_source(capacity: usize, source: Arc<dyn HistorySource>) -> Self {
        Self {
            store: Mutex::new(HistoryStore::with_capacity(capacity)),
            source: Some(source),
        }
    }

    /// Number of entries held in memory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    /// Whether no entries are held in memory.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    /// Append entries in order and record them to the durable source.
    /// Source failures are logged.
    pub async fn append_batch(&self, entries: &[HistoryEntry]) {
        {
            let mut store = self.store.lock();
            for entry in entries {
                store.append(entry.clone());
            }
        }

        let Some(source) = &self.source else {
            return;
        };
        for entry in entries {
            if let Err(e) = source.record(entry).await {
                warn!(source = %source.name(), error = %e, "Failed to record history entry");
            }
        }
    }

    /// In-memory entries, most recent `limit`.
    #[must_use]
    pub fn all(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        self.store.lock().all(limit)
    }

    /// Search history. An empty term lists everything.
    ///
    /// The durable source is asked first; if it fails or finds nothing the
    /// in-memory store is scanned instead.
    pub async fn search(&self, term: &str, limit: Option<usize>) -> Vec<HistoryEntry> {
        if term.is_empty() {
            metrics::record_history_search("memory");
            return self.all(limit);
        }

        if let Some(source) = &self.source {
            match source.query(term, limit).await {
                Ok(hits) if !hits.is_empty() => {
                    metrics::record_history_search(source.name());
                    return hits;
                }
                Ok(_) => debug!(source = %source.name(), term, "No durable matches, scanning memory"),
                Err(e) => {
                    warn!(source = %source.name(), error = %e, "History query failed, scanning memory");
                }
            }
        }

        metrics::record_history_search("memory");
        self.store.lock().search(term, limit)
    }
}
