//! Participants own writers and readers.
//!
//! Closing a participant closes every entity it created: writers unregister
//! their instances (so peers see them as not alive) and readers detach.

use crate::domain::Domain;
use crate::error::BusError;
use crate::filter::ContentFilter;
use crate::partition::{validate_partition_name, DEFAULT_PARTITION};
use crate::qos::QosProfile;
use crate::reader::{Reader, ReaderShared};
use crate::writer::Writer;
use huddle_protocol::Record;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Options for creating a writer.
#[derive(Debug, Clone, Default)]
pub struct WriterOptions {
    /// QoS profile.
    pub profile: QosProfile,
    /// Initial partition; the default partition if `None`.
    pub partition: Option<String>,
}

impl WriterOptions {
    /// Options with the given profile in the default partition.
    #[must_use]
    pub fn new(profile: QosProfile) -> Self {
        Self {
            profile,
            partition: None,
        }
    }

    /// Set the initial partition.
    #[must_use]
    pub fn partition(mut self, name: impl Into<String>) -> Self {
        self.partition = Some(name.into());
        self
    }
}

/// Options for creating a reader.
#[derive(Debug, Clone, Default)]
pub struct ReaderOptions {
    /// QoS profile.
    pub profile: QosProfile,
    /// Initial partition; the default partition if `None`.
    pub partition: Option<String>,
    /// Optional content filter.
    pub filter: Option<ContentFilter>,
}

impl ReaderOptions {
    /// Options with the given profile in the default partition, unfiltered.
    #[must_use]
    pub fn new(profile: QosProfile) -> Self {
        Self {
            profile,
            partition: None,
            filter: None,
        }
    }

    /// Set the initial partition.
    #[must_use]
    pub fn partition(mut self, name: impl Into<String>) -> Self {
        self.partition = Some(name.into());
        self
    }

    /// Install a content filter.
    #[must_use]
    pub fn filter(mut self, filter: ContentFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

trait Entity: Send + Sync {
    fn close(&self);
}

impl<T: Record> Entity for Writer<T> {
    fn close(&self) {
        Writer::close(self);
    }
}

impl<T: Record> Entity for Reader<T> {
    fn close(&self) {
        Reader::close(self);
    }
}

fn resolve_partition(partition: Option<String>) -> Result<String, BusError> {
    let name = partition.unwrap_or_else(|| DEFAULT_PARTITION.to_string());
    validate_partition_name(&name).map_err(BusError::InvalidPartition)?;
    Ok(name)
}

/// A participant in a domain.
pub struct Participant {
    id: u64,
    domain: Arc<Domain>,
    entities: Mutex<Vec<Box<dyn Entity>>>,
    closed: AtomicBool,
}

impl Participant {
    /// Join a domain.
    #[must_use]
    pub fn new(domain: Arc<Domain>) -> Self {
        let id = domain.next_entity_id();
        debug!(domain = domain.id(), participant = id, "Participant created");
        Self {
            id,
            domain,
            entities: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Participant id, unique within the domain.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The domain this participant belongs to.
    #[must_use]
    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.closed.load(Ordering::Acquire) {
            Err(BusError::Closed("participant"))
        } else {
            Ok(())
        }
    }

    /// Create a writer on `topic`.
    ///
    /// # Errors
    ///
    /// Returns an error if the participant is closed, the partition is
    /// invalid, or the topic exists with another record type.
    pub fn create_writer<T: Record>(
        &self,
        topic: &str,
        options: WriterOptions,
    ) -> Result<Writer<T>, BusError> {
        self.ensure_open()?;
        let partition = resolve_partition(options.partition)?;
        let topic = self.domain.topic::<T>(topic)?;
        let writer = Writer::new(self.domain.next_entity_id(), topic, options.profile, partition);

        self.entities.lock().push(Box::new(writer.clone()));
        Ok(writer)
    }

    /// Create a reader on `topic`. Transient-local readers receive the
    /// topic's durable samples before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the participant is closed, the partition is
    /// invalid, or the topic exists with another record type.
    pub fn create_reader<T: Record>(
        &self,
        topic: &str,
        options: ReaderOptions,
    ) -> Result<Reader<T>, BusError> {
        self.ensure_open()?;
        let partition = resolve_partition(options.partition)?;
        let topic = self.domain.topic::<T>(topic)?;
        let shared = Arc::new(ReaderShared::new(
            self.domain.next_entity_id(),
            options.profile,
            partition,
            options.filter,
        ));
        topic.attach_reader(Arc::clone(&shared));
        let reader = Reader::new(shared, topic);

        self.entities.lock().push(Box::new(reader.clone()));
        Ok(reader)
    }

    /// Close every contained entity. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let entities: Vec<_> = self.entities.lock().drain(..).collect();
        for entity in &entities {
            entity.close();
        }
        info!(
            domain = self.domain.id(),
            participant = self.id,
            entities = entities.len(),
            "Participant closed"
        );
    }

    /// Whether the participant has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for Participant {
    fn drop(&mut self) {
        self.close();
    }
}
