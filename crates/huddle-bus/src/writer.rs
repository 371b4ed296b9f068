//! Writers.

use crate::error::BusError;
use crate::partition::validate_partition_name;
use crate::qos::QosProfile;
use crate::topic::{TopicShared, Unregistered};
use huddle_protocol::Record;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle to a keyed instance registered by a writer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceHandle(String);

impl InstanceHandle {
    /// The instance key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct WriterShared<T> {
    id: u64,
    topic: Arc<TopicShared<T>>,
    profile: QosProfile,
    partition: RwLock<String>,
    registered: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

/// A typed writer attached to a topic.
///
/// Cloning a writer yields another handle to the same writer; instance
/// registrations belong to the writer, not the handle.
pub struct Writer<T: Record> {
    shared: Arc<WriterShared<T>>,
}

impl<T: Record> Clone for Writer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Record> Writer<T> {
    pub(crate) fn new(
        id: u64,
        topic: Arc<TopicShared<T>>,
        profile: QosProfile,
        partition: String,
    ) -> Self {
        Self {
            shared: Arc::new(WriterShared {
                id,
                topic,
                profile,
                partition: RwLock::new(partition),
                registered: Mutex::new(HashSet::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.shared.closed.load(Ordering::Acquire) {
            Err(BusError::Closed("writer"))
        } else {
            Ok(())
        }
    }

    fn instance_key(&self, value: &T) -> Result<String, BusError> {
        value
            .key()
            .map(str::to_owned)
            .ok_or_else(|| BusError::Unkeyed(self.shared.topic.name().to_string()))
    }

    /// Writer id, unique within the domain.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Publish a record in the writer's current partition.
    ///
    /// Keyed records implicitly register their instance with this writer.
    /// Returns the number of readers that accepted the sample.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer is closed.
    pub fn write(&self, value: &T) -> Result<usize, BusError> {
        self.ensure_open()?;
        // Hold the partition for the whole write so a concurrent
        // `set_partition` cannot split it.
        let partition = self.shared.partition.read();
        if let Some(key) = value.key() {
            self.shared.registered.lock().insert(key.to_string());
        }
        Ok(self
            .shared
            .topic
            .write(self.shared.id, value, &partition, &self.shared.profile))
    }

    /// Register the instance of `value` without publishing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer is closed or the record is unkeyed.
    pub fn register_instance(&self, value: &T) -> Result<InstanceHandle, BusError> {
        self.ensure_open()?;
        let key = self.instance_key(value)?;
        let partition = self.shared.partition.read();
        self.shared
            .topic
            .register(self.shared.id, &key, value, &partition);
        self.shared.registered.lock().insert(key.clone());
        Ok(InstanceHandle(key))
    }

    /// Find the handle of an instance this writer has registered.
    #[must_use]
    pub fn lookup_instance(&self, value: &T) -> Option<InstanceHandle> {
        let key = value.key()?;
        self.shared
            .registered
            .lock()
            .contains(key)
            .then(|| InstanceHandle(key.to_string()))
    }

    /// Unregister an instance. Readers observe it as not alive once no
    /// writer holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer is closed or never registered the instance.
    pub fn unregister_instance(&self, handle: &InstanceHandle) -> Result<(), BusError> {
        self.ensure_open()?;
        if !self.shared.registered.lock().remove(handle.key()) {
            return Err(BusError::NotRegistered(handle.key().to_string()));
        }
        match self.shared.topic.unregister(self.shared.id, handle.key()) {
            Unregistered::NotRegistered => Err(BusError::NotRegistered(handle.key().to_string())),
            Unregistered::StillAlive | Unregistered::Disposed => {
                debug!(writer = self.shared.id, instance = %handle, "Instance unregistered");
                Ok(())
            }
        }
    }

    /// Move the writer to another partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer is closed or the name is invalid.
    pub fn set_partition(&self, name: &str) -> Result<(), BusError> {
        self.ensure_open()?;
        validate_partition_name(name).map_err(BusError::InvalidPartition)?;
        *self.shared.partition.write() = name.to_string();
        debug!(writer = self.shared.id, partition = %name, "Writer partition changed");
        Ok(())
    }

    /// Current partition.
    #[must_use]
    pub fn partition(&self) -> String {
        self.shared.partition.read().clone()
    }

    /// Unregister every instance and refuse further writes. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let keys: Vec<String> = self.shared.registered.lock().drain().collect();
        for key in keys {
            if self.shared.topic.unregister(self.shared.id, &key) == Unregistered::NotRegistered {
                warn!(writer = self.shared.id, instance = %key, "Instance vanished before close");
            }
        }
        debug!(writer = self.shared.id, topic = %self.shared.topic.name(), "Writer closed");
    }

    /// Whether the writer has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}
