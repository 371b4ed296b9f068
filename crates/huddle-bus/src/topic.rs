//! Typed topics.
//!
//! A topic fans written samples out to its readers and keeps the durable
//! state late joiners need: the last value of every keyed instance and, for
//! transient-local writers of unkeyed records, a bounded tail of samples.
//!
//! Lock order is always `readers` before `state` before a reader's cache, so
//! writes and reader attachment never interleave: a new reader sees each
//! sample either through replay or through delivery, never both.

use crate::qos::QosProfile;
use crate::reader::{InstanceState, ReaderShared};
use huddle_protocol::Record;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

struct Instance<T> {
    value: T,
    partition: String,
    writers: HashSet<u64>,
    alive: bool,
    last_writer: u64,
}

struct Retained<T> {
    value: T,
    partition: String,
    writer_id: u64,
}

struct TopicState<T> {
    instances: HashMap<String, Instance<T>>,
    retained: VecDeque<Retained<T>>,
}

/// Outcome of unregistering a writer from an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Unregistered {
    /// The writer did not have the instance registered.
    NotRegistered,
    /// Other writers still keep the instance alive.
    StillAlive,
    /// The instance is no longer alive.
    Disposed,
}

pub(crate) struct TopicShared<T> {
    name: String,
    readers: RwLock<Vec<Arc<ReaderShared<T>>>>,
    state: Mutex<TopicState<T>>,
}

impl<T: Record> TopicShared<T> {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            readers: RwLock::new(Vec::new()),
            state: Mutex::new(TopicState {
                instances: HashMap::new(),
                retained: VecDeque::new(),
            }),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    #[cfg(test)]
    pub(crate) fn reader_count(&self) -> usize {
        self.readers.read().len()
    }

    /// Record that `writer_id` owns the instance of `value`, without publishing it.
    pub(crate) fn register(&self, writer_id: u64, key: &str, value: &T, partition: &str) {
        let mut state = self.state.lock();
        let instance = state
            .instances
            .entry(key.to_string())
            .or_insert_with(|| Instance {
                value: value.clone(),
                partition: partition.to_string(),
                writers: HashSet::new(),
                alive: false,
                last_writer: writer_id,
            });
        instance.writers.insert(writer_id);
    }

    /// Write a sample and deliver it to every matching reader.
    ///
    /// Returns the number of readers that accepted the sample.
    pub(crate) fn write(
        &self,
        writer_id: u64,
        value: &T,
        partition: &str,
        profile: &QosProfile,
    ) -> usize {
        let readers = self.readers.read();
        let mut state = self.state.lock();

        match value.key() {
            Some(key) => {
                let instance = state
                    .instances
                    .entry(key.to_string())
                    .or_insert_with(|| Instance {
                        value: value.clone(),
                        partition: partition.to_string(),
                        writers: HashSet::new(),
                        alive: true,
                        last_writer: writer_id,
                    });
                instance.value = value.clone();
                instance.partition = partition.to_string();
                instance.writers.insert(writer_id);
                instance.alive = true;
                instance.last_writer = writer_id;
            }
            None if profile.is_transient_local() => {
                state.retained.push_back(Retained {
                    value: value.clone(),
                    partition: partition.to_string(),
                    writer_id,
                });
                let bound = if profile.history_depth > 0 {
                    profile.history_depth
                } else {
                    profile.max_samples
                };
                while bound > 0 && state.retained.len() > bound {
                    state.retained.pop_front();
                }
            }
            None => {}
        }

        let delivered = readers
            .iter()
            .filter(|r| r.offer(value, partition, InstanceState::Alive, writer_id))
            .count();
        trace!(topic = %self.name, partition = %partition, delivered, "Sample written");
        delivered
    }

    /// Drop `writer_id`'s registration of an instance; the instance becomes
    /// not alive once no writer holds it.
    pub(crate) fn unregister(&self, writer_id: u64, key: &str) -> Unregistered {
        let readers = self.readers.read();
        let mut state = self.state.lock();

        let Some(instance) = state.instances.get_mut(key) else {
            return Unregistered::NotRegistered;
        };
        if !instance.writers.remove(&writer_id) {
            return Unregistered::NotRegistered;
        }
        if !instance.writers.is_empty() {
            return Unregistered::StillAlive;
        }

        let Some(instance) = state.instances.remove(key) else {
            return Unregistered::NotRegistered;
        };
        if instance.alive {
            for reader in readers.iter() {
                reader.offer(
                    &instance.value,
                    &instance.partition,
                    InstanceState::NotAlive,
                    writer_id,
                );
            }
        }
        debug!(topic = %self.name, instance = %key, "Instance no longer alive");
        Unregistered::Disposed
    }

    /// Attach a reader, replaying durable state first if it asks for it.
    pub(crate) fn attach_reader(&self, reader: Arc<ReaderShared<T>>) {
        let mut readers = self.readers.write();

        if reader.profile.is_transient_local() {
            let state = self.state.lock();
            let mut replayed = 0;
            for instance in state.instances.values().filter(|i| i.alive) {
                if reader.offer(
                    &instance.value,
                    &instance.partition,
                    InstanceState::Alive,
                    instance.last_writer,
                ) {
                    replayed += 1;
                }
            }
            for retained in &state.retained {
                if reader.offer(
                    &retained.value,
                    &retained.partition,
                    InstanceState::Alive,
                    retained.writer_id,
                ) {
                    replayed += 1;
                }
            }
            debug!(topic = %self.name, reader = reader.id, replayed, "Replayed durable samples");
        }

        readers.push(reader);
    }

    pub(crate) fn detach_reader(&self, reader_id: u64) {
        self.readers.write().retain(|r| r.id != reader_id);
    }
}
