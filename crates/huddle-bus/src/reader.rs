//! Readers and their sample cache.
//!
//! A reader keeps the samples it has received until they are taken. Each
//! sample carries a [`SampleState`] (has it been read yet) and an
//! [`InstanceState`] (is the keyed instance still alive). Operations select
//! samples with a [`DataState`] mask:
//!
//! - `read` returns matching samples and marks them read
//! - `take` returns matching samples and removes them
//! - `peek` returns matching samples without touching their state

use crate::error::BusError;
use crate::filter::ContentFilter;
use crate::partition::validate_partition_name;
use crate::qos::QosProfile;
use crate::topic::TopicShared;
use crate::waitset::ReadCondition;
use huddle_protocol::Record;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

/// Whether a sample has been returned by a `read` yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleState {
    /// Not yet read.
    NotRead,
    /// Returned by a previous `read`.
    Read,
}

/// Liveliness of the instance a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// At least one writer has the instance registered.
    Alive,
    /// The last registered writer unregistered the instance or closed.
    NotAlive,
}

/// Selection mask over sample and instance state. `None` matches any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataState {
    /// Required sample state.
    pub sample: Option<SampleState>,
    /// Required instance state.
    pub instance: Option<InstanceState>,
}

impl DataState {
    /// Match every sample.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            sample: None,
            instance: None,
        }
    }

    /// Match samples not read yet.
    #[must_use]
    pub const fn not_read() -> Self {
        Self {
            sample: Some(SampleState::NotRead),
            instance: None,
        }
    }

    /// Additionally require the instance to be alive.
    #[must_use]
    pub const fn alive(mut self) -> Self {
        self.instance = Some(InstanceState::Alive);
        self
    }

    /// Additionally require the instance to be not alive.
    #[must_use]
    pub const fn not_alive(mut self) -> Self {
        self.instance = Some(InstanceState::NotAlive);
        self
    }

    fn matches(&self, info: &SampleInfo) -> bool {
        self.sample.map_or(true, |s| s == info.sample_state)
            && self.instance.map_or(true, |i| i == info.instance_state)
    }
}

/// Metadata delivered with each sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleInfo {
    /// Sample state at the time of the operation.
    pub sample_state: SampleState,
    /// Instance state at the time of the operation.
    pub instance_state: InstanceState,
    /// Id of the writer that produced the sample.
    pub writer_id: u64,
}

/// A record together with its sample info.
#[derive(Debug, Clone)]
pub struct Sample<T> {
    /// The record.
    pub data: T,
    /// Sample metadata.
    pub info: SampleInfo,
}

struct ReaderState<T> {
    partition: String,
    filter: Option<ContentFilter>,
    cache: VecDeque<Sample<T>>,
}

pub(crate) struct ReaderShared<T> {
    pub(crate) id: u64,
    pub(crate) profile: QosProfile,
    state: Mutex<ReaderState<T>>,
    signal: Notify,
    closed: AtomicBool,
}

impl<T: Record> ReaderShared<T> {
    pub(crate) fn new(
        id: u64,
        profile: QosProfile,
        partition: String,
        filter: Option<ContentFilter>,
    ) -> Self {
        Self {
            id,
            profile,
            state: Mutex::new(ReaderState {
                partition,
                filter,
                cache: VecDeque::new(),
            }),
            signal: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Offer a sample written in `partition`.
    ///
    /// Returns `true` if the sample was accepted into the cache.
    pub(crate) fn offer(
        &self,
        data: &T,
        partition: &str,
        instance_state: InstanceState,
        writer_id: u64,
    ) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        let mut state = self.state.lock();
        if state.partition != partition {
            return false;
        }

        let key = data.key().map(str::to_owned);
        match (instance_state, key.as_deref()) {
            // Liveliness changes only concern instances this reader knows about.
            (InstanceState::NotAlive, Some(key)) => {
                if !state.cache.iter().any(|s| s.data.key() == Some(key)) {
                    return false;
                }
                state.cache.retain(|s| s.data.key() != Some(key));
            }
            (InstanceState::NotAlive, None) => return false,
            (InstanceState::Alive, key) => {
                if let Some(filter) = &state.filter {
                    if !filter.matches(data) {
                        trace!(reader = self.id, "Sample rejected by content filter");
                        return false;
                    }
                }
                // Depth bounds keyed instances only; an unkeyed stream is one
                // sequence, bounded by max_samples alone.
                if let Some(key) = key {
                    self.apply_history_depth(&mut state.cache, key);
                }
            }
        }

        if self.profile.max_samples > 0 && state.cache.len() >= self.profile.max_samples {
            if let Some(evicted) = state.cache.pop_front() {
                if evicted.info.sample_state == SampleState::NotRead {
                    warn!(
                        reader = self.id,
                        max_samples = self.profile.max_samples,
                        "Reader cache full, dropped an unread sample"
                    );
                }
            }
        }

        state.cache.push_back(Sample {
            data: data.clone(),
            info: SampleInfo {
                sample_state: SampleState::NotRead,
                instance_state,
                writer_id,
            },
        });
        drop(state);

        self.signal.notify_one();
        true
    }

    fn apply_history_depth(&self, cache: &mut VecDeque<Sample<T>>, key: &str) {
        let depth = self.profile.history_depth;
        if depth == 0 {
            return;
        }

        let held = cache.iter().filter(|s| s.data.key() == Some(key)).count();
        for _ in depth.saturating_sub(1)..held {
            if let Some(pos) = cache.iter().position(|s| s.data.key() == Some(key)) {
                cache.remove(pos);
            }
        }
    }

    pub(crate) fn has_matching(&self, mask: DataState) -> bool {
        self.state.lock().cache.iter().any(|s| mask.matches(&s.info))
    }

    pub(crate) fn signal(&self) -> &Notify {
        &self.signal
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A typed reader attached to a topic.
///
/// Cloning a reader yields another handle to the same cache.
pub struct Reader<T: Record> {
    shared: Arc<ReaderShared<T>>,
    topic: Arc<TopicShared<T>>,
}

impl<T: Record> Clone for Reader<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            topic: Arc::clone(&self.topic),
        }
    }
}

impl<T: Record> Reader<T> {
    pub(crate) fn new(shared: Arc<ReaderShared<T>>, topic: Arc<TopicShared<T>>) -> Self {
        Self { shared, topic }
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.shared.is_closed() {
            Err(BusError::Closed("reader"))
        } else {
            Ok(())
        }
    }

    /// Reader id, unique within the domain.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Name of the topic this reader is attached to.
    #[must_use]
    pub fn topic_name(&self) -> &str {
        self.topic.name()
    }

    /// Return samples matching `mask` and mark them read.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader is closed.
    pub fn read(&self, mask: DataState) -> Result<Vec<Sample<T>>, BusError> {
        self.ensure_open()?;
        let mut state = self.shared.state.lock();
        let samples = state
            .cache
            .iter_mut()
            .filter(|s| mask.matches(&s.info))
            .map(|s| {
                let sample = s.clone();
                s.info.sample_state = SampleState::Read;
                sample
            })
            .collect();
        Ok(samples)
    }

    /// Return samples matching `mask` and remove them from the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader is closed.
    pub fn take(&self, mask: DataState) -> Result<Vec<Sample<T>>, BusError> {
        self.ensure_open()?;
        let mut state = self.shared.state.lock();
        let (taken, kept): (VecDeque<_>, VecDeque<_>) =
            state.cache.drain(..).partition(|s| mask.matches(&s.info));
        state.cache = kept;
        Ok(taken.into())
    }

    /// Return samples matching `mask` without changing their state.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader is closed.
    pub fn peek(&self, mask: DataState) -> Result<Vec<Sample<T>>, BusError> {
        self.ensure_open()?;
        let state = self.shared.state.lock();
        Ok(state
            .cache
            .iter()
            .filter(|s| mask.matches(&s.info))
            .cloned()
            .collect())
    }

    /// Like [`read`](Self::read), returning only the records.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader is closed.
    pub fn read_data(&self, mask: DataState) -> Result<Vec<T>, BusError> {
        Ok(self.read(mask)?.into_iter().map(|s| s.data).collect())
    }

    /// Like [`take`](Self::take), returning only the records.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader is closed.
    pub fn take_data(&self, mask: DataState) -> Result<Vec<T>, BusError> {
        Ok(self.take(mask)?.into_iter().map(|s| s.data).collect())
    }

    /// Current partition.
    #[must_use]
    pub fn partition(&self) -> String {
        self.shared.state.lock().partition.clone()
    }

    /// Current content filter parameters, if a filter is installed.
    #[must_use]
    pub fn filter_parameters(&self) -> Option<Vec<String>> {
        self.shared
            .state
            .lock()
            .filter
            .as_ref()
            .map(|f| f.parameters().to_vec())
    }

    /// Atomically switch partition and/or filter parameters.
    ///
    /// Samples offered after this call are matched against the new settings
    /// only; samples already cached are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader is closed, the partition name is
    /// invalid, or parameters are given but the reader has no filter or the
    /// parameters do not fit it. On error nothing is changed.
    pub fn reconfigure(
        &self,
        partition: Option<&str>,
        parameters: Option<Vec<String>>,
    ) -> Result<(), BusError> {
        self.ensure_open()?;
        if let Some(name) = partition {
            validate_partition_name(name).map_err(BusError::InvalidPartition)?;
        }

        let mut state = self.shared.state.lock();
        let filter = match (parameters, &state.filter) {
            (Some(params), Some(current)) => {
                let mut filter = current.clone();
                filter.set_parameters(params)?;
                Some(filter)
            }
            (Some(_), None) => {
                return Err(BusError::InvalidFilter(
                    "reader has no content filter".into(),
                ))
            }
            (None, _) => None,
        };

        if let Some(name) = partition {
            state.partition = name.to_string();
        }
        if let Some(filter) = filter {
            state.filter = Some(filter);
        }

        debug!(
            reader = self.shared.id,
            partition = %state.partition,
            "Reader reconfigured"
        );
        Ok(())
    }

    /// A condition that triggers while samples matching `mask` are cached.
    #[must_use]
    pub fn read_condition(&self, mask: DataState) -> ReadCondition<T> {
        ReadCondition::new(Arc::clone(&self.shared), mask)
    }

    /// Detach from the topic and drop cached samples. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.topic.detach_reader(self.shared.id);
        self.shared.state.lock().cache.clear();
        // Wake a waiter so it can observe the closed reader.
        self.shared.signal.notify_one();
        debug!(reader = self.shared.id, topic = %self.topic.name(), "Reader closed");
    }

    /// Whether the reader has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::{MessageRecord, UserRecord};

    fn user_reader(depth: usize) -> ReaderShared<UserRecord> {
        let profile = QosProfile {
            history_depth: depth,
            ..QosProfile::default()
        };
        ReaderShared::new(1, profile, String::new(), None)
    }

    fn cached<T: Record>(shared: &ReaderShared<T>) -> Vec<Sample<T>> {
        shared.state.lock().cache.iter().cloned().collect()
    }

    #[test]
    fn test_data_state_masks() {
        let info = SampleInfo {
            sample_state: SampleState::NotRead,
            instance_state: InstanceState::Alive,
            writer_id: 1,
        };
        assert!(DataState::any().matches(&info));
        assert!(DataState::not_read().matches(&info));
        assert!(DataState::not_read().alive().matches(&info));
        assert!(!DataState::any().not_alive().matches(&info));
    }

    #[test]
    fn test_keyed_history_depth_replaces_instance() {
        let reader = user_reader(1);

        assert!(reader.offer(&UserRecord::new("alice", "teamA"), "", InstanceState::Alive, 1));
        assert!(reader.offer(&UserRecord::new("bob", "teamA"), "", InstanceState::Alive, 1));
        assert!(reader.offer(&UserRecord::new("alice", "teamB"), "", InstanceState::Alive, 1));

        let samples = cached(&reader);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].data.username, "bob");
        assert_eq!(samples[1].data.group, "teamB");
    }

    #[test]
    fn test_not_alive_replaces_known_instance_only() {
        let reader = user_reader(1);
        let alice = UserRecord::new("alice", "teamA");

        // Unknown instance: nothing to report
        assert!(!reader.offer(&alice, "", InstanceState::NotAlive, 1));

        assert!(reader.offer(&alice, "", InstanceState::Alive, 1));
        assert!(reader.offer(&alice, "", InstanceState::NotAlive, 1));

        let samples = cached(&reader);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].info.instance_state, InstanceState::NotAlive);
        assert_eq!(samples[0].info.sample_state, SampleState::NotRead);
    }

    #[test]
    fn test_partition_and_filter_checks() {
        let filter =
            ContentFilter::new("toUser = %0 OR toGroup = %1", vec!["bob".into(), "teamA".into()])
                .unwrap();
        let profile = QosProfile {
            history_depth: 0,
            ..QosProfile::default()
        };
        let reader = ReaderShared::new(7, profile, "teamA".into(), Some(filter));

        let group = MessageRecord::group("alice", "teamA", "hi");
        let direct = MessageRecord::direct("alice", "bob", "hi");
        let other = MessageRecord::direct("alice", "carol", "hi");

        assert!(reader.offer(&group, "teamA", InstanceState::Alive, 1));
        assert!(reader.offer(&direct, "teamA", InstanceState::Alive, 1));
        assert!(!reader.offer(&other, "teamA", InstanceState::Alive, 1));
        assert!(!reader.offer(&group, "teamB", InstanceState::Alive, 1));
        assert_eq!(cached(&reader).len(), 2);
    }

    #[test]
    fn test_unkeyed_stream_ignores_depth() {
        let profile = QosProfile {
            history_depth: 3,
            max_samples: 0,
            ..QosProfile::default()
        };
        let reader = ReaderShared::new(1, profile, String::new(), None);
        for i in 0..150 {
            let msg = MessageRecord::group("alice", "", format!("m{i}"));
            assert!(reader.offer(&msg, "", InstanceState::Alive, 1));
        }
        let texts: Vec<_> = cached(&reader).into_iter().map(|s| s.data.message).collect();
        assert_eq!(texts.len(), 150);
        assert_eq!(texts[0], "m0");
        assert_eq!(texts[149], "m149");
    }

    #[test]
    fn test_unkeyed_max_samples() {
        let profile = QosProfile {
            history_depth: 0,
            max_samples: 2,
            ..QosProfile::default()
        };
        let reader = ReaderShared::new(2, profile, String::new(), None);
        for i in 0..4 {
            let msg = MessageRecord::group("alice", "", format!("m{i}"));
            reader.offer(&msg, "", InstanceState::Alive, 1);
        }
        let texts: Vec<_> = cached(&reader).into_iter().map(|s| s.data.message).collect();
        assert_eq!(texts, vec!["m2", "m3"]);
    }
}
