//! The shared domain in which topics live.

use crate::error::BusError;
use crate::qos::QosLibrary;
use crate::topic::TopicShared;
use dashmap::DashMap;
use huddle_protocol::Record;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A publish/subscribe domain.
///
/// Participants created on the same domain see each other's data. Topics are
/// created on first use and typed by their record; using a topic name with a
/// second record type is an error.
pub struct Domain {
    id: u32,
    qos: QosLibrary,
    topics: DashMap<String, Arc<dyn Any + Send + Sync>>,
    next_entity_id: AtomicU64,
}

impl Domain {
    /// Create a domain with the builtin QoS library.
    #[must_use]
    pub fn new(id: u32) -> Arc<Self> {
        Self::with_qos(id, QosLibrary::builtin())
    }

    /// Create a domain with a custom QoS library.
    #[must_use]
    pub fn with_qos(id: u32, qos: QosLibrary) -> Arc<Self> {
        info!(domain = id, library = %qos.name, "Creating domain");
        Arc::new(Self {
            id,
            qos,
            topics: DashMap::new(),
            next_entity_id: AtomicU64::new(1),
        })
    }

    /// Domain id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The QoS library profiles are resolved from.
    #[must_use]
    pub fn qos(&self) -> &QosLibrary {
        &self.qos
    }

    /// Names of all topics created so far.
    #[must_use]
    pub fn topic_names(&self) -> Vec<String> {
        self.topics.iter().map(|e| e.key().clone()).collect()
    }

    pub(crate) fn next_entity_id(&self) -> u64 {
        self.next_entity_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn topic<T: Record>(&self, name: &str) -> Result<Arc<TopicShared<T>>, BusError> {
        let erased = self
            .topics
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(domain = self.id, topic = %name, "Creating topic");
                let topic: Arc<dyn Any + Send + Sync> = Arc::new(TopicShared::<T>::new(name));
                topic
            })
            .clone();

        erased
            .downcast::<TopicShared<T>>()
            .map_err(|_| BusError::TypeMismatch(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::{MessageRecord, UserRecord};

    #[test]
    fn test_topics_are_shared_by_name() {
        let domain = Domain::new(0);
        let a = domain.topic::<UserRecord>("userInfo").unwrap();
        let b = domain.topic::<UserRecord>("userInfo").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(domain.topic_names(), vec!["userInfo".to_string()]);
    }

    #[test]
    fn test_topic_type_mismatch() {
        let domain = Domain::new(0);
        domain.topic::<UserRecord>("userInfo").unwrap();
        assert!(matches!(
            domain.topic::<MessageRecord>("userInfo"),
            Err(BusError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_entity_ids_are_unique() {
        let domain = Domain::new(3);
        assert_eq!(domain.id(), 3);
        assert_ne!(domain.next_entity_id(), domain.next_entity_id());
    }
}
