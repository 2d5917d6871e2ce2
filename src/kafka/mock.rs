//! In-memory [`KafkaCluster`] used by collector and scheduler tests.

use crate::error::{LagError, Result};
use crate::kafka::{
    Broker, ClusterMetadata, GroupList, GroupListing, KafkaCluster, NO_COMMITTED_OFFSET, OffsetFetchScope,
    TopicPartition,
};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone)]
struct MockGroup {
    listing: GroupListing,
    offsets: HashMap<TopicPartition, i64>,
}

#[derive(Debug, Default)]
struct MockState {
    brokers: Vec<Broker>,
    unreachable: HashSet<i32>,
    group_list_down: bool,
    silent_coordinators: HashSet<i32>,
    broken_topic_metadata: HashSet<String>,
    failing_offset_groups: HashSet<String>,
    failing_watermarks: HashSet<TopicPartition>,
    metadata_down: bool,
    topics: BTreeMap<String, BTreeMap<i32, i64>>,
    groups: Vec<MockGroup>,
}

#[derive(Debug, Default)]
pub struct MockCluster {
    state: Mutex<MockState>,
    offset_requests: AtomicUsize,
    watermark_requests: AtomicUsize,
    group_list_requests: AtomicUsize,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_broker(self, id: i32) -> Self {
        self.state()
            .brokers
            .push(Broker::new(id, format!("kafka-{id}"), 9092));
        self
    }

    pub fn with_partition(self, topic: &str, partition: i32, high_water_mark: i64) -> Self {
        self.state()
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(partition, high_water_mark);
        self
    }

    /// Register a group coordinated by `broker` with committed offsets
    /// given as `(topic, partition, offset)`.
    pub fn with_group(
        self,
        broker: i32,
        name: &str,
        protocol_type: &str,
        offsets: &[(&str, i32, i64)],
    ) -> Self {
        self.state().groups.push(MockGroup {
            listing: GroupListing {
                name: name.to_string(),
                protocol_type: protocol_type.to_string(),
                coordinator: broker,
            },
            offsets: offsets
                .iter()
                .map(|(t, p, o)| (TopicPartition::new(*t, *p), *o))
                .collect(),
        });
        self
    }

    pub fn unreachable(self, broker: i32) -> Self {
        self.state().unreachable.insert(broker);
        self
    }

    pub fn failing_group_list(self) -> Self {
        self.state().group_list_down = true;
        self
    }

    /// Group listings come back partial: groups coordinated by `broker` are
    /// missing.
    pub fn incomplete_group_list(self, broker: i32) -> Self {
        self.state().silent_coordinators.insert(broker);
        self
    }

    /// Metadata for `topic` carries an error, so the topic is left out.
    pub fn broken_topic_metadata(self, topic: &str) -> Self {
        self.state().broken_topic_metadata.insert(topic.to_string());
        self
    }

    pub fn failing_offsets(self, group: &str) -> Self {
        self.state().failing_offset_groups.insert(group.to_string());
        self
    }

    pub fn failing_watermark(self, topic: &str, partition: i32) -> Self {
        self.state()
            .failing_watermarks
            .insert(TopicPartition::new(topic, partition));
        self
    }

    pub fn set_high_water_mark(&self, topic: &str, partition: i32, high_water_mark: i64) {
        self.state()
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(partition, high_water_mark);
    }

    pub fn remove_group(&self, name: &str) {
        self.state().groups.retain(|g| g.listing.name != name);
    }

    pub fn set_metadata_down(&self, down: bool) {
        self.state().metadata_down = down;
    }

    pub fn offset_requests(&self) -> usize {
        self.offset_requests.load(Ordering::SeqCst)
    }

    pub fn watermark_requests(&self) -> usize {
        self.watermark_requests.load(Ordering::SeqCst)
    }

    pub fn group_list_requests(&self) -> usize {
        self.group_list_requests.load(Ordering::SeqCst)
    }

    pub fn broker(&self, id: i32) -> Broker {
        Broker::new(id, format!("kafka-{id}"), 9092)
    }
}

#[async_trait::async_trait]
impl KafkaCluster for MockCluster {
    async fn fetch_metadata(&self) -> Result<ClusterMetadata> {
        let state = self.state();
        if state.metadata_down {
            return Err(LagError::Kafka(KafkaError::MetadataFetch(
                RDKafkaErrorCode::BrokerTransportFailure,
            )));
        }
        let topics = state
            .topics
            .iter()
            .filter(|(t, _)| !state.broken_topic_metadata.contains(*t))
            .map(|(t, parts)| (t.clone(), parts.keys().copied().collect()))
            .collect();
        let topic_errors = state
            .topics
            .keys()
            .filter(|t| state.broken_topic_metadata.contains(*t))
            .count();
        Ok(ClusterMetadata {
            brokers: state.brokers.clone(),
            topics,
            topic_errors: topic_errors as u64,
        })
    }

    async fn check_broker(&self, broker: &Broker) -> Result<()> {
        if self.state().unreachable.contains(&broker.id) {
            return Err(LagError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("{} refused the connection", broker.address()),
            )));
        }
        Ok(())
    }

    async fn high_water_mark(&self, topic: &str, partition: i32) -> Result<i64> {
        self.watermark_requests.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state
            .failing_watermarks
            .contains(&TopicPartition::new(topic, partition))
        {
            return Err(LagError::Kafka(KafkaError::MetadataFetch(
                RDKafkaErrorCode::NotLeaderForPartition,
            )));
        }
        state
            .topics
            .get(topic)
            .and_then(|parts| parts.get(&partition))
            .copied()
            .ok_or(LagError::Kafka(KafkaError::MetadataFetch(
                RDKafkaErrorCode::UnknownTopicOrPartition,
            )))
    }

    async fn list_groups(&self) -> Result<GroupList> {
        self.group_list_requests.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state.group_list_down {
            return Err(LagError::Kafka(KafkaError::GroupListFetch(
                RDKafkaErrorCode::BrokerTransportFailure,
            )));
        }
        Ok(GroupList {
            groups: state
                .groups
                .iter()
                .filter(|g| !state.silent_coordinators.contains(&g.listing.coordinator))
                .map(|g| g.listing.clone())
                .collect(),
            complete: state.silent_coordinators.is_empty(),
        })
    }

    async fn fetch_committed_offsets(
        &self,
        _broker: &Broker,
        group: &str,
        scope: OffsetFetchScope<'_>,
    ) -> Result<HashMap<TopicPartition, i64>> {
        self.offset_requests.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state.failing_offset_groups.contains(group) {
            return Err(LagError::Admin(format!("Group {group} offsets unavailable")));
        }
        let committed = state
            .groups
            .iter()
            .find(|g| g.listing.name == group)
            .map(|g| g.offsets.clone())
            .unwrap_or_default();

        Ok(match scope {
            OffsetFetchScope::Partitions(partitions) => partitions
                .iter()
                .map(|tp| {
                    let offset = committed.get(tp).copied().unwrap_or(NO_COMMITTED_OFFSET);
                    (tp.clone(), offset)
                })
                .collect(),
            OffsetFetchScope::AllCommitted => committed,
        })
    }
}
