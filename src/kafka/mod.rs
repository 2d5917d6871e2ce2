//! Kafka client contract used by the collector, plus its rdkafka implementation.
//!
//! Everything above this module talks to the cluster through [`KafkaCluster`],
//! which keeps the collection logic independent of the wire client.

pub mod client;
#[cfg(test)]
pub mod mock;
pub mod sasl;

use crate::error::Result;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub use client::RdKafkaCluster;

/// Committed offset reported when a group has no position on a partition.
pub const NO_COMMITTED_OFFSET: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

/// A cluster member as advertised in metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Broker {
    pub id: i32,
    pub host: String,
    pub port: u16,
}

impl Broker {
    pub fn new(id: i32, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            host: host.into(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (id {})", self.host, self.port, self.id)
    }
}

/// A consumer group as returned by a group-list request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupListing {
    pub name: String,
    pub protocol_type: String,
    /// Id of the broker coordinating the group.
    pub coordinator: i32,
}

/// Answer to one cluster-wide group-list request.
#[derive(Debug, Clone, Default)]
pub struct GroupList {
    pub groups: Vec<GroupListing>,
    /// `false` when some brokers did not answer in time; their groups are
    /// missing from `groups`.
    pub complete: bool,
}

/// Brokers and topic layout read from cluster metadata.
#[derive(Debug, Clone, Default)]
pub struct ClusterMetadata {
    pub brokers: Vec<Broker>,
    pub topics: BTreeMap<String, Vec<i32>>,
    /// Topics left out of `topics` because their metadata carried an error.
    pub topic_errors: u64,
}

/// Shape of an offset-fetch request.
#[derive(Debug, Clone, Copy)]
pub enum OffsetFetchScope<'a> {
    /// Name every partition explicitly. Partitions without a commit come
    /// back as [`NO_COMMITTED_OFFSET`].
    Partitions(&'a [TopicPartition]),
    /// Ask for whatever the group has committed.
    AllCommitted,
}

/// Operations the collector needs from a Kafka client.
#[async_trait::async_trait]
pub trait KafkaCluster: Send + Sync + 'static {
    /// Re-read brokers and topics from the cluster.
    async fn fetch_metadata(&self) -> Result<ClusterMetadata>;

    /// Succeeds when the broker accepts a connection right now.
    async fn check_broker(&self, broker: &Broker) -> Result<()>;

    /// Log-end offset of one partition.
    async fn high_water_mark(&self, topic: &str, partition: i32) -> Result<i64>;

    /// Every group of the cluster, tagged with its coordinator.
    async fn list_groups(&self) -> Result<GroupList>;

    /// Committed offsets of `group`. Negative offsets are normalized to
    /// [`NO_COMMITTED_OFFSET`].
    async fn fetch_committed_offsets(
        &self,
        broker: &Broker,
        group: &str,
        scope: OffsetFetchScope<'_>,
    ) -> Result<HashMap<TopicPartition, i64>>;
}
