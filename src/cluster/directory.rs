use crate::cluster::offsets::TopicPartitionOffsets;
use crate::error::Result;
use crate::kafka::{Broker, ClusterMetadata, KafkaCluster};
use futures::StreamExt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, instrument, warn};

/// Topics whose name starts with this marker are cluster-internal.
pub const INTERNAL_TOPIC_PREFIX: &str = "__";

pub fn is_internal_topic(topic: &str) -> bool {
    topic.starts_with(INTERNAL_TOPIC_PREFIX)
}

/// Cached view of brokers and topics, refreshed once per cycle.
///
/// Reads are shared between the per-broker tasks; only the scheduler refreshes.
pub struct ClusterDirectory<C> {
    client: Arc<C>,
    state: RwLock<ClusterMetadata>,
    max_concurrent_watermarks: usize,
}

impl<C: KafkaCluster> ClusterDirectory<C> {
    /// Reads metadata once. Failing here means there is no cluster to observe.
    pub async fn connect(client: Arc<C>, max_concurrent_watermarks: usize) -> Result<Self> {
        let metadata = client.fetch_metadata().await?;
        let metadata = without_internal_topics(metadata);

        info!(
            brokers = metadata.brokers.len(),
            topics = metadata.topics.len(),
            topic_errors = metadata.topic_errors,
            "Connected to cluster"
        );

        Ok(Self {
            client,
            state: RwLock::new(metadata),
            max_concurrent_watermarks: max_concurrent_watermarks.max(1),
        })
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Re-reads metadata and returns the number of failures it met.
    ///
    /// A failed request keeps the previous view and counts once; the next
    /// cycle retries. Topics the cluster reported with an error are left
    /// out of the view and count once each.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> u64 {
        match self.client.fetch_metadata().await {
            Ok(metadata) => {
                let metadata = without_internal_topics(metadata);
                let topic_errors = metadata.topic_errors;
                if topic_errors > 0 {
                    warn!(topic_errors, "Some topics came back from metadata with errors");
                }
                debug!(
                    brokers = metadata.brokers.len(),
                    topics = metadata.topics.len(),
                    "Refreshed cluster metadata"
                );
                *self.state.write().unwrap_or_else(PoisonError::into_inner) = metadata;
                topic_errors
            }
            Err(e) => {
                warn!(error = %e, "Failed to refresh cluster metadata, reusing previous view");
                1
            }
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.read().topics.keys().cloned().collect()
    }

    pub fn partitions_of(&self, topic: &str) -> Vec<i32> {
        self.read().topics.get(topic).cloned().unwrap_or_default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ClusterMetadata> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Latest offset of a partition, `None` (logged) when the lookup fails.
    pub async fn high_water_mark(&self, topic: &str, partition: i32) -> Option<i64> {
        match self.client.high_water_mark(topic, partition).await {
            Ok(offset) => Some(offset),
            Err(e) => {
                warn!(
                    topic = topic,
                    partition = partition,
                    error = %e,
                    "Failed to fetch high-water mark"
                );
                None
            }
        }
    }

    /// Brokers accepting a connection right now. Unreachable brokers are
    /// skipped for this cycle.
    pub async fn live_brokers(&self) -> Vec<Broker> {
        let brokers = self.read().brokers.clone();

        let checks = brokers.into_iter().map(|broker| async move {
            match self.client.check_broker(&broker).await {
                Ok(()) => Some(broker),
                Err(e) => {
                    warn!(
                        broker = %broker,
                        error = %e,
                        "Could not speak to broker, advertised listeners may be incorrect"
                    );
                    None
                }
            }
        });

        futures::future::join_all(checks)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// High-water marks of every partition of every non-internal topic.
    /// Partitions whose lookup fails are left out.
    #[instrument(skip(self))]
    pub async fn snapshot(&self) -> (TopicPartitionOffsets, u64) {
        let layout: Vec<(String, Vec<i32>)> = self
            .topics()
            .into_iter()
            .map(|topic| {
                let partitions = self.partitions_of(&topic);
                (topic, partitions)
            })
            .collect();

        let mut snapshot = TopicPartitionOffsets::new();
        for (topic, partitions) in &layout {
            debug!(topic = topic, partitions = partitions.len(), "Found topic");
            snapshot.add_topic(topic);
        }

        let lookups = layout.iter().flat_map(|(topic, partitions)| {
            partitions.iter().map(move |&partition| async move {
                let offset = self.high_water_mark(topic, partition).await;
                (topic.as_str(), partition, offset)
            })
        })
        .collect::<Vec<_>>();

        let mut failures = 0;
        let mut stream = futures::stream::iter(lookups).buffer_unordered(self.max_concurrent_watermarks);
        while let Some((topic, partition, offset)) = stream.next().await {
            match offset {
                Some(offset) => snapshot.insert(topic, partition, offset),
                None => failures += 1,
            }
        }

        debug!(
            topics = snapshot.topic_count(),
            partitions = snapshot.partition_count(),
            failures,
            "Built high-water mark snapshot"
        );
        (snapshot, failures)
    }
}

fn without_internal_topics(mut metadata: ClusterMetadata) -> ClusterMetadata {
    metadata.topics.retain(|topic, _| !is_internal_topic(topic));
    metadata
}

impl<C> std::fmt::Debug for ClusterDirectory<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterDirectory")
            .field("max_concurrent_watermarks", &self.max_concurrent_watermarks)
            .finish_non_exhaustive()
    }
}
