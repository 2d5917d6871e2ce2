use crate::cluster::{ClusterDirectory, TopicPartitionOffsets, is_internal_topic};
use crate::collector::groups::{BrokerGroups, GroupEnumerator};
use crate::collector::lag_calculator::{LagCalculator, LagMeasurement};
use crate::config::FetchProtocol;
use crate::kafka::{Broker, KafkaCluster, OffsetFetchScope, TopicPartition};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// How high-water marks are obtained during a cycle.
#[derive(Debug, Clone)]
pub enum OffsetPlan {
    /// High-water marks of every known partition, read up front.
    Compat(TopicPartitionOffsets),
    /// High-water marks are looked up for committed partitions only.
    Optimized,
}

/// Per-cycle input of a collection, built by [`OffsetCollector::prepare_cycle`].
#[derive(Debug, Clone)]
pub struct CyclePlan {
    pub groups: BrokerGroups,
    pub offsets: OffsetPlan,
}

/// Result of collecting one broker.
#[derive(Debug, Default)]
pub struct BrokerCollection {
    pub measurements: Vec<LagMeasurement>,
    /// Offset fetches and high-water-mark lookups that failed.
    pub failures: u64,
}

/// Fetches committed offsets for every group of a broker and turns them into
/// lag measurements, using the protocol chosen at startup.
pub struct OffsetCollector<C> {
    directory: Arc<ClusterDirectory<C>>,
    enumerator: GroupEnumerator,
    protocol: FetchProtocol,
}

impl<C: KafkaCluster> OffsetCollector<C> {
    pub fn new(
        directory: Arc<ClusterDirectory<C>>,
        enumerator: GroupEnumerator,
        protocol: FetchProtocol,
    ) -> Self {
        Self {
            directory,
            enumerator,
            protocol,
        }
    }

    pub fn directory(&self) -> &Arc<ClusterDirectory<C>> {
        &self.directory
    }

    pub fn protocol(&self) -> FetchProtocol {
        self.protocol
    }

    /// Builds the plan for one cycle plus the number of failed lookups.
    ///
    /// Groups are listed once for the whole cluster here; each broker then
    /// collects only the groups it coordinates.
    pub async fn prepare_cycle(&self) -> (CyclePlan, u64) {
        let (groups, mut failures) = self
            .enumerator
            .enumerate(self.directory.client().as_ref())
            .await;

        let offsets = match self.protocol {
            FetchProtocol::Compat => {
                let (snapshot, snapshot_failures) = self.directory.snapshot().await;
                failures += snapshot_failures;
                OffsetPlan::Compat(snapshot)
            }
            FetchProtocol::Optimized => OffsetPlan::Optimized,
        };

        (CyclePlan { groups, offsets }, failures)
    }

    #[instrument(skip(self, broker, plan), fields(broker = %broker))]
    pub async fn collect(&self, broker: &Broker, plan: &CyclePlan) -> BrokerCollection {
        let mut collection = BrokerCollection::default();
        let groups = plan.groups.groups_of(broker);

        for group in groups {
            match &plan.offsets {
                OffsetPlan::Compat(snapshot) => {
                    self.collect_group_compat(broker, group, snapshot, &mut collection)
                        .await;
                }
                OffsetPlan::Optimized => {
                    self.collect_group_optimized(broker, group, &mut collection)
                        .await;
                }
            }
        }

        debug!(
            groups = groups.len(),
            measurements = collection.measurements.len(),
            failures = collection.failures,
            "Collected broker"
        );
        collection
    }

    /// One request per topic, naming every partition of the snapshot.
    async fn collect_group_compat(
        &self,
        broker: &Broker,
        group: &str,
        snapshot: &TopicPartitionOffsets,
        collection: &mut BrokerCollection,
    ) {
        let client = self.directory.client();

        for (topic, partitions) in snapshot.iter() {
            if partitions.is_empty() {
                continue;
            }

            let request: Vec<TopicPartition> = partitions
                .keys()
                .map(|&p| TopicPartition::new(topic, p))
                .collect();

            let committed = match client
                .fetch_committed_offsets(broker, group, OffsetFetchScope::Partitions(&request))
                .await
            {
                Ok(committed) => committed,
                Err(e) => {
                    warn!(group = group, topic = topic, error = %e, "Could not get offsets");
                    collection.failures += 1;
                    continue;
                }
            };

            for (tp, offset) in sorted(committed) {
                debug!(
                    group = group,
                    topic = tp.topic,
                    partition = tp.partition,
                    offset = offset,
                    "Discovered group offset"
                );
                let Some(high_water_mark) = snapshot.high_water_mark(&tp.topic, tp.partition)
                else {
                    continue;
                };
                collection.measurements.extend(LagCalculator::measure(
                    &tp.topic,
                    group,
                    tp.partition,
                    high_water_mark,
                    offset,
                ));
            }
        }
    }

    /// One request per group; high-water marks are read for committed
    /// partitions only.
    async fn collect_group_optimized(
        &self,
        broker: &Broker,
        group: &str,
        collection: &mut BrokerCollection,
    ) {
        let committed = match self
            .directory
            .client()
            .fetch_committed_offsets(broker, group, OffsetFetchScope::AllCommitted)
            .await
        {
            Ok(committed) => committed,
            Err(e) => {
                warn!(group = group, error = %e, "Could not get offsets");
                collection.failures += 1;
                return;
            }
        };

        for (tp, offset) in sorted(committed) {
            debug!(
                group = group,
                topic = tp.topic,
                partition = tp.partition,
                offset = offset,
                "Discovered group offset"
            );
            if offset < 0 || is_internal_topic(&tp.topic) {
                continue;
            }
            let Some(high_water_mark) = self.directory.high_water_mark(&tp.topic, tp.partition).await
            else {
                collection.failures += 1;
                continue;
            };
            collection.measurements.extend(LagCalculator::measure(
                &tp.topic,
                group,
                tp.partition,
                high_water_mark,
                offset,
            ));
        }
    }
}

fn sorted(
    committed: impl IntoIterator<Item = (TopicPartition, i64)>,
) -> BTreeMap<TopicPartition, i64> {
    committed.into_iter().collect()
}

impl<C> std::fmt::Debug for OffsetCollector<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffsetCollector")
            .field("protocol", &self.protocol)
            .field("enumerator", &self.enumerator)
            .finish_non_exhaustive()
    }
}
