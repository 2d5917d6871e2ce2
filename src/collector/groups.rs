use crate::config::GroupFilter;
use crate::kafka::{Broker, KafkaCluster};
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// Groups kept by the filter, keyed by the id of their coordinating broker.
#[derive(Debug, Clone, Default)]
pub struct BrokerGroups {
    by_coordinator: HashMap<i32, Vec<String>>,
}

impl BrokerGroups {
    /// Groups coordinated by `broker`, sorted by name.
    pub fn groups_of(&self, broker: &Broker) -> &[String] {
        self.by_coordinator
            .get(&broker.id)
            .map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.by_coordinator.values().map(Vec::len).sum()
    }
}

/// Lists the cluster's groups once per cycle and drops those the filter
/// rejects, before any offset is fetched for them.
#[derive(Debug, Clone, Default)]
pub struct GroupEnumerator {
    filter: GroupFilter,
}

impl GroupEnumerator {
    pub fn new(filter: GroupFilter) -> Self {
        Self { filter }
    }

    /// One group-list request for the whole cluster, split by coordinator.
    ///
    /// Returns the groups plus the number of failures: a failed request
    /// yields no groups, a partial answer keeps what arrived. Both count once.
    pub async fn enumerate<C: KafkaCluster>(&self, client: &C) -> (BrokerGroups, u64) {
        let listed = match client.list_groups().await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(error = %e, "Could not list consumer groups");
                return (BrokerGroups::default(), 1);
            }
        };

        let failures = if listed.complete {
            0
        } else {
            warn!("Group list is missing brokers that did not answer");
            1
        };

        let total = listed.groups.len();
        let mut by_coordinator: HashMap<i32, Vec<String>> = HashMap::new();
        for group in listed.groups {
            if !self.filter.matches(&group) {
                trace!(group = group.name, protocol_type = group.protocol_type, "Group filtered out");
                continue;
            }
            by_coordinator
                .entry(group.coordinator)
                .or_default()
                .push(group.name);
        }
        for names in by_coordinator.values_mut() {
            names.sort_unstable();
        }

        let groups = BrokerGroups { by_coordinator };
        debug!(total, kept = groups.len(), "Enumerated consumer groups");
        (groups, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GroupStateFilter;
    use crate::kafka::mock::MockCluster;
    use regex::Regex;

    fn cluster() -> MockCluster {
        MockCluster::new()
            .with_broker(1)
            .with_broker(2)
            .with_group(1, "billing", "consumer", &[])
            .with_group(1, "billing-replay", "", &[])
            .with_group(1, "connect-sink", "connect", &[])
            .with_group(2, "shipping", "consumer", &[])
    }

    fn enumerator(state: GroupStateFilter, pattern: Option<&str>) -> GroupEnumerator {
        GroupEnumerator::new(GroupFilter {
            state,
            pattern: pattern.map(|p| Regex::new(p).unwrap()),
        })
    }

    #[tokio::test]
    async fn test_groups_split_by_coordinator() {
        let client = cluster();
        let (groups, failures) = GroupEnumerator::default().enumerate(&client).await;

        assert_eq!(failures, 0);
        assert_eq!(groups.groups_of(&client.broker(2)), ["shipping"]);
        assert_eq!(
            groups.groups_of(&client.broker(1)),
            ["billing", "billing-replay", "connect-sink"]
        );
        assert!(groups.groups_of(&client.broker(3)).is_empty());
        assert_eq!(client.group_list_requests(), 1);
    }

    #[tokio::test]
    async fn test_state_filters() {
        let client = cluster();
        let broker = client.broker(1);

        let (all, _) = enumerator(GroupStateFilter::All, None).enumerate(&client).await;
        assert_eq!(all.groups_of(&broker), ["billing", "billing-replay", "connect-sink"]);

        let (active, _) = enumerator(GroupStateFilter::Active, None).enumerate(&client).await;
        assert_eq!(active.groups_of(&broker), ["billing"]);

        let (inactive, _) = enumerator(GroupStateFilter::Inactive, None).enumerate(&client).await;
        assert_eq!(inactive.groups_of(&broker), ["billing-replay", "connect-sink"]);
    }

    #[tokio::test]
    async fn test_pattern_filter() {
        let client = cluster();
        let (groups, _) = enumerator(GroupStateFilter::All, Some("^billing"))
            .enumerate(&client)
            .await;

        assert_eq!(groups.groups_of(&client.broker(1)), ["billing", "billing-replay"]);
        assert!(groups.groups_of(&client.broker(2)).is_empty());
        assert_eq!(groups.len(), 2);
    }

    #[tokio::test]
    async fn test_list_failure_yields_no_groups() {
        let client = cluster().failing_group_list();
        let (groups, failures) = GroupEnumerator::default().enumerate(&client).await;

        assert_eq!(failures, 1);
        assert_eq!(groups.len(), 0);
    }

    #[tokio::test]
    async fn test_partial_list_keeps_answered_brokers() {
        let client = cluster().incomplete_group_list(2);
        let (groups, failures) = GroupEnumerator::default().enumerate(&client).await;

        assert_eq!(failures, 1);
        assert_eq!(groups.groups_of(&client.broker(1)).len(), 3);
        assert!(groups.groups_of(&client.broker(2)).is_empty());
    }
}
