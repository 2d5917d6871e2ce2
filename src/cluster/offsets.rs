use std::collections::BTreeMap;

/// Log-end offsets captured once per cycle: topic -> partition -> high-water mark.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicPartitionOffsets {
    topics: BTreeMap<String, BTreeMap<i32, i64>>,
}

impl TopicPartitionOffsets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a topic even when none of its partitions end up with an offset.
    pub fn add_topic(&mut self, topic: &str) {
        self.topics.entry(topic.to_string()).or_default();
    }

    pub fn insert(&mut self, topic: &str, partition: i32, high_water_mark: i64) {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(partition, high_water_mark);
    }

    pub fn high_water_mark(&self, topic: &str, partition: i32) -> Option<i64> {
        self.topics.get(topic)?.get(&partition).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeMap<i32, i64>)> {
        self.topics.iter().map(|(t, p)| (t.as_str(), p))
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn partition_count(&self) -> usize {
        self.topics.values().map(BTreeMap::len).sum()
    }
}
