mod directory;
mod offsets;

pub use directory::{ClusterDirectory, is_internal_topic};
pub use offsets::TopicPartitionOffsets;
