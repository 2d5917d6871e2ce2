pub const METRIC_GROUP_LAG: &str = "kafka_consumer_group_lag";
pub const METRIC_GROUP_CURRENT_OFFSET: &str = "kafka_consumer_group_current_offset";
pub const METRIC_LAG_LOOKUP_DURATION: &str = "kafka_consumer_group_lag_lookup_duration_seconds";

pub const METRIC_FETCH_ERRORS: &str = "kafka_lag_exporter_fetch_errors_total";
pub const METRIC_UP: &str = "kafka_lag_exporter_up";
pub const METRIC_LAST_UPDATE_TIMESTAMP: &str = "kafka_lag_exporter_last_update_timestamp_seconds";

pub const LABEL_GROUP: &str = "group";
pub const LABEL_TOPIC: &str = "topic";
pub const LABEL_PARTITION: &str = "partition";

pub const HELP_GROUP_LAG: &str = "Offset lag (high_watermark - committed) of a consumer group partition";
pub const HELP_GROUP_CURRENT_OFFSET: &str = "Last committed offset of a consumer group partition";
pub const HELP_LAG_LOOKUP_DURATION: &str = "Duration of one lag collection cycle in seconds";
pub const HELP_FETCH_ERRORS: &str =
    "Group listings, offset fetches and high-water mark lookups that failed";
pub const HELP_UP: &str = "1 if the exporter can reach the cluster, 0 otherwise";
pub const HELP_LAST_UPDATE_TIMESTAMP: &str = "Unix timestamp of the last completed collection cycle";

/// Upper bounds of the lookup duration histogram, in seconds.
pub const LAG_LOOKUP_DURATION_BUCKETS: &[f64] =
    &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0, 60.0, 120.0];
