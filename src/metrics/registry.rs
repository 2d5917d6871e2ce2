use crate::collector::lag_calculator::{LagMeasurement, SeriesKey};
use crate::metrics::definitions::{
    HELP_FETCH_ERRORS, HELP_GROUP_CURRENT_OFFSET, HELP_GROUP_LAG, HELP_LAG_LOOKUP_DURATION,
    HELP_LAST_UPDATE_TIMESTAMP, HELP_UP, LABEL_GROUP, LABEL_PARTITION, LABEL_TOPIC,
    LAG_LOOKUP_DURATION_BUCKETS, METRIC_FETCH_ERRORS, METRIC_GROUP_CURRENT_OFFSET,
    METRIC_GROUP_LAG, METRIC_LAG_LOOKUP_DURATION, METRIC_LAST_UPDATE_TIMESTAMP, METRIC_UP,
};
use crate::metrics::types::{Histogram, MetricType};
use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Gauge series keyed by (topic, group, partition) plus the exporter's own
/// health metrics.
///
/// Series are never expired on their own; the scheduler calls
/// [`MetricsRegistry::reset_series`] to bound cardinality.
pub struct MetricsRegistry {
    lag: DashMap<SeriesKey, i64>,
    current_offset: DashMap<SeriesKey, i64>,
    record_current_offset: bool,
    lookup_duration: Histogram,
    fetch_failures: AtomicU64,
    healthy: AtomicBool,
    cycles_completed: AtomicU64,
    last_update_timestamp: AtomicU64,
}

impl MetricsRegistry {
    pub fn new(record_current_offset: bool) -> Self {
        Self {
            lag: DashMap::new(),
            current_offset: DashMap::new(),
            record_current_offset,
            lookup_duration: Histogram::new(LAG_LOOKUP_DURATION_BUCKETS),
            fetch_failures: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
            cycles_completed: AtomicU64::new(0),
            last_update_timestamp: AtomicU64::new(0),
        }
    }

    pub fn record(&self, measurements: &[LagMeasurement]) {
        for m in measurements {
            self.lag.insert(m.key.clone(), m.lag);
            if self.record_current_offset {
                self.current_offset.insert(m.key.clone(), m.current_offset);
            }
        }
    }

    /// Drops every gauge series. Values reappear as soon as they are measured
    /// again.
    pub fn reset_series(&self) {
        self.lag.clear();
        self.current_offset.clear();
    }

    pub fn observe_lookup_duration(&self, duration: Duration) {
        self.lookup_duration.observe(duration);
    }

    pub fn add_fetch_failures(&self, failures: u64) {
        self.fetch_failures.fetch_add(failures, Ordering::Relaxed);
    }

    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Marks the end of a reported cycle.
    pub fn finish_cycle(&self) {
        let unix_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.last_update_timestamp
            .store(unix_timestamp, Ordering::SeqCst);
        self.cycles_completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::SeqCst)
    }

    pub fn series_count(&self) -> usize {
        self.lag.len()
    }

    #[cfg(test)]
    pub fn lag(&self, key: &SeriesKey) -> Option<i64> {
        self.lag.get(key).map(|v| *v)
    }

    #[cfg(test)]
    pub fn current_offset(&self, key: &SeriesKey) -> Option<i64> {
        self.current_offset.get(key).map(|v| *v)
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        render_gauge_series(&mut output, METRIC_GROUP_LAG, HELP_GROUP_LAG, &self.lag);
        if self.record_current_offset {
            render_gauge_series(
                &mut output,
                METRIC_GROUP_CURRENT_OFFSET,
                HELP_GROUP_CURRENT_OFFSET,
                &self.current_offset,
            );
        }

        let histogram = self.lookup_duration.snapshot();
        write_header(
            &mut output,
            METRIC_LAG_LOOKUP_DURATION,
            HELP_LAG_LOOKUP_DURATION,
            MetricType::Histogram,
        );
        for (le, count) in &histogram.buckets {
            let _ = writeln!(output, "{METRIC_LAG_LOOKUP_DURATION}_bucket{{le=\"{le}\"}} {count}");
        }
        let _ = writeln!(
            output,
            "{METRIC_LAG_LOOKUP_DURATION}_bucket{{le=\"+Inf\"}} {}",
            histogram.count
        );
        let _ = writeln!(output, "{METRIC_LAG_LOOKUP_DURATION}_sum {}", histogram.sum);
        let _ = writeln!(output, "{METRIC_LAG_LOOKUP_DURATION}_count {}", histogram.count);

        write_header(&mut output, METRIC_FETCH_ERRORS, HELP_FETCH_ERRORS, MetricType::Counter);
        let _ = writeln!(output, "{METRIC_FETCH_ERRORS} {}", self.fetch_failures());

        write_header(&mut output, METRIC_UP, HELP_UP, MetricType::Gauge);
        let _ = writeln!(output, "{METRIC_UP} {}", i32::from(self.is_healthy()));

        if self.cycles_completed() > 0 {
            write_header(
                &mut output,
                METRIC_LAST_UPDATE_TIMESTAMP,
                HELP_LAST_UPDATE_TIMESTAMP,
                MetricType::Gauge,
            );
            let _ = writeln!(
                output,
                "{METRIC_LAST_UPDATE_TIMESTAMP} {}",
                self.last_update_timestamp.load(Ordering::SeqCst)
            );
        }

        output
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("series", &self.lag.len())
            .field("record_current_offset", &self.record_current_offset)
            .field("healthy", &self.is_healthy())
            .finish_non_exhaustive()
    }
}

fn write_header(output: &mut String, name: &str, help: &str, metric_type: MetricType) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", metric_type.as_str());
}

/// Renders one gauge family, series sorted by key. Nothing is written for an
/// empty family.
fn render_gauge_series(output: &mut String, name: &str, help: &str, series: &DashMap<SeriesKey, i64>) {
    let mut points: Vec<(SeriesKey, i64)> = series
        .iter()
        .map(|entry| (entry.key().clone(), *entry.value()))
        .collect();
    if points.is_empty() {
        return;
    }
    points.sort_unstable();

    write_header(output, name, help, MetricType::Gauge);
    for (key, value) in points {
        let _ = writeln!(output, "{name}{} {value}", render_labels(&key));
    }
}

fn render_labels(key: &SeriesKey) -> String {
    format!(
        "{{{LABEL_GROUP}=\"{}\",{LABEL_PARTITION}=\"{}\",{LABEL_TOPIC}=\"{}\"}}",
        escape_label_value(&key.group),
        key.partition,
        escape_label_value(&key.topic)
    )
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
