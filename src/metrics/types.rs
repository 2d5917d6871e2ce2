use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Gauge,
    Counter,
    Histogram,
}

impl MetricType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
            Self::Histogram => "histogram",
        }
    }
}

#[derive(Debug, Default)]
struct HistogramState {
    /// Non-cumulative count per bucket; cumulated at render time.
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

/// Fixed-bucket histogram of durations in seconds.
#[derive(Debug)]
pub struct Histogram {
    bounds: &'static [f64],
    state: Mutex<HistogramState>,
}

/// Point-in-time copy of a [`Histogram`], with cumulative bucket counts.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

impl Histogram {
    pub fn new(bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            state: Mutex::new(HistogramState {
                counts: vec![0; bounds.len()],
                ..HistogramState::default()
            }),
        }
    }

    pub fn observe(&self, duration: Duration) {
        let seconds = duration.as_secs_f64();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(idx) = self.bounds.iter().position(|&le| seconds <= le) {
            state.counts[idx] += 1;
        }
        state.sum += seconds;
        state.count += 1;
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut cumulative = 0;
        let buckets = self
            .bounds
            .iter()
            .zip(&state.counts)
            .map(|(&le, &n)| {
                cumulative += n;
                (le, cumulative)
            })
            .collect();
        HistogramSnapshot {
            buckets,
            sum: state.sum,
            count: state.count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDS: &[f64] = &[0.5, 1.0, 5.0];

    #[test]
    fn test_buckets_are_cumulative() {
        let histogram = Histogram::new(BOUNDS);
        histogram.observe(Duration::from_millis(100));
        histogram.observe(Duration::from_millis(800));
        histogram.observe(Duration::from_secs(3));
        histogram.observe(Duration::from_secs(60));

        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.buckets, vec![(0.5, 1), (1.0, 2), (5.0, 3)]);
        // The 60s observation only lands in +Inf
        assert_eq!(snapshot.count, 4);
        assert!((snapshot.sum - 63.9).abs() < 1e-9);
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let histogram = Histogram::new(BOUNDS);
        histogram.observe(Duration::from_secs(1));
        assert_eq!(histogram.snapshot().buckets, vec![(0.5, 0), (1.0, 1), (5.0, 1)]);
    }
}
