use crate::collector::offset_collector::OffsetCollector;
use crate::config::ExporterConfig;
use crate::kafka::KafkaCluster;
use crate::metrics::registry::MetricsRegistry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// Consecutive cycles without a reachable broker before `up` drops to 0.
const UNREACHABLE_CYCLES_BEFORE_DOWN: u32 = 3;

/// Decides when every gauge series is dropped so that vanished groups stop
/// being exported.
///
/// The counter starts at zero. A cycle that finds it at or above the
/// threshold resets the series and zeroes it, and every cycle then
/// increments it.
#[derive(Debug, Clone)]
pub struct SeriesResetGuard {
    threshold: u32,
    cycles: u32,
}

impl SeriesResetGuard {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            cycles: 0,
        }
    }

    /// Called exactly once per cycle.
    pub fn should_reset(&mut self) -> bool {
        let reset = self.cycles >= self.threshold;
        if reset {
            self.cycles = 0;
        }
        self.cycles += 1;
        reset
    }
}

/// Drives the fixed-interval collection loop: one task per live broker per
/// cycle, joined before anything is reported.
pub struct CollectionScheduler<C> {
    collector: Arc<OffsetCollector<C>>,
    registry: Arc<MetricsRegistry>,
    poll_interval: Duration,
    reset_guard: SeriesResetGuard,
    unreachable_cycles: u32,
}

impl<C: KafkaCluster> CollectionScheduler<C> {
    pub fn new(
        collector: Arc<OffsetCollector<C>>,
        registry: Arc<MetricsRegistry>,
        config: &ExporterConfig,
    ) -> Self {
        Self {
            collector,
            registry,
            poll_interval: config.poll_interval,
            reset_guard: SeriesResetGuard::new(config.series_reset_cycles),
            unreachable_cycles: 0,
        }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            poll_interval = ?self.poll_interval,
            protocol = ?self.collector.protocol(),
            "Starting collection loop"
        );

        loop {
            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {
                    self.collect_once().await;
                }
                _ = shutdown.recv() => {
                    info!("Collection loop shutting down");
                    break;
                }
            }
        }
    }

    /// Runs one full cycle: refresh, fan out per broker, join, report.
    #[instrument(skip(self))]
    pub async fn collect_once(&mut self) {
        let start = Instant::now();
        let directory = Arc::clone(self.collector.directory());

        let mut failures = directory.refresh().await;
        let (plan, plan_failures) = self.collector.prepare_cycle().await;
        failures += plan_failures;
        let brokers = directory.live_brokers().await;
        self.track_reachability(brokers.len());

        let plan = Arc::new(plan);
        let tasks = brokers.into_iter().map(|broker| {
            let collector = Arc::clone(&self.collector);
            let plan = Arc::clone(&plan);
            tokio::spawn(async move { collector.collect(&broker, &plan).await })
        });

        let mut measurements = Vec::new();
        for result in futures::future::join_all(tasks).await {
            match result {
                Ok(collection) => {
                    failures += collection.failures;
                    measurements.extend(collection.measurements);
                }
                Err(e) => {
                    error!(error = %e, "Broker collection task failed");
                }
            }
        }

        if self.reset_guard.should_reset() {
            info!(
                series = self.registry.series_count(),
                "Resetting lag series"
            );
            self.registry.reset_series();
        }

        self.registry.record(&measurements);
        let elapsed = start.elapsed();
        self.registry.observe_lookup_duration(elapsed);
        self.registry.add_fetch_failures(failures);
        self.registry.finish_cycle();

        debug!(
            measurements = measurements.len(),
            failures,
            elapsed = ?elapsed,
            "Collection cycle complete"
        );
    }

    fn track_reachability(&mut self, live_brokers: usize) {
        if live_brokers > 0 {
            self.unreachable_cycles = 0;
            self.registry.set_healthy(true);
            return;
        }

        self.unreachable_cycles += 1;
        warn!(
            consecutive_cycles = self.unreachable_cycles,
            "No broker reachable this cycle"
        );
        if self.unreachable_cycles >= UNREACHABLE_CYCLES_BEFORE_DOWN {
            self.registry.set_healthy(false);
        }
    }
}

impl<C> std::fmt::Debug for CollectionScheduler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionScheduler")
            .field("poll_interval", &self.poll_interval)
            .field("reset_guard", &self.reset_guard)
            .field("unreachable_cycles", &self.unreachable_cycles)
            .finish_non_exhaustive()
    }
}
