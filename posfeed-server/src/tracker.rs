//! The tracker cycle
//!
//! Every cycle: follow log rotation, ingest appended rows, evaluate liveness
//! and publish a snapshot to the sink. [`PositionTracker`] holds the state and
//! is driven by [`TrackerService`], the `tracker` subsystem.

use std::time::{Duration, Instant};

use posfeed_core::{
    BeaconTypeRegistry, LivenessConfig, LivenessMonitor, PositionAggregator, Snapshot,
    TrackerConfig, TrackerError,
};
use tokio::time::{interval, MissedTickBehavior};
use tokio_graceful_shutdown::SubsystemHandle;

use crate::discovery::LogDiscovery;
use crate::sink::DistributionSink;
use crate::tailer::LogTailer;
use crate::PipelineError;

pub struct PositionTracker {
    key: String,
    tailer: LogTailer,
    aggregator: PositionAggregator,
    liveness: LivenessMonitor,
    clock: Instant,
}

impl PositionTracker {
    pub fn new(
        key: impl Into<String>,
        discovery: LogDiscovery,
        config: TrackerConfig,
        liveness: LivenessConfig,
    ) -> Self {
        Self::with_clock(key, discovery, config, liveness, Instant::now())
    }

    /// Build a tracker whose timestamps count from `clock`, so that a
    /// replacement tracker continues the time line of the one it replaces
    pub fn with_clock(
        key: impl Into<String>,
        discovery: LogDiscovery,
        config: TrackerConfig,
        liveness: LivenessConfig,
        clock: Instant,
    ) -> Self {
        let key = key.into();
        let now = clock.elapsed().as_secs_f64();
        PositionTracker {
            tailer: LogTailer::new(key.clone(), discovery),
            key,
            aggregator: PositionAggregator::new(config),
            liveness: LivenessMonitor::new(liveness, now),
            clock,
        }
    }

    /// Monotonic seconds since the tracker's clock started
    pub fn now(&self) -> f64 {
        self.clock.elapsed().as_secs_f64()
    }

    pub fn aggregator(&self) -> &PositionAggregator {
        &self.aggregator
    }

    pub fn tailer(&self) -> &LogTailer {
        &self.tailer
    }

    pub fn update(&mut self) -> Result<(), PipelineError> {
        let now = self.now();
        self.update_at(now)
    }

    /// Run one cycle at monotonic time `now`.
    ///
    /// Fails with [`TrackerError::LivenessLost`] when the log has been silent
    /// past the fatal threshold.
    pub fn update_at(&mut self, now: f64) -> Result<(), PipelineError> {
        if self.tailer.poll()? {
            let registry = self.tailer.read_registry().unwrap_or_else(|e| {
                log::warn!("{}: cannot read beacon header: {}", self.key, e);
                BeaconTypeRegistry::new()
            });
            self.aggregator.begin_epoch(registry);
            self.liveness.reset(now);
        }

        let aggregator = &mut self.aggregator;
        let mut accepted = 0usize;
        let grew = self.tailer.read_growth(|line| {
            if aggregator.process_line(line, now) {
                accepted += 1;
            }
        })?;
        if accepted > 0 {
            log::trace!("{}: {} position rows", self.key, accepted);
        }
        if grew {
            self.liveness.data_arrived(now);
        }

        self.check_liveness(now)
    }

    fn check_liveness(&mut self, now: f64) -> Result<(), PipelineError> {
        let check = self.liveness.check(now);

        if check.warn {
            log::warn!(
                "{}: no position data received for {:.1}s",
                self.key,
                check.silence
            );
        }
        if check.restart {
            log::info!(
                "{}: no data for {:.1}s, restarting log reader",
                self.key,
                check.silence
            );
            self.tailer.reset_offset();
            self.aggregator.clear();
        }

        check.result()?;
        Ok(())
    }

    /// Current positions, stamped with wall clock time
    pub fn snapshot(&self) -> Snapshot {
        let ts_pub = chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0;
        self.aggregator.snapshot(ts_pub)
    }
}

/// Drives a [`PositionTracker`] at a fixed interval and publishes to the sink
pub struct TrackerService {
    key: String,
    discovery: LogDiscovery,
    config: TrackerConfig,
    liveness: LivenessConfig,
    interval: Duration,
    restart_on_fatal: bool,
    sink: DistributionSink,
    clock: Instant,
}

impl TrackerService {
    pub fn new(
        discovery: LogDiscovery,
        config: TrackerConfig,
        liveness: LivenessConfig,
        interval: Duration,
        sink: DistributionSink,
    ) -> Self {
        TrackerService {
            key: format!("Tracker {}", discovery.dir().display()),
            discovery,
            config,
            liveness,
            interval,
            restart_on_fatal: false,
            sink,
            clock: Instant::now(),
        }
    }

    /// Rebuild the tracker instead of failing on a fatal liveness loss
    pub fn restart_on_fatal(mut self, restart: bool) -> Self {
        self.restart_on_fatal = restart;
        self
    }

    fn build_tracker(&self) -> PositionTracker {
        PositionTracker::with_clock(
            self.key.clone(),
            self.discovery.clone(),
            self.config,
            self.liveness,
            self.clock,
        )
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), PipelineError> {
        let mut tracker = self.build_tracker();
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!(
            "{}: started, cycle {} ms, {} consumers",
            self.key,
            self.interval.as_millis(),
            self.sink.len()
        );

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    log::info!("{}: shutdown", self.key);
                    self.sink.close();
                    return Ok(());
                },

                _ = ticker.tick() => {
                    match tracker.update() {
                        Ok(()) => {}
                        Err(PipelineError::Tracker(e @ TrackerError::LivenessLost { .. }))
                            if self.restart_on_fatal =>
                        {
                            log::error!("{}: {}, rebuilding tracker", self.key, e);
                            tracker = self.build_tracker();
                            continue;
                        }
                        Err(e) => {
                            log::error!("{}: {}", self.key, e);
                            self.sink.close();
                            return Err(e);
                        }
                    }
                    self.sink.publish(&tracker.snapshot());
                },
            }
        }
    }
}
