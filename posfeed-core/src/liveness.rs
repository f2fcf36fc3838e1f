//! Data source liveness
//!
//! Tracks the silence since the log last grew and escalates:
//!
//! | Silence | Action |
//! |---------|--------|
//! | ≥ 5s    | warn, at most once per 5s |
//! | ≥ 60s   | soft restart: caller drops state and rewinds; clock resets |
//! | ≥ 120s  | fatal: caller decides what to do |
//!
//! All three thresholds are compared against the silence measured once at the
//! start of [`LivenessMonitor::check`]. When a single check already sees
//! ≥ 120s it reports both the restart and the fatal condition.

use std::time::Duration;

use crate::TrackerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    pub warn_after: Duration,
    /// Minimum spacing between two warnings
    pub warn_interval: Duration,
    pub restart_after: Duration,
    pub fatal_after: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        LivenessConfig {
            warn_after: Duration::from_secs(5),
            warn_interval: Duration::from_secs(5),
            restart_after: Duration::from_secs(60),
            fatal_after: Duration::from_secs(120),
        }
    }
}

/// Outcome of one liveness evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessCheck {
    /// Seconds since the last growth, measured before any reset
    pub silence: f64,
    pub warn: bool,
    pub restart: bool,
    pub fatal: bool,
}

impl LivenessCheck {
    pub fn is_quiet(&self) -> bool {
        !(self.warn || self.restart || self.fatal)
    }

    /// `Err` when the fatal threshold was reached
    pub fn result(&self) -> Result<(), TrackerError> {
        if self.fatal {
            Err(TrackerError::LivenessLost {
                silence: self.silence,
            })
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    config: LivenessConfig,
    last_data: f64,
    last_warn: Option<f64>,
}

impl LivenessMonitor {
    /// `now` is monotonic seconds; the clock starts as if data just arrived
    pub fn new(config: LivenessConfig, now: f64) -> Self {
        LivenessMonitor {
            config,
            last_data: now,
            last_warn: None,
        }
    }

    /// Record that the log grew
    pub fn data_arrived(&mut self, now: f64) {
        self.last_data = now;
    }

    /// Restart the silence clock (new log epoch)
    pub fn reset(&mut self, now: f64) {
        self.last_data = now;
    }

    pub fn silence(&self, now: f64) -> f64 {
        (now - self.last_data).max(0.0)
    }

    /// Evaluate the thresholds for this cycle.
    ///
    /// Updates the warning rate limit and, on restart, the silence clock.
    pub fn check(&mut self, now: f64) -> LivenessCheck {
        let silence = self.silence(now);
        let config = self.config;

        let warn = silence >= config.warn_after.as_secs_f64()
            && self
                .last_warn
                .map_or(true, |t| now - t >= config.warn_interval.as_secs_f64());
        if warn {
            self.last_warn = Some(now);
        }

        let restart = silence >= config.restart_after.as_secs_f64();
        if restart {
            self.last_data = now;
        }

        let fatal = silence >= config.fatal_after.as_secs_f64();

        LivenessCheck {
            silence,
            warn,
            restart,
            fatal,
        }
    }
}
