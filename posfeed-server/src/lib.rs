//! Native server for Marvelmind beacon positions.
//!
//! Tails the dashboard's rotating log, keeps a live position per beacon using
//! `posfeed-core`, and fans each cycle's snapshot out to a CSV recording, a
//! TCP broadcast (newline delimited JSON) and optionally stdout.
//!
//! ```text
//! LogDiscovery ─▶ LogTailer ─▶ PositionAggregator ─▶ LivenessMonitor
//!                                     │
//!                                     ▼
//!                             DistributionSink ─┬─▶ CsvPersister
//!                                               ├─▶ Broadcaster ─▶ clients
//!                                               └─▶ StdoutPrinter
//! ```

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use posfeed_core::{LivenessConfig, TrackerConfig, TrackerError};
use thiserror::Error;

pub mod broadcaster;
pub mod csv_writer;
pub mod discovery;
pub mod logging;
pub mod sink;
pub mod tailer;
pub mod tracker;

use discovery::DEFAULT_LOG_SUFFIX;

/// Where the Marvelmind dashboard keeps its logs, relative to the home directory
const DEFAULT_LOGS_SUBDIR: [&str; 6] = [
    "Downloads",
    "marvelmind_SW",
    "01_Dashboard",
    "02_linux",
    "x86",
    "logs",
];

#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Directory the dashboard writes its logs to
    /// [default: ~/Downloads/marvelmind_SW/01_Dashboard/02_linux/x86/logs]
    #[arg(long)]
    pub logs_dir: Option<PathBuf>,

    /// File name suffix of dashboard logs
    #[arg(long, default_value = DEFAULT_LOG_SUFFIX)]
    pub suffix: String,

    /// Tracker cycle interval in milliseconds
    #[arg(long, default_value_t = 100)]
    pub poll_interval_ms: u64,

    /// Store raw mobile positions instead of smoothing them
    #[arg(long, default_value_t = false)]
    pub no_ema: bool,

    /// Address the broadcast server listens on
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub listen: IpAddr,

    /// Broadcast server port
    #[arg(short, long, default_value_t = 5555)]
    pub port: u16,

    /// Broadcasts per second
    #[arg(long, default_value_t = 20.0, value_parser = parse_rate)]
    pub broadcast_rate: f64,

    /// Record snapshots to this CSV file
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Maximum CSV snapshots per second
    #[arg(long, default_value_t = 5.0, value_parser = parse_rate)]
    pub csv_rate: f64,

    /// Print position changes to stdout
    #[arg(long, default_value_t = false)]
    pub output: bool,

    /// Also write the application log to a timestamped file in this directory
    #[arg(long)]
    pub session_log_dir: Option<PathBuf>,

    /// Number of session log files to keep
    #[arg(long, default_value_t = 3)]
    pub keep_logs: usize,

    /// Rebuild the tracker instead of exiting when the log stays silent too long
    #[arg(long, default_value_t = false)]
    pub restart_on_fatal: bool,
}

impl Cli {
    pub fn logs_dir(&self) -> PathBuf {
        if let Some(dir) = &self.logs_dir {
            return dir.clone();
        }
        let home = directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        DEFAULT_LOGS_SUBDIR.iter().fold(home, |path, part| path.join(part))
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            use_ema: !self.no_ema,
            ..TrackerConfig::default()
        }
    }

    pub fn liveness_config(&self) -> LivenessConfig {
        LivenessConfig::default()
    }
}

fn parse_rate(s: &str) -> Result<f64, String> {
    let rate: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if !(rate.is_finite() && rate > 0.0) {
        return Err(format!("rate must be a positive number of Hz, got {}", s));
    }
    match period_of(rate) {
        Some(_) => Ok(rate),
        None => Err(format!("rate {} Hz has no usable period", s)),
    }
}

fn period_of(rate_hz: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(1.0 / rate_hz)
        .ok()
        .filter(|period| !period.is_zero())
}

/// Convert a rate in Hz to the period between two events.
///
/// Rates outside what [`Cli`] accepts are clamped to the nearest usable
/// period.
pub fn rate_to_period(rate_hz: f64) -> Duration {
    period_of(rate_hz).unwrap_or(if rate_hz > 1.0 {
        Duration::from_nanos(1)
    } else {
        Duration::MAX
    })
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Logs directory does not exist: {0}")]
    NoLogDirectory(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error("Logger already installed: {0}")]
    Logger(#[from] log::SetLoggerError),
}
