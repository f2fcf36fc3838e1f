//! Platform-independent beacon position tracking.
//!
//! This crate holds everything about Marvelmind dashboard logs that does not
//! need a file system, a socket or a runtime:
//!
//! - **protocol**: body row parsing (line type / data code / coordinates)
//! - **registry**: beacon type extraction from the log header
//! - **aggregator**: per-beacon smoothing, debounce and bounded history
//! - **liveness**: the warn / restart / fatal silence state machine
//! - **snapshot**: published snapshots, their JSON wire form and CSV records
//!
//! Time is passed in by the caller as monotonic seconds (`f64`), so the
//! same code runs under tokio, in tests and in replay tools.
//!
//! # Example
//!
//! ```
//! use posfeed_core::{BeaconTypeRegistry, PositionAggregator, TrackerConfig};
//!
//! let header = ["[beacon 3]", "Hedgehog_mode=1", "1700000000000,0,41,17,3,1.0,2.0,0.0"];
//! let registry = BeaconTypeRegistry::parse(header);
//!
//! let mut aggregator = PositionAggregator::new(TrackerConfig::default());
//! aggregator.begin_epoch(registry);
//! aggregator.process_line("1700000000000,1700000000000,41,17,3,1.0,2.0,0.0", 0.5);
//!
//! let snapshot = aggregator.snapshot(1_700_000_000.0);
//! assert_eq!(snapshot.beacons.len(), 1);
//! ```

pub mod aggregator;
pub mod beacon;
pub mod liveness;
pub mod protocol;
pub mod registry;
pub mod snapshot;

pub use aggregator::{PositionAggregator, TrackerConfig};
pub use beacon::{BeaconId, BeaconState, BeaconType, PositionSample, HISTORY_CAPACITY};
pub use liveness::{LivenessCheck, LivenessConfig, LivenessMonitor};
pub use protocol::{decode_latin1, parse_row, DataCode, LineType, PositionRow};
pub use registry::BeaconTypeRegistry;
pub use snapshot::{Position, Snapshot, SnapshotEntry, CSV_HEADER};

use thiserror::Error;

/// Errors raised by the tracking core.
///
/// Malformed log input is never an error; it is dropped where it is parsed.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// No log growth for at least the fatal threshold.
    #[error("No position data received for {silence:.1}s")]
    LivenessLost { silence: f64 },

    #[error("Snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
