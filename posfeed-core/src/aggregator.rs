//! Position aggregation
//!
//! Turns accepted body rows into per-beacon live state: type classification,
//! EMA smoothing for mobile beacons, movement debounce and bounded history.
//!
//! # Example
//!
//! ```
//! use posfeed_core::{BeaconType, BeaconTypeRegistry, PositionAggregator, TrackerConfig};
//!
//! let mut registry = BeaconTypeRegistry::new();
//! registry.insert(3, BeaconType::Mobile);
//!
//! let mut aggregator = PositionAggregator::new(TrackerConfig::default());
//! aggregator.begin_epoch(registry);
//!
//! aggregator.process_line("0,0,41,17,3,1.000,2.000,0.000", 1.0);
//! aggregator.process_line("0,0,41,17,3,1.004,2.003,0.000", 1.1);
//!
//! // Below the movement threshold: one entry, refreshed timestamp
//! let beacon = aggregator.beacon(3).unwrap();
//! assert_eq!(beacon.history_len(), 1);
//! assert_eq!(beacon.latest().unwrap().ts_read, 1.1);
//! ```

use std::collections::BTreeMap;

use crate::beacon::{BeaconId, BeaconState, BeaconType, PositionSample, HISTORY_CAPACITY};
use crate::protocol::{parse_row, PositionRow};
use crate::registry::BeaconTypeRegistry;
use crate::snapshot::{Snapshot, SnapshotEntry};

/// Weight of the newest raw sample in the moving average
pub const EMA_ALPHA: f64 = 0.3;

/// Minimum mobile displacement (log units, meters) that extends the trail
pub const MIN_MOBILE_MOVEMENT: f64 = 0.01;

/// Aggregation settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    /// Smooth mobile beacons with an exponential moving average
    pub use_ema: bool,
    pub ema_alpha: f64,
    pub min_mobile_movement: f64,
    pub history_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            use_ema: true,
            ema_alpha: EMA_ALPHA,
            min_mobile_movement: MIN_MOBILE_MOVEMENT,
            history_capacity: HISTORY_CAPACITY,
        }
    }
}

/// Per-beacon position state for the active log epoch
#[derive(Debug, Clone)]
pub struct PositionAggregator {
    config: TrackerConfig,
    registry: BeaconTypeRegistry,
    beacons: BTreeMap<BeaconId, BeaconState>,
}

impl PositionAggregator {
    pub fn new(config: TrackerConfig) -> Self {
        PositionAggregator {
            config,
            registry: BeaconTypeRegistry::new(),
            beacons: BTreeMap::new(),
        }
    }

    pub fn registry(&self) -> &BeaconTypeRegistry {
        &self.registry
    }

    /// Start a new log epoch: drop every beacon and adopt the new header types
    pub fn begin_epoch(&mut self, registry: BeaconTypeRegistry) {
        self.beacons.clear();
        self.registry = registry;
    }

    /// Drop every beacon, keeping the current header types
    pub fn clear(&mut self) {
        self.beacons.clear();
    }

    /// Parse and apply one body line.
    ///
    /// Returns true if the line was an accepted positioning row.
    pub fn process_line(&mut self, line: &str, now: f64) -> bool {
        match parse_row(line) {
            Some(row) => {
                self.apply(&row, now);
                true
            }
            None => false,
        }
    }

    /// Apply an accepted row received at `now` (monotonic seconds)
    pub fn apply(&mut self, row: &PositionRow, now: f64) {
        let beacon_type = row
            .data_code
            .type_override()
            .unwrap_or_else(|| self.registry.beacon_type(row.beacon_id));

        let config = self.config;
        let beacon = self
            .beacons
            .entry(row.beacon_id)
            .or_insert_with(|| {
                BeaconState::with_capacity(row.beacon_id, beacon_type, config.history_capacity)
            });

        beacon.last_seen = now;

        let position = if beacon.beacon_type == BeaconType::Mobile && config.use_ema {
            beacon.smooth(row.position, config.ema_alpha)
        } else {
            row.position
        };
        let sample = PositionSample::new(row.device_time, now, position);

        let moved = match beacon.latest() {
            None => true,
            Some(last) => {
                beacon.beacon_type == BeaconType::Mobile
                    && last.distance_to(&sample) >= config.min_mobile_movement
            }
        };

        if moved {
            beacon.push(sample);
        } else {
            beacon.refresh_latest(&sample);
        }
    }

    pub fn beacon(&self, id: BeaconId) -> Option<&BeaconState> {
        self.beacons.get(&id)
    }

    pub fn beacons(&self) -> impl Iterator<Item = &BeaconState> + '_ {
        self.beacons.values()
    }

    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    /// Latest sample of every mobile beacon
    pub fn mobile_positions(&self) -> BTreeMap<BeaconId, PositionSample> {
        self.latest_of_type(BeaconType::Mobile)
    }

    /// Latest sample of every stationary beacon
    pub fn stationary_positions(&self) -> BTreeMap<BeaconId, PositionSample> {
        self.latest_of_type(BeaconType::Stationary)
    }

    fn latest_of_type(&self, beacon_type: BeaconType) -> BTreeMap<BeaconId, PositionSample> {
        self.beacons
            .values()
            .filter(|b| b.beacon_type == beacon_type)
            .filter_map(|b| b.latest().map(|s| (b.id, *s)))
            .collect()
    }

    /// Snapshot for publishing: mobile beacons first, then stationary ones.
    ///
    /// Beacons of unknown type are tracked but not published.
    pub fn snapshot(&self, ts_pub: f64) -> Snapshot {
        let mobile = self.mobile_positions().into_iter().map(|(id, sample)| {
            SnapshotEntry::new(BeaconType::Mobile, id, &sample)
        });
        let stationary = self.stationary_positions().into_iter().map(|(id, sample)| {
            SnapshotEntry::new(BeaconType::Stationary, id, &sample)
        });

        Snapshot {
            ts_pub,
            beacons: mobile.chain(stationary).collect(),
        }
    }
}
