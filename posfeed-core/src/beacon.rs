//! Beacon State Tracking
//!
//! Types describing one tracked beacon: its classification, the samples it
//! produced and the bounded trail of accepted positions.

use std::collections::VecDeque;
use std::fmt;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Beacon address as written in the log (field 4 of a body row).
pub type BeaconId = u32;

/// Maximum number of samples kept per beacon; the oldest is evicted first.
pub const HISTORY_CAPACITY: usize = 50;

/// Classification of a beacon for the lifetime of one log epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeaconType {
    /// Fixed anchor
    Stationary,
    /// Moving tag ("hedgehog")
    Mobile,
    /// Not described in the log header
    Unknown,
}

impl Default for BeaconType {
    fn default() -> Self {
        BeaconType::Unknown
    }
}

impl BeaconType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BeaconType::Stationary => "stationary",
            BeaconType::Mobile => "mobile",
            BeaconType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BeaconType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One position of a beacon
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    /// Device timestamp in seconds, when the row carried one
    pub ts_mm: Option<f64>,
    /// Local receipt time in monotonic seconds
    pub ts_read: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PositionSample {
    pub fn new(ts_mm: Option<f64>, ts_read: f64, position: Vector3<f64>) -> Self {
        PositionSample {
            ts_mm,
            ts_read,
            x: position.x,
            y: position.y,
            z: position.z,
        }
    }

    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    /// 3D Euclidean distance between two samples
    pub fn distance_to(&self, other: &PositionSample) -> f64 {
        (self.position() - other.position()).norm()
    }
}

/// Live state of one beacon within a log epoch
#[derive(Debug, Clone)]
pub struct BeaconState {
    pub id: BeaconId,
    pub beacon_type: BeaconType,
    /// Receipt time of the last accepted row, whether or not history changed
    pub last_seen: f64,
    history: VecDeque<PositionSample>,
    capacity: usize,
    /// Running EMA coordinates, only ever set for mobile beacons
    smoothed: Option<Vector3<f64>>,
}

impl BeaconState {
    pub fn new(id: BeaconId, beacon_type: BeaconType) -> Self {
        Self::with_capacity(id, beacon_type, HISTORY_CAPACITY)
    }

    pub fn with_capacity(id: BeaconId, beacon_type: BeaconType, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        BeaconState {
            id,
            beacon_type,
            last_seen: 0.0,
            history: VecDeque::with_capacity(capacity),
            capacity,
            smoothed: None,
        }
    }

    /// Accepted samples, oldest first
    pub fn history(&self) -> impl ExactSizeIterator<Item = &PositionSample> + '_ {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn latest(&self) -> Option<&PositionSample> {
        self.history.back()
    }

    pub fn smoothed(&self) -> Option<Vector3<f64>> {
        self.smoothed
    }

    /// Feed a raw position through the exponential moving average.
    ///
    /// The first raw position seeds the filter unchanged.
    pub(crate) fn smooth(&mut self, raw: Vector3<f64>, alpha: f64) -> Vector3<f64> {
        let next = match self.smoothed {
            None => raw,
            Some(previous) => raw * alpha + previous * (1.0 - alpha),
        };
        self.smoothed = Some(next);
        next
    }

    pub(crate) fn push(&mut self, sample: PositionSample) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }

    /// Move the newest entry to the sample's timestamps, keeping its coordinates.
    ///
    /// Returns false when there is no entry to refresh.
    pub(crate) fn refresh_latest(&mut self, sample: &PositionSample) -> bool {
        match self.history.back_mut() {
            Some(last) => {
                last.ts_mm = sample.ts_mm;
                last.ts_read = sample.ts_read;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: f64, x: f64, y: f64, z: f64) -> PositionSample {
        PositionSample::new(None, ts, Vector3::new(x, y, z))
    }

    #[test]
    fn test_history_is_a_ring_buffer() {
        let mut state = BeaconState::new(7, BeaconType::Mobile);
        for i in 0..(HISTORY_CAPACITY + 10) {
            state.push(sample(i as f64, i as f64, 0.0, 0.0));
        }
        assert_eq!(state.history_len(), HISTORY_CAPACITY);
        assert_eq!(state.history().next().unwrap().x, 10.0);
        assert_eq!(state.latest().unwrap().x, (HISTORY_CAPACITY + 9) as f64);
    }

    #[test]
    fn test_refresh_latest_keeps_coordinates() {
        let mut state = BeaconState::new(1, BeaconType::Stationary);
        assert!(!state.refresh_latest(&sample(1.0, 0.0, 0.0, 0.0)));

        state.push(sample(1.0, 1.0, 2.0, 3.0));
        let mut newer = sample(4.0, 9.0, 9.0, 9.0);
        newer.ts_mm = Some(12.5);
        assert!(state.refresh_latest(&newer));

        let latest = state.latest().unwrap();
        assert_eq!((latest.x, latest.y, latest.z), (1.0, 2.0, 3.0));
        assert_eq!(latest.ts_read, 4.0);
        assert_eq!(latest.ts_mm, Some(12.5));
        assert_eq!(state.history_len(), 1);
    }

    #[test]
    fn test_smooth_seeds_then_blends() {
        let mut state = BeaconState::new(1, BeaconType::Mobile);
        let first = state.smooth(Vector3::new(1.0, 2.0, 0.0), 0.3);
        assert_eq!(first, Vector3::new(1.0, 2.0, 0.0));

        let second = state.smooth(Vector3::new(2.0, 4.0, 1.0), 0.3);
        assert!((second.x - 1.3).abs() < 1e-12);
        assert!((second.y - 2.6).abs() < 1e-12);
        assert!((second.z - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_distance() {
        let a = sample(0.0, 0.0, 0.0, 0.0);
        let b = sample(0.0, 3.0, 4.0, 12.0);
        assert_eq!(a.distance_to(&b), 13.0);
    }

    #[test]
    fn test_beacon_type_serde() {
        assert_eq!(serde_json::to_string(&BeaconType::Mobile).unwrap(), "\"mobile\"");
        assert_eq!(BeaconType::default(), BeaconType::Unknown);
        assert_eq!(BeaconType::Stationary.to_string(), "stationary");
    }
}
