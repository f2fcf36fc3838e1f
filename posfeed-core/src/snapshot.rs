//! Published snapshots
//!
//! A snapshot is what leaves the tracker each cycle. It serializes directly
//! into the broadcast wire format (one JSON object per line) and flattens into
//! persisted CSV records.

use serde::{Deserialize, Serialize};

use crate::beacon::{BeaconId, BeaconType, PositionSample};
use crate::TrackerError;

/// Column names of the persisted CSV file
pub const CSV_HEADER: [&str; 8] = [
    "ts_pub",
    "ts_mm",
    "ts_read",
    "beacon_type",
    "beacon_id",
    "x",
    "y",
    "z",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Latest sample of one beacon, as sent on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    #[serde(rename = "type")]
    pub beacon_type: BeaconType,
    pub id: BeaconId,
    pub pos: Position,
    pub ts_mm: Option<f64>,
    pub ts_read: f64,
}

impl SnapshotEntry {
    pub fn new(beacon_type: BeaconType, id: BeaconId, sample: &PositionSample) -> Self {
        SnapshotEntry {
            beacon_type,
            id,
            pos: Position {
                x: sample.x,
                y: sample.y,
                z: sample.z,
            },
            ts_mm: sample.ts_mm,
            ts_read: sample.ts_read,
        }
    }
}

/// Everything published for one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Wall clock publish time, seconds since the Unix epoch
    pub ts_pub: f64,
    pub beacons: Vec<SnapshotEntry>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    /// Serialize as one newline terminated JSON object
    pub fn to_json_line(&self) -> Result<Vec<u8>, TrackerError> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    /// One CSV record per beacon, in `CSV_HEADER` column order
    pub fn csv_records(&self) -> impl Iterator<Item = [String; 8]> + '_ {
        self.beacons.iter().map(move |entry| {
            [
                format!("{:.6}", self.ts_pub),
                entry.ts_mm.map(|ts| format!("{:.6}", ts)).unwrap_or_default(),
                format!("{:.6}", entry.ts_read),
                entry.beacon_type.to_string(),
                entry.id.to_string(),
                format!("{:.6}", entry.pos.x),
                format!("{:.6}", entry.pos.y),
                format!("{:.6}", entry.pos.z),
            ]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        Snapshot {
            ts_pub: 1700000000.25,
            beacons: vec![
                SnapshotEntry {
                    beacon_type: BeaconType::Mobile,
                    id: 3,
                    pos: Position {
                        x: 1.0,
                        y: 2.5,
                        z: 0.0,
                    },
                    ts_mm: Some(1699999999.5),
                    ts_read: 12.0,
                },
                SnapshotEntry {
                    beacon_type: BeaconType::Stationary,
                    id: 5,
                    pos: Position {
                        x: -1.0,
                        y: 0.0,
                        z: 2.0,
                    },
                    ts_mm: None,
                    ts_read: 11.5,
                },
            ],
        }
    }

    #[test]
    fn test_wire_format() {
        let line = snapshot().to_json_line().unwrap();
        assert_eq!(*line.last().unwrap(), b'\n');
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);

        let value: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["ts_pub"], 1700000000.25);
        assert_eq!(value["beacons"][0]["type"], "mobile");
        assert_eq!(value["beacons"][0]["id"], 3);
        assert_eq!(value["beacons"][0]["pos"]["y"], 2.5);
        assert_eq!(value["beacons"][0]["ts_mm"], 1699999999.5);
        assert_eq!(value["beacons"][1]["type"], "stationary");
        assert!(value["beacons"][1]["ts_mm"].is_null());
        assert_eq!(value["beacons"][1]["ts_read"], 11.5);
    }

    #[test]
    fn test_csv_records() {
        let snapshot = snapshot();
        let records: Vec<_> = snapshot.csv_records().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0],
            [
                "1700000000.250000",
                "1699999999.500000",
                "12.000000",
                "mobile",
                "3",
                "1.000000",
                "2.500000",
                "0.000000"
            ]
        );
        assert_eq!(records[1][1], "");
        assert_eq!(records[1][3], "stationary");
    }

    #[test]
    fn test_empty_snapshot_still_serializes() {
        let empty = Snapshot {
            ts_pub: 1.0,
            beacons: vec![],
        };
        assert!(empty.is_empty());
        assert_eq!(empty.to_json_line().unwrap(), b"{\"ts_pub\":1.0,\"beacons\":[]}\n");
    }
}
