use nalgebra::Vector3;

use crate::beacon::{BeaconId, BeaconType};

// =============================================================================
// Row Layout
// =============================================================================

/// Rows with fewer fields never carry a position
pub const MIN_FIELDS: usize = 8;

const FIELD_DEVICE_TIME: usize = 1;
const FIELD_LINE_TYPE: usize = 2;
const FIELD_DATA_CODE: usize = 3;
const FIELD_BEACON_ID: usize = 4;
const FIELD_X: usize = 5;

// =============================================================================
// Codes
// =============================================================================

/// Line type code (field 2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LineType {
    /// Positioning event
    Positioning = 41,
}

impl LineType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            41 => Some(LineType::Positioning),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Data type code of a positioning event (field 3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataCode {
    /// Hedgehog position
    Position = 17,
    /// Stationary beacon position, regardless of the header
    StationaryPosition = 18,
    /// Hedgehog position, high resolution record
    PositionHighRes = 129,
}

impl DataCode {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            17 => Some(DataCode::Position),
            18 => Some(DataCode::StationaryPosition),
            129 => Some(DataCode::PositionHighRes),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Type forced by the code itself; `None` means "use the registry"
    pub fn type_override(self) -> Option<BeaconType> {
        match self {
            DataCode::Position | DataCode::PositionHighRes => None,
            DataCode::StationaryPosition => Some(BeaconType::Stationary),
        }
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// A body row that passed every acceptance check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionRow {
    /// Device timestamp in seconds (field 1 is milliseconds)
    pub device_time: Option<f64>,
    pub data_code: DataCode,
    pub beacon_id: BeaconId,
    pub position: Vector3<f64>,
}

/// Parse one body line into a position row.
///
/// Returns `None` for anything that is not a well formed positioning event:
/// short rows, non numeric codes, other line types, unknown data codes or
/// coordinates that do not parse.
///
/// # Example
/// ```
/// use posfeed_core::protocol::{parse_row, DataCode};
/// let row = parse_row("0,1700000000500,41,17,3,1.000,2.000,0.000").unwrap();
/// assert_eq!(row.beacon_id, 3);
/// assert_eq!(row.data_code, DataCode::Position);
/// assert_eq!(row.device_time, Some(1_700_000_000.5));
/// ```
pub fn parse_row(line: &str) -> Option<PositionRow> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(',').collect();
    if fields.len() < MIN_FIELDS {
        return None;
    }

    let line_type = parse_int(fields[FIELD_LINE_TYPE])?;
    let data_code = parse_int(fields[FIELD_DATA_CODE])?;
    let beacon_id = parse_int(fields[FIELD_BEACON_ID])?;

    LineType::from_code(line_type)?;
    let data_code = DataCode::from_code(data_code)?;
    let beacon_id = BeaconId::try_from(beacon_id).ok()?;

    let x = parse_float(fields[FIELD_X])?;
    let y = parse_float(fields[FIELD_X + 1])?;
    let z = parse_float(fields[FIELD_X + 2])?;

    let device_time = parse_float(fields[FIELD_DEVICE_TIME]).map(|ms| ms / 1000.0);

    Some(PositionRow {
        device_time,
        data_code,
        beacon_id,
        position: Vector3::new(x, y, z),
    })
}

fn parse_int(field: &str) -> Option<i64> {
    field.trim().parse().ok()
}

fn parse_float(field: &str) -> Option<f64> {
    field.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
