//! Marvelmind dashboard log protocol
//!
//! Pure functions for reading the comma separated body of a dashboard log.
//! No I/O operations - callers hand in one line at a time.

mod row;

pub use row::*;

/// Decode log bytes as Latin-1.
///
/// The dashboard writes single byte text; every byte maps to exactly one
/// `char`, so decoding never fails on vendor garbage.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
