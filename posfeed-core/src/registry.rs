//! Beacon type registry
//!
//! The dashboard writes a settings block at the top of every log. Each beacon
//! gets a `[beacon <id>]` section, and hedgehogs (mobile beacons) carry
//! `Hedgehog_mode=1` inside it. The block ends where the numeric body starts.

use std::collections::BTreeMap;

use crate::beacon::{BeaconId, BeaconType};

const SECTION_PREFIX: &str = "[beacon";
const HEDGEHOG_MODE_KEY: &str = "Hedgehog_mode";

/// Beacon id to type mapping for one log epoch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BeaconTypeRegistry {
    types: BTreeMap<BeaconId, BeaconType>,
}

impl BeaconTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the header block from the lines of a log.
    ///
    /// Stops at the first line starting with a digit, so the iterator may
    /// cover the whole file; only the header is consumed.
    pub fn parse<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = BeaconTypeRegistry::new();
        let mut current: Option<BeaconId> = None;

        for line in lines {
            let line = line.as_ref().trim();
            let Some(first) = line.chars().next() else {
                continue;
            };

            if first.is_ascii_digit() {
                break;
            }

            if line.starts_with(SECTION_PREFIX) {
                current = parse_section_id(line);
                continue;
            }

            if let Some(id) = current {
                if let Some(mode) = parse_hedgehog_mode(line) {
                    let beacon_type = if mode == "1" {
                        BeaconType::Mobile
                    } else {
                        BeaconType::Stationary
                    };
                    registry.types.insert(id, beacon_type);
                    current = None;
                }
            }
        }

        registry
    }

    /// Parse a header from a block of text
    pub fn parse_str(text: &str) -> Self {
        Self::parse(text.lines())
    }

    /// Type of a beacon; beacons missing from the header are `Unknown`
    pub fn beacon_type(&self, id: BeaconId) -> BeaconType {
        self.types.get(&id).copied().unwrap_or_default()
    }

    pub fn insert(&mut self, id: BeaconId, beacon_type: BeaconType) {
        self.types.insert(id, beacon_type);
    }

    pub fn iter(&self) -> impl Iterator<Item = (BeaconId, BeaconType)> + '_ {
        self.types.iter().map(|(id, t)| (*id, *t))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// `[beacon 12]` -> 12
fn parse_section_id(line: &str) -> Option<BeaconId> {
    line.split_whitespace()
        .nth(1)?
        .trim_matches(']')
        .parse()
        .ok()
}

/// `Hedgehog_mode=1` -> "1"
fn parse_hedgehog_mode(line: &str) -> Option<&str> {
    if !line.starts_with(HEDGEHOG_MODE_KEY) {
        return None;
    }
    line.split('=').nth(1).map(str::trim)
}
