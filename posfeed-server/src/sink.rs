//! Snapshot fan-out
//!
//! The tracker hands each cycle's snapshot to a [`DistributionSink`], which
//! forwards it unchanged to every configured consumer. A consumer that fails
//! is logged and skipped; the others still get the snapshot.

use std::collections::HashMap;
use std::io::{self, Write};

use posfeed_core::{BeaconId, BeaconType, Snapshot};

use crate::PipelineError;

/// Something that receives every published snapshot
pub trait SnapshotConsumer: Send {
    fn name(&self) -> &str;

    fn consume(&mut self, snapshot: &Snapshot) -> Result<(), PipelineError>;

    /// Flush and release resources at shutdown
    fn close(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct DistributionSink {
    consumers: Vec<Box<dyn SnapshotConsumer>>,
}

impl DistributionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, consumer: Box<dyn SnapshotConsumer>) {
        log::debug!("Snapshot consumer '{}' added", consumer.name());
        self.consumers.push(consumer);
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    pub fn publish(&mut self, snapshot: &Snapshot) {
        for consumer in self.consumers.iter_mut() {
            if let Err(e) = consumer.consume(snapshot) {
                log::error!("{}: {}", consumer.name(), e);
            }
        }
    }

    pub fn close(&mut self) {
        for consumer in self.consumers.iter_mut() {
            if let Err(e) = consumer.close() {
                log::error!("{}: close failed: {}", consumer.name(), e);
            }
        }
    }
}

/// Prints a line for every beacon whose position changed since the last snapshot
pub struct StdoutPrinter<W: Write + Send = io::Stdout> {
    out: W,
    last: HashMap<(BeaconType, BeaconId), (f64, f64, f64)>,
}

impl StdoutPrinter<io::Stdout> {
    pub fn new() -> Self {
        Self::with_writer(io::stdout())
    }
}

impl Default for StdoutPrinter<io::Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> StdoutPrinter<W> {
    pub fn with_writer(out: W) -> Self {
        StdoutPrinter {
            out,
            last: HashMap::new(),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }
}

impl<W: Write + Send> SnapshotConsumer for StdoutPrinter<W> {
    fn name(&self) -> &str {
        "stdout"
    }

    fn consume(&mut self, snapshot: &Snapshot) -> Result<(), PipelineError> {
        let mut current = HashMap::with_capacity(snapshot.beacons.len());

        for entry in &snapshot.beacons {
            let key = (entry.beacon_type, entry.id);
            let value = (entry.pos.x, entry.pos.y, entry.pos.z);
            if self.last.get(&key) != Some(&value) {
                let label = match entry.beacon_type {
                    BeaconType::Mobile => "MOBILE",
                    BeaconType::Stationary | BeaconType::Unknown => "STAT  ",
                };
                writeln!(
                    self.out,
                    "{} {}: x={:.3}, y={:.3}, z={:.3}",
                    label, entry.id, value.0, value.1, value.2
                )?;
            }
            current.insert(key, value);
        }

        self.last = current;
        Ok(())
    }

    fn close(&mut self) -> Result<(), PipelineError> {
        self.out.flush()?;
        Ok(())
    }
}
