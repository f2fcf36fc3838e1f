//! Rate limited CSV recording of snapshots.
//!
//! Only cadence matters: a call arriving sooner than the configured period
//! after the last write is dropped whole, nothing is queued.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use posfeed_core::{Snapshot, CSV_HEADER};

use crate::sink::SnapshotConsumer;
use crate::{rate_to_period, PipelineError};

pub struct CsvPersister<W: Write = File> {
    writer: csv::Writer<W>,
    period: Duration,
    last_write: Option<Instant>,
}

impl CsvPersister<File> {
    /// Create (truncating) the file at `path` and write the header
    pub fn create(path: &Path, rate_hz: f64) -> Result<Self, PipelineError> {
        let file = File::create(path)?;
        let persister = Self::new(file, rate_hz)?;
        log::info!(
            "CSV writer opened at {} (rate {:.1} Hz)",
            path.display(),
            rate_hz
        );
        Ok(persister)
    }
}

impl<W: Write> CsvPersister<W> {
    pub fn new(inner: W, rate_hz: f64) -> Result<Self, PipelineError> {
        let mut writer = csv::Writer::from_writer(inner);
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;
        Ok(CsvPersister {
            writer,
            period: rate_to_period(rate_hz),
            last_write: None,
        })
    }

    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }

    pub fn write_snapshot(&mut self, snapshot: &Snapshot) -> Result<bool, PipelineError> {
        self.write_snapshot_at(snapshot, Instant::now())
    }

    /// Write one row per beacon unless throttled.
    ///
    /// Returns true if rows were written. Empty snapshots write nothing and do
    /// not count towards the rate limit.
    pub fn write_snapshot_at(
        &mut self,
        snapshot: &Snapshot,
        now: Instant,
    ) -> Result<bool, PipelineError> {
        if let Some(last) = self.last_write {
            if now.saturating_duration_since(last) < self.period {
                log::trace!("CSV write throttled");
                return Ok(false);
            }
        }

        if snapshot.is_empty() {
            log::trace!("CSV snapshot empty, skipping");
            return Ok(false);
        }

        for record in snapshot.csv_records() {
            self.writer.write_record(&record)?;
        }
        self.writer.flush()?;
        self.last_write = Some(now);

        log::debug!(
            "CSV snapshot written: {} beacons at ts_pub={:.6}",
            snapshot.beacons.len(),
            snapshot.ts_pub
        );
        Ok(true)
    }
}

impl<W: Write + Send> SnapshotConsumer for CsvPersister<W> {
    fn name(&self) -> &str {
        "csv"
    }

    fn consume(&mut self, snapshot: &Snapshot) -> Result<(), PipelineError> {
        self.write_snapshot(snapshot).map(|_| ())
    }

    fn close(&mut self) -> Result<(), PipelineError> {
        log::info!("Closing CSV writer");
        self.writer.flush()?;
        Ok(())
    }
}
