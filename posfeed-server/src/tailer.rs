//! Log tailing
//!
//! Follows the active dashboard log: detects rotation to a newer file and
//! reads only complete lines appended since the previous cycle.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use posfeed_core::{decode_latin1, BeaconTypeRegistry};

use crate::discovery::LogDiscovery;
use crate::PipelineError;

pub struct LogTailer {
    key: String,
    discovery: LogDiscovery,
    current: Option<PathBuf>,
    /// Byte offset just past the last complete line consumed
    offset: u64,
    /// File length seen by the previous read
    last_len: u64,
    buf: Vec<u8>,
}

impl LogTailer {
    pub fn new(key: impl Into<String>, discovery: LogDiscovery) -> Self {
        LogTailer {
            key: key.into(),
            discovery,
            current: None,
            offset: 0,
            last_len: 0,
            buf: Vec::with_capacity(64 * 1024),
        }
    }

    pub fn current_log(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Check for rotation.
    ///
    /// Returns true when the active log changed; the read position is then
    /// back at the start of the new file.
    pub fn poll(&mut self) -> Result<bool, PipelineError> {
        let Some(latest) = self.discovery.latest()? else {
            return Ok(false);
        };

        if self.current.as_ref() == Some(&latest) {
            return Ok(false);
        }

        log::info!(
            "{}: switching to log {}",
            self.key,
            latest.file_name().unwrap_or_default().to_string_lossy()
        );
        self.current = Some(latest);
        self.offset = 0;
        self.last_len = 0;
        Ok(true)
    }

    /// Read the beacon types from the header of the active log
    pub fn read_registry(&self) -> io::Result<BeaconTypeRegistry> {
        let Some(path) = &self.current else {
            return Ok(BeaconTypeRegistry::new());
        };

        let mut reader = BufReader::new(File::open(path)?);
        let mut raw = Vec::new();
        let mut lines = Vec::new();
        loop {
            raw.clear();
            if reader.read_until(b'\n', &mut raw)? == 0 {
                break;
            }
            let line = decode_latin1(&raw);
            let is_body = line.trim_start().starts_with(|c: char| c.is_ascii_digit());
            lines.push(line);
            if is_body {
                break;
            }
        }

        let registry = BeaconTypeRegistry::parse(&lines);
        log::debug!(
            "{}: header describes {} beacons: {:?}",
            self.key,
            registry.len(),
            registry.iter().collect::<Vec<_>>()
        );
        Ok(registry)
    }

    /// Rewind to the start of the active log (soft restart)
    pub fn reset_offset(&mut self) {
        self.offset = 0;
    }

    /// Feed every complete line appended since the last read to `on_line`.
    ///
    /// A trailing line without its newline is left for the next cycle.
    /// Returns true if the file grew since the previous read.
    pub fn read_growth<F>(&mut self, mut on_line: F) -> Result<bool, PipelineError>
    where
        F: FnMut(&str),
    {
        let Some(path) = &self.current else {
            return Ok(false);
        };

        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("{}: {} vanished: {}", self.key, path.display(), e);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len();
        let grew = len > self.last_len;
        self.last_len = len;

        if len <= self.offset {
            return Ok(grew);
        }

        file.seek(SeekFrom::Start(self.offset))?;
        self.buf.clear();
        file.take(len - self.offset).read_to_end(&mut self.buf)?;

        let Some(end) = self.buf.iter().rposition(|b| *b == b'\n') else {
            return Ok(grew);
        };
        let complete = &self.buf[..=end];

        for raw in complete.split(|b| *b == b'\n') {
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }
            on_line(&decode_latin1(raw));
        }

        self.offset += complete.len() as u64;
        log::trace!("{}: offset now {}", self.key, self.offset);
        Ok(grew)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::io::Write;

    use crate::discovery::DEFAULT_LOG_SUFFIX;

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new().append(true).create(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    fn collect(tailer: &mut LogTailer) -> (bool, Vec<String>) {
        let mut lines = Vec::new();
        let grew = tailer.read_growth(|l| lines.push(l.to_string())).unwrap();
        (grew, lines)
    }

    #[test]
    fn test_incremental_reads() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("2024_01_01__Marvelmind_log.csv");
        append(&log, "[beacon 3]\nHedgehog_mode=1\n");

        let mut tailer = LogTailer::new("test", LogDiscovery::new(dir.path(), DEFAULT_LOG_SUFFIX));
        assert!(tailer.poll().unwrap());
        assert!(!tailer.poll().unwrap());

        let (grew, lines) = collect(&mut tailer);
        assert!(grew);
        assert_eq!(lines, ["[beacon 3]", "Hedgehog_mode=1"]);

        let (grew, lines) = collect(&mut tailer);
        assert!(!grew);
        assert!(lines.is_empty());

        append(&log, "1,2,41,17,3,1.0,2.0,0.0\r\n");
        let (grew, lines) = collect(&mut tailer);
        assert!(grew);
        assert_eq!(lines, ["1,2,41,17,3,1.0,2.0,0.0"]);
        assert_eq!(tailer.offset(), fs::metadata(&log).unwrap().len());
    }

    #[test]
    fn test_partial_line_is_reread_whole() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("a__Marvelmind_log.csv");
        append(&log, "1,2,41,17,3,1.0,2.0,0.0\n1,2,41,17,3,1.");

        let mut tailer = LogTailer::new("test", LogDiscovery::new(dir.path(), DEFAULT_LOG_SUFFIX));
        tailer.poll().unwrap();

        let (grew, lines) = collect(&mut tailer);
        assert!(grew);
        assert_eq!(lines.len(), 1);
        let offset = tailer.offset();
        assert_eq!(offset, "1,2,41,17,3,1.0,2.0,0.0\n".len() as u64);

        // Growth without a newline is still growth, but consumes nothing
        append(&log, "5,2.5");
        let (grew, lines) = collect(&mut tailer);
        assert!(grew);
        assert!(lines.is_empty());
        assert_eq!(tailer.offset(), offset);

        append(&log, ",0.0\n");
        let (_, lines) = collect(&mut tailer);
        assert_eq!(lines, ["1,2,41,17,3,1.5,2.5,0.0"]);
    }

    #[test]
    fn test_rotation_resets_offset() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("2024_01_01__Marvelmind_log.csv");
        append(&first, "1,2,41,17,3,1.0,2.0,0.0\n");

        let mut tailer = LogTailer::new("test", LogDiscovery::new(dir.path(), DEFAULT_LOG_SUFFIX));
        tailer.poll().unwrap();
        collect(&mut tailer);
        assert!(tailer.offset() > 0);

        let second = dir.path().join("2024_01_02__Marvelmind_log.csv");
        append(&second, "[beacon 4]\nHedgehog_mode=0\n");
        assert!(tailer.poll().unwrap());
        assert_eq!(tailer.offset(), 0);
        assert_eq!(tailer.current_log(), Some(second.as_path()));

        let registry = tailer.read_registry().unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reset_offset_rereads_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("a__Marvelmind_log.csv");
        append(&log, "one\ntwo\n");

        let mut tailer = LogTailer::new("test", LogDiscovery::new(dir.path(), DEFAULT_LOG_SUFFIX));
        tailer.poll().unwrap();
        assert_eq!(collect(&mut tailer).1.len(), 2);

        tailer.reset_offset();
        let (grew, lines) = collect(&mut tailer);
        assert!(!grew);
        assert_eq!(lines, ["one", "two"]);
    }

    #[test]
    fn test_registry_reads_only_header() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("a__Marvelmind_log.csv");
        let mut bytes = b"[beacon 3]\nHedgehog_mode=1\n[beacon 6]\nHedgehog_mode=0\n".to_vec();
        bytes.extend_from_slice(b"1,2,41,17,3,1.0,2.0,0.0\n[beacon 9]\nHedgehog_mode=1\n\xff\xfe");
        fs::write(&log, bytes).unwrap();

        let mut tailer = LogTailer::new("test", LogDiscovery::new(dir.path(), DEFAULT_LOG_SUFFIX));
        tailer.poll().unwrap();
        let registry = tailer.read_registry().unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.beacon_type(3), posfeed_core::BeaconType::Mobile);
        assert_eq!(registry.beacon_type(6), posfeed_core::BeaconType::Stationary);
    }

    #[test]
    fn test_no_log_yet() {
        let dir = tempfile::tempdir().unwrap();
        let mut tailer = LogTailer::new("test", LogDiscovery::new(dir.path(), DEFAULT_LOG_SUFFIX));
        assert!(!tailer.poll().unwrap());
        assert_eq!(collect(&mut tailer), (false, vec![]));
    }
}
