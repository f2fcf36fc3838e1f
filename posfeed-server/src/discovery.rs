//! Log file discovery
//!
//! The dashboard starts a new log file per session, named with a leading
//! timestamp, so the newest log is the one sorting last by name.

use std::fs;
use std::path::{Path, PathBuf};

use crate::PipelineError;

pub const DEFAULT_LOG_SUFFIX: &str = "__Marvelmind_log.csv";

#[derive(Debug, Clone)]
pub struct LogDiscovery {
    dir: PathBuf,
    suffix: String,
}

impl LogDiscovery {
    pub fn new(dir: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        LogDiscovery {
            dir: dir.into(),
            suffix: suffix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All matching log files, oldest first
    pub fn list_logs(&self) -> Result<Vec<PathBuf>, PipelineError> {
        if !self.dir.is_dir() {
            return Err(PipelineError::NoLogDirectory(self.dir.clone()));
        }

        let mut logs = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let matches = path
                .file_name()
                .and_then(|name| name.to_str())
                .map_or(false, |name| name.ends_with(&self.suffix));
            if matches && path.is_file() {
                logs.push(path);
            }
        }
        logs.sort();
        Ok(logs)
    }

    /// The active log, or `None` if the directory holds no logs yet
    pub fn latest(&self) -> Result<Option<PathBuf>, PipelineError> {
        Ok(self.list_logs()?.pop())
    }
}
