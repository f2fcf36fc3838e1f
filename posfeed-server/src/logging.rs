//! Application logging setup
//!
//! Logging always goes to stderr through `env_logger`. With a session
//! directory every line is also appended to a timestamped file there, and
//! older session files beyond the configured count are removed.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use env_logger::{Builder, Target};
use log::LevelFilter;

use crate::PipelineError;

const SESSION_LOG_PREFIX: &str = "posfeed_";
const SESSION_LOG_EXT: &str = "log";

/// Writes everything to stderr and to the session file
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Install the global logger.
///
/// `RUST_LOG` overrides `level` per module. Returns the session log path when
/// one was opened.
pub fn init(
    level: LevelFilter,
    session_dir: Option<&Path>,
    keep_last: usize,
) -> Result<Option<PathBuf>, PipelineError> {
    let mut builder = Builder::new();
    builder.filter_level(level).parse_default_env();

    let session_log = match session_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let path = dir.join(session_log_name(chrono::Local::now()));
            let file = File::create(&path)?;
            builder
                .format(|buf, record| {
                    writeln!(
                        buf,
                        "{} | {:<7} | {} | {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                        record.level(),
                        record.target(),
                        record.args()
                    )
                })
                .target(Target::Pipe(Box::new(Tee { file })));
            Some(path)
        }
        None => None,
    };

    builder.try_init()?;

    if let (Some(dir), Some(path)) = (session_dir, &session_log) {
        let removed = prune_session_logs(dir, keep_last);
        log::info!(
            "Session log at {} ({} old logs removed)",
            path.display(),
            removed
        );
    }
    Ok(session_log)
}

fn session_log_name<Tz: chrono::TimeZone>(at: chrono::DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}{}.{}",
        SESSION_LOG_PREFIX,
        at.format("%Y-%m-%d_%H-%M-%S"),
        SESSION_LOG_EXT
    )
}

fn is_session_log(path: &Path) -> bool {
    let name_matches = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.starts_with(SESSION_LOG_PREFIX));
    name_matches && path.extension().map_or(false, |e| e == SESSION_LOG_EXT)
}

/// Delete all but the `keep_last` most recently modified session logs in
/// `dir`. Failures are ignored; returns how many files were removed.
pub fn prune_session_logs(dir: &Path, keep_last: usize) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let mut logs: Vec<(SystemTime, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_session_log(p))
        .map(|p| {
            let modified = fs::metadata(&p)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, p)
        })
        .collect();

    // Newest first; names carry the timestamp so they break ties
    logs.sort_by(|a, b| b.cmp(a));

    logs.iter()
        .skip(keep_last)
        .filter(|(_, path)| fs::remove_file(path).is_ok())
        .count()
}
