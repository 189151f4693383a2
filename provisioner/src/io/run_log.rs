//! Durable, append-only run log.
//!
//! Every record is one line `TIMESTAMP LEVEL message`, appended to the log file
//! before the call returns and mirrored to tracing for the console. A log file
//! that cannot be opened or written degrades the run to console-only logging;
//! it never aborts provisioning.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use tracing::{error, info, warn};

use crate::core::types::Level;

pub struct RunLog {
    sink: Mutex<Option<Sink>>,
}

struct Sink {
    path: PathBuf,
    file: File,
}

impl RunLog {
    /// Open (or create) the log file for appending.
    ///
    /// Falls back to console-only logging with a single warning if the file
    /// cannot be opened.
    pub fn open(path: &Path) -> Self {
        match open_append(path) {
            Ok(file) => Self {
                sink: Mutex::new(Some(Sink {
                    path: path.to_path_buf(),
                    file,
                })),
            },
            Err(err) => {
                warn!(
                    path = %path.display(),
                    err = %err,
                    "run log unavailable, logging to console only"
                );
                Self::console_only()
            }
        }
    }

    pub fn console_only() -> Self {
        Self {
            sink: Mutex::new(None),
        }
    }

    /// Path of the durable sink, if it is still active.
    pub fn path(&self) -> Option<PathBuf> {
        let guard = self.sink.lock().ok()?;
        guard.as_ref().map(|sink| sink.path.clone())
    }

    pub fn log(&self, level: Level, message: &str) {
        match level {
            Level::Info => info!("{message}"),
            Level::Warn => warn!("{message}"),
            Level::Error => error!("{message}"),
        }

        let Ok(mut guard) = self.sink.lock() else {
            return;
        };
        if let Some(sink) = guard.as_mut() {
            let line = format_line(&timestamp(), level, message);
            if let Err(err) = sink.file.write_all(line.as_bytes()) {
                // Drop the sink so later records go to the console only.
                *guard = None;
                warn!(err = %err, "run log write failed, logging to console only");
            }
        }
    }

    pub fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Single log line; embedded newlines are escaped so one record stays one line.
fn format_line(timestamp: &str, level: Level, message: &str) -> String {
    let flat = message.replace('\n', "\\n");
    format!("{timestamp} {:<5} {flat}\n", level.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_line_per_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("logs").join("run.log");
        let log = RunLog::open(&path);
        log.info("first");
        log.warn("second\nline");
        log.error("third");

        let contents = fs::read_to_string(&path).expect("read log");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("INFO  first"));
        assert!(lines[1].ends_with("WARN  second\\nline"));
        assert!(lines[2].ends_with("ERROR third"));
    }

    #[test]
    fn reopening_appends_rather_than_truncates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("run.log");
        RunLog::open(&path).info("one");
        RunLog::open(&path).info("two");

        let contents = fs::read_to_string(&path).expect("read log");
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn unwritable_sink_degrades_to_console() {
        let temp = tempfile::tempdir().expect("tempdir");
        // A directory cannot be opened for appending.
        let log = RunLog::open(temp.path());
        assert!(log.path().is_none());
        log.error("still fine");
    }

    #[test]
    fn failed_write_forgets_the_log_path() {
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        let log = RunLog::open(full);
        assert_eq!(log.path().as_deref(), Some(full));
        log.info("no space");
        assert!(log.path().is_none());
        log.warn("console only");
    }

    #[test]
    fn line_format_is_stable() {
        let line = format_line("2026-01-01T00:00:00.000Z", Level::Warn, "hello");
        assert_eq!(line, "2026-01-01T00:00:00.000Z WARN  hello\n");
    }
}
