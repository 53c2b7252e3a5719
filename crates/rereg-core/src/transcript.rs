//! Run transcript: the persisted, append-only log of a single run.
//!
//! Each line is written to `<log_dir>/<base>_<YYYYMMDD_HHMMSS>.log` (with a
//! `-N` suffix when that name is taken), mirrored to `tracing` at the
//! matching level and kept in memory for the run report.
//! A transcript that cannot be opened degrades to tracing plus memory; the
//! run itself never fails because of logging.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Timestamp format embedded in transcript file names.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Transcript line level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn label(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

/// One transcript line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl TranscriptEntry {
    fn render(&self) -> String {
        format!(
            "{} [{}] {}",
            self.timestamp
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S"),
            self.level.label(),
            self.message
        )
    }
}

/// Deterministic transcript file name for a run started at `started`.
pub fn transcript_file_name(base_name: &str, started: DateTime<Local>) -> String {
    format!("{}_{}.log", base_name, started.format(FILE_TIMESTAMP_FORMAT))
}

/// Most name collisions tolerated before giving up on a file.
const MAX_NAME_COLLISIONS: usize = 100;

/// Create `name` in `log_dir`, or `<stem>-N.log` when runs started in the same second.
fn create_unique(log_dir: &Path, name: &str) -> std::io::Result<(PathBuf, File)> {
    let stem = name.strip_suffix(".log").unwrap_or(name);
    for n in 0..MAX_NAME_COLLISIONS {
        let candidate = if n == 0 {
            name.to_string()
        } else {
            format!("{}-{}.log", stem, n)
        };
        let path = log_dir.join(candidate);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free transcript name for {}", name),
    ))
}

/// Whether `file_name` looks like a transcript written under `base_name`.
pub fn is_transcript_file(base_name: &str, file_name: &str) -> bool {
    file_name
        .strip_prefix(base_name)
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|rest| rest.strip_suffix(".log"))
        .map(|stamp| !stamp.is_empty())
        .unwrap_or(false)
}

/// Append-only transcript for one run.
#[derive(Debug)]
pub struct RunTranscript {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    entries: Vec<TranscriptEntry>,
}

impl RunTranscript {
    /// Create `log_dir` if needed and open a fresh transcript file for this run.
    pub fn open(log_dir: &Path, base_name: &str, run_id: &str) -> Self {
        let started = Local::now();
        let name = transcript_file_name(base_name, started);

        let opened = std::fs::create_dir_all(log_dir).and_then(|_| create_unique(log_dir, &name));
        let (path, writer) = match opened {
            Ok((path, file)) => (path, Ok(BufWriter::new(file))),
            Err(e) => (log_dir.join(&name), Err(e)),
        };

        let writer = match writer {
            Ok(mut w) => {
                let header = format!(
                    "=== run {} on {} started {} ===",
                    run_id,
                    host_name(),
                    started.to_rfc3339()
                );
                match writeln!(w, "{}", header) {
                    Ok(()) => Some(w),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Transcript not writable");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not open transcript");
                None
            }
        };

        Self {
            path,
            writer,
            entries: Vec::new(),
        }
    }

    /// Transcript kept in memory and tracing only.
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            writer: None,
            entries: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether lines are reaching a file.
    pub fn is_persistent(&self) -> bool {
        self.writer.is_some()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.record(LogLevel::Info, message.into());
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.record(LogLevel::Success, message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.record(LogLevel::Warning, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.record(LogLevel::Error, message.into());
    }

    fn record(&mut self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info | LogLevel::Success => info!(kind = level.label(), "{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }

        let entry = TranscriptEntry {
            timestamp: Utc::now(),
            level,
            message,
        };

        if let Some(w) = self.writer.as_mut() {
            if let Err(e) = writeln!(w, "{}", entry.render()) {
                warn!(path = %self.path.display(), error = %e, "Transcript write failed; continuing without file");
                self.writer = None;
            }
        }
        self.entries.push(entry);
    }

    /// Flush and close the file. Later lines only reach tracing and memory.
    pub fn close(&mut self) {
        if let Some(mut w) = self.writer.take() {
            let footer = format!("=== transcript closed {} ===", Local::now().to_rfc3339());
            if let Err(e) = writeln!(w, "{}", footer).and_then(|_| w.flush()) {
                warn!(path = %self.path.display(), error = %e, "Transcript flush failed");
            }
        }
    }

    /// Number of lines at `level`.
    pub fn count(&self, level: LogLevel) -> usize {
        self.entries.iter().filter(|e| e.level == level).count()
    }

    pub fn into_entries(mut self) -> Vec<TranscriptEntry> {
        self.close();
        std::mem::take(&mut self.entries)
    }
}

impl Drop for RunTranscript {
    fn drop(&mut self) {
        self.close();
    }
}

fn host_name() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn test_file_name_is_deterministic() {
        let ts = Local.with_ymd_and_hms(2026, 10, 18, 9, 5, 7).unwrap();
        assert_eq!(
            transcript_file_name("AVD-Reregistration", ts),
            "AVD-Reregistration_20261018_090507.log"
        );
    }

    #[test]
    fn test_is_transcript_file() {
        assert!(is_transcript_file("AVD", "AVD_20261018_090507.log"));
        assert!(!is_transcript_file("AVD", "AVD_.log"));
        assert!(!is_transcript_file("AVD", "AVD_20261018_090507.txt"));
        assert!(!is_transcript_file("AVD", "Other_20261018_090507.log"));
        assert!(!is_transcript_file("AVD", "RDAgent.msi"));
    }

    #[test]
    fn test_lines_written_and_kept() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let mut transcript = RunTranscript::open(&log_dir, "AVD", "run-1");
        assert!(transcript.is_persistent());

        transcript.info("starting");
        transcript.warn("something odd");
        transcript.success("VERIFICATION SUCCESS");
        transcript.close();

        assert_eq!(transcript.entries().len(), 3);
        assert_eq!(transcript.count(LogLevel::Warning), 1);

        let content = std::fs::read_to_string(transcript.path()).unwrap();
        assert!(content.contains("run-1"));
        assert!(content.contains("[WARNING] something odd"));
        assert!(content.contains("[SUCCESS] VERIFICATION SUCCESS"));
        assert!(content.contains("transcript closed"));
    }

    #[test]
    fn test_same_second_runs_get_distinct_files() {
        let dir = tempdir().unwrap();
        let mut first = RunTranscript::open(dir.path(), "AVD", "run-a");
        let mut second = RunTranscript::open(dir.path(), "AVD", "run-b");
        first.close();
        second.close();

        assert_ne!(first.path(), second.path());
        let first_content = std::fs::read_to_string(first.path()).unwrap();
        let second_content = std::fs::read_to_string(second.path()).unwrap();
        assert!(first_content.contains("run-a") && !first_content.contains("run-b"));
        assert!(second_content.contains("run-b"));

        let name = second.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(is_transcript_file("AVD", &name));
    }

    #[test]
    fn test_create_unique_appends_counter() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("AVD_20261018_090507.log"), b"taken").unwrap();
        let (path, _file) = create_unique(dir.path(), "AVD_20261018_090507.log").unwrap();
        assert_eq!(path, dir.path().join("AVD_20261018_090507-1.log"));
    }

    #[test]
    fn test_lines_after_close_stay_in_memory() {
        let dir = tempdir().unwrap();
        let mut transcript = RunTranscript::open(dir.path(), "AVD", "run-2");
        transcript.close();
        transcript.info("after close");

        let content = std::fs::read_to_string(transcript.path()).unwrap();
        assert!(!content.contains("after close"));
        assert_eq!(transcript.entries().len(), 1);
    }

    #[test]
    fn test_in_memory_transcript() {
        let mut transcript = RunTranscript::in_memory();
        transcript.error("boom");
        assert!(!transcript.is_persistent());
        assert_eq!(transcript.count(LogLevel::Error), 1);
    }
}
