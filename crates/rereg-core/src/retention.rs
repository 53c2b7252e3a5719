//! Run-log retention: keep the newest N transcripts, delete the rest.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::transcript::is_transcript_file;

/// A transcript found in the log directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLogFile {
    pub path: PathBuf,
    pub file_name: String,
    /// Creation time, or modification time where the filesystem has none.
    pub created: SystemTime,
}

/// Result of a pruning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneResult {
    pub removed: Vec<PathBuf>,
    pub remaining_count: usize,
    /// Files that could not be deleted, with the reason.
    pub failures: Vec<(PathBuf, String)>,
}

/// Select the files to delete so that only the `keep` newest remain.
///
/// Returned oldest first. Equal creation times fall back to file name order,
/// which follows the embedded start timestamp.
pub fn select_for_removal(mut files: Vec<RunLogFile>, keep: usize) -> Vec<RunLogFile> {
    if files.len() <= keep {
        return Vec::new();
    }
    files.sort_by(|a, b| {
        a.created
            .cmp(&b.created)
            .then_with(|| a.file_name.cmp(&b.file_name))
    });
    let excess = files.len() - keep;
    files.into_iter().take(excess).collect()
}

/// Transcripts written under `base_name` in `log_dir`.
pub fn list_run_logs(log_dir: &Path, base_name: &str) -> std::io::Result<Vec<RunLogFile>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        if !is_transcript_file(base_name, &file_name) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let created = metadata.created().or_else(|_| metadata.modified())?;
        files.push(RunLogFile {
            path: entry.path(),
            file_name,
            created,
        });
    }
    Ok(files)
}

/// Delete all but the `keep` newest transcripts.
///
/// Enumeration errors are returned; individual deletion errors are collected
/// in [`PruneResult::failures`] and do not stop the pass.
pub fn prune_run_logs(log_dir: &Path, base_name: &str, keep: usize) -> std::io::Result<PruneResult> {
    let files = list_run_logs(log_dir, base_name)?;
    let total = files.len();
    let mut result = PruneResult::default();

    for file in select_for_removal(files, keep) {
        match std::fs::remove_file(&file.path) {
            Ok(()) => result.removed.push(file.path),
            Err(e) => result.failures.push((file.path, e.to_string())),
        }
    }

    result.remaining_count = total - result.removed.len();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn log_file(name: &str, secs: u64) -> RunLogFile {
        RunLogFile {
            path: PathBuf::from(name),
            file_name: name.to_string(),
            created: SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
        }
    }

    #[test]
    fn test_nothing_to_remove_under_limit() {
        let files = vec![log_file("a", 1), log_file("b", 2)];
        assert!(select_for_removal(files, 5).is_empty());
    }

    #[test]
    fn test_oldest_by_creation_time_removed() {
        // Name order deliberately disagrees with creation order.
        let files = vec![
            log_file("AVD_3.log", 100),
            log_file("AVD_1.log", 300),
            log_file("AVD_2.log", 200),
            log_file("AVD_4.log", 400),
        ];
        let removed = select_for_removal(files, 2);
        let names: Vec<_> = removed.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["AVD_3.log", "AVD_2.log"]);
    }

    #[test]
    fn test_ties_broken_by_name() {
        let files = vec![
            log_file("AVD_20261018_000003.log", 5),
            log_file("AVD_20261018_000001.log", 5),
            log_file("AVD_20261018_000002.log", 5),
        ];
        let removed = select_for_removal(files, 1);
        let names: Vec<_> = removed.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["AVD_20261018_000001.log", "AVD_20261018_000002.log"]
        );
    }

    #[test]
    fn test_prune_directory() {
        let dir = tempdir().unwrap();
        for i in 0..8 {
            let name = format!("AVD_20261018_0000{:02}.log", i);
            std::fs::write(dir.path().join(name), b"log").unwrap();
        }
        std::fs::write(dir.path().join("RDAgent.msi"), b"msi").unwrap();
        std::fs::write(dir.path().join("Other_20261018_000000.log"), b"x").unwrap();

        let result = prune_run_logs(dir.path(), "AVD", 5).unwrap();
        assert_eq!(result.removed.len(), 3);
        assert_eq!(result.remaining_count, 5);
        assert!(result.failures.is_empty());

        assert!(!dir.path().join("AVD_20261018_000000.log").exists());
        assert!(!dir.path().join("AVD_20261018_000002.log").exists());
        assert!(dir.path().join("AVD_20261018_000003.log").exists());
        assert!(dir.path().join("AVD_20261018_000007.log").exists());
        assert!(dir.path().join("RDAgent.msi").exists());
        assert!(dir.path().join("Other_20261018_000000.log").exists());
    }

    #[test]
    fn test_missing_directory_is_error() {
        let dir = tempdir().unwrap();
        assert!(prune_run_logs(&dir.path().join("absent"), "AVD", 5).is_err());
    }
}
