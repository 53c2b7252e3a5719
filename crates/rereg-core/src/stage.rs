//! Workflow stage definitions and per-stage records.

use serde::{Deserialize, Serialize};

/// The ordered stages of a re-registration run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Token and configuration sanity check
    Precondition,

    /// Remove existing agent installations
    Uninstall,

    /// Download the installer
    Download,

    /// Install with the new registration token
    Install,

    /// Look for the broker connection record
    Verify,

    /// Delete the artifact and prune old run logs
    Cleanup,

    /// Close the transcript and reboot
    Reboot,
}

impl Stage {
    /// Stage name as written to the transcript.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Precondition => "precondition",
            Stage::Uninstall => "uninstall",
            Stage::Download => "download",
            Stage::Install => "install",
            Stage::Verify => "verify",
            Stage::Cleanup => "cleanup",
            Stage::Reboot => "reboot",
        }
    }

    /// Stages that run on every post-precondition path, including failures.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Cleanup | Stage::Reboot)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a stage ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    /// Completed, but with recoverable problems.
    Warned,
    /// Ended the happy path.
    Failed,
    /// Not reached, or disabled by configuration.
    Skipped,
}

/// Outcome of a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    /// One-line summary for the report.
    pub detail: String,
    pub duration_ms: u64,
}

impl StageRecord {
    pub fn new(stage: Stage, status: StageStatus, detail: impl Into<String>) -> Self {
        Self {
            stage,
            status,
            detail: detail.into(),
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Whether this stage ended the happy path.
    pub fn failed(&self) -> bool {
        self.status == StageStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Precondition.name(), "precondition");
        assert_eq!(Stage::Uninstall.name(), "uninstall");
        assert_eq!(Stage::Download.name(), "download");
        assert_eq!(Stage::Install.name(), "install");
        assert_eq!(Stage::Verify.name(), "verify");
        assert_eq!(Stage::Cleanup.name(), "cleanup");
        assert_eq!(Stage::Reboot.name(), "reboot");
    }

    #[test]
    fn test_stage_order() {
        assert!(Stage::Uninstall < Stage::Download);
        assert!(Stage::Install < Stage::Verify);
        assert!(Stage::Cleanup < Stage::Reboot);
    }

    #[test]
    fn test_terminal_stages() {
        assert!(Stage::Cleanup.is_terminal());
        assert!(Stage::Reboot.is_terminal());
        assert!(!Stage::Install.is_terminal());
    }

    #[test]
    fn test_stage_record() {
        let record = StageRecord::new(Stage::Install, StageStatus::Failed, "exit 1603").with_duration(42);
        assert!(record.failed());
        assert_eq!(record.duration_ms, 42);
        assert_eq!(record.detail, "exit 1603");
    }
}
