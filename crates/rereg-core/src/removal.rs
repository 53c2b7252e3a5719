//! Stage 1 outcome classification.
//!
//! Uninstall results are collected per instance and the continuation policy
//! is decided once over the whole set: removal problems never stop the run,
//! because the reinstall that follows is what repairs a half-broken host.

use serde::{Deserialize, Serialize};

use crate::host::InstalledProduct;

/// Classified result of one uninstall attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemovalOutcome {
    Removed,
    /// The uninstaller reported nothing to remove.
    AlreadyAbsent { exit_code: i32 },
    Failed {
        exit_code: Option<i32>,
        reason: String,
    },
}

impl RemovalOutcome {
    /// Classify an uninstaller exit code.
    pub fn from_exit_code(exit_code: i32, already_absent_code: i32) -> Self {
        if exit_code == 0 {
            RemovalOutcome::Removed
        } else if exit_code == already_absent_code {
            RemovalOutcome::AlreadyAbsent { exit_code }
        } else {
            RemovalOutcome::Failed {
                exit_code: Some(exit_code),
                reason: format!("uninstaller exited with code {exit_code}"),
            }
        }
    }

    /// Removed and already-absent both leave the product gone.
    pub fn is_success(&self) -> bool {
        !matches!(self, RemovalOutcome::Failed { .. })
    }

    /// Outcomes that are written to the transcript as warnings.
    pub fn is_warning(&self) -> bool {
        !matches!(self, RemovalOutcome::Removed)
    }
}

/// One instance and what happened to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalAttempt {
    pub product: InstalledProduct,
    pub outcome: RemovalOutcome,
}

/// Everything Stage 1 found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalReport {
    pub attempts: Vec<RemovalAttempt>,
    /// Inventory query failures, one per product name.
    pub inventory_errors: Vec<String>,
}

impl RemovalReport {
    pub fn push(&mut self, product: InstalledProduct, outcome: RemovalOutcome) {
        self.attempts.push(RemovalAttempt { product, outcome });
    }

    pub fn found(&self) -> usize {
        self.attempts.len()
    }

    pub fn removed_count(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.outcome == RemovalOutcome::Removed)
            .count()
    }

    pub fn already_absent_count(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| matches!(a.outcome, RemovalOutcome::AlreadyAbsent { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.attempts.iter().filter(|a| !a.outcome.is_success()).count()
    }

    /// Stage 1 never ends the run; this only tells whether warnings were raised.
    pub fn clean(&self) -> bool {
        self.inventory_errors.is_empty() && self.attempts.iter().all(|a| !a.outcome.is_warning())
    }

    pub fn summary(&self) -> String {
        if self.found() == 0 && self.inventory_errors.is_empty() {
            return "no existing agent installation found".to_string();
        }
        format!(
            "{} found, {} removed, {} already absent, {} failed, {} inventory error(s)",
            self.found(),
            self.removed_count(),
            self.already_absent_count(),
            self.failed_count(),
            self.inventory_errors.len()
        )
    }
}
