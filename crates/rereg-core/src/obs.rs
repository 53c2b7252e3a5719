//! Structured lifecycle events for a re-registration run.
//!
//! Emitted at `info!` level alongside the transcript so that log shippers
//! get machine-readable fields (`event`, `run_id`, `stage`, ...).

use tracing::info;

use crate::stage::{Stage, StageStatus};

/// Span tagged with the run_id; instrument the run future with it so every
/// event inside carries the id.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("rereg.run", run_id = %run_id)
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, transcript: &str) {
    info!(event = "run.started", run_id = %run_id, transcript = %transcript);
}

/// Emit event: a stage finished.
pub fn emit_stage_finished(stage: Stage, status: StageStatus, duration_ms: u64) {
    info!(
        event = "stage.finished",
        stage = stage.name(),
        status = ?status,
        duration_ms = duration_ms,
    );
}

/// Emit event: run finished with exit code and duration.
pub fn emit_run_finished(run_id: &str, exit_code: i32, duration_ms: u64, rebooted: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        exit_code = exit_code,
        duration_ms = duration_ms,
        rebooted = rebooted,
    );
}

/// Emit event: reboot request failed (warning level).
pub fn emit_reboot_error(run_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "run.reboot_error", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let span = run_span("test-run-id");
        let _guard = span.enter();
        emit_stage_finished(Stage::Install, StageStatus::Passed, 5);
    }
}
