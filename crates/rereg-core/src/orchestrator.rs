//! Re-registration orchestration.
//!
//! Runs the stages in order against a set of [`HostServices`]:
//!
//! ```text
//! precondition -> uninstall -> download -> install -> verify -> cleanup -> reboot
//! ```
//!
//! Only the precondition check can stop a run outright. Once it passes,
//! cleanup and reboot are reached on every path; a failed download or
//! install skips the remaining happy-path stages and nothing else.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::artifact::{self, ArtifactRemoval};
use crate::config::{RunConfig, VerificationPolicy};
use crate::error::RunError;
use crate::host::{HostServices, InstallRequest};
use crate::obs;
use crate::removal::{RemovalOutcome, RemovalReport};
use crate::retention::{self, PruneResult};
use crate::stage::{Stage, StageRecord, StageStatus};
use crate::transcript::{LogLevel, RunTranscript, TranscriptEntry};
use crate::verify::{self, VerificationOutcome, VerificationPlan, VerificationReport};

/// Process exit status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Reached the terminal stage.
    Success,
    /// Precondition failed; nothing on the host was changed.
    ConfigurationError,
    /// Verification was not confirmed under the `enforce` policy.
    VerificationFailed,
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::ConfigurationError => 1,
            ExitStatus::VerificationFailed => 2,
        }
    }
}

/// Everything a run did, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub exit_status: ExitStatus,
    pub stages: Vec<StageRecord>,
    pub removal: Option<RemovalReport>,
    pub artifact_sha256: Option<String>,
    pub verification: Option<VerificationReport>,
    pub pruned: Option<PruneResult>,
    pub rebooted: bool,
    pub transcript_path: Option<PathBuf>,
    pub log: Vec<TranscriptEntry>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.exit_status.code()
    }

    /// Record of `stage`, if the run got that far.
    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    /// Whether `stage` actually executed (recorded and not skipped).
    pub fn ran(&self, stage: Stage) -> bool {
        self.stage(stage)
            .map(|r| r.status != StageStatus::Skipped)
            .unwrap_or(false)
    }

    /// Whether any transcript line contains `needle`.
    pub fn log_contains(&self, needle: &str) -> bool {
        self.log.iter().any(|e| e.message.contains(needle))
    }

    /// Transcript lines at `level`.
    pub fn lines(&self, level: LogLevel) -> Vec<&str> {
        self.log
            .iter()
            .filter(|e| e.level == level)
            .map(|e| e.message.as_str())
            .collect()
    }
}

/// Re-registration orchestrator.
pub struct Orchestrator;

impl Orchestrator {
    /// Execute a full re-registration run.
    ///
    /// Never panics on collaborator failures; every outcome is reflected in
    /// the returned report and the run transcript.
    pub async fn run(config: &RunConfig, host: &HostServices) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id);
        Self::run_stages(config, host, run_id).instrument(span).await
    }

    async fn run_stages(config: &RunConfig, host: &HostServices, run_id: String) -> RunReport {
        let started = Instant::now();
        let transcript = RunTranscript::open(&config.log_dir, &config.log_base_name, &run_id);
        obs::emit_run_started(&run_id, &transcript.path().display().to_string());

        let mut ctx = RunContext {
            run_id: run_id.clone(),
            config,
            host,
            transcript,
            stages: Vec::new(),
            removal: None,
            artifact_sha256: None,
            verification: None,
            pruned: None,
        };
        ctx.transcript
            .info(format!("Starting session host re-registration (run {})", run_id));

        let stage_start = Instant::now();
        if let Err(e) = config.validate() {
            ctx.transcript.error(format!("FATAL: {}", e));
            ctx.transcript
                .error("Aborting before any change to the host; supply a valid registration token");
            ctx.finish(Stage::Precondition, StageStatus::Failed, e.to_string(), stage_start);
            ctx.transcript.close();
            return ctx.into_report(ExitStatus::ConfigurationError, false, started);
        }
        ctx.finish(
            Stage::Precondition,
            StageStatus::Passed,
            "registration token present",
            stage_start,
        );

        ctx.remove_existing().await;

        let mut exit_status = ExitStatus::Success;
        match ctx.happy_path().await {
            Ok(report) => {
                if !report.outcome.is_confirmed()
                    && config.verification_policy == VerificationPolicy::Enforce
                {
                    ctx.transcript.error(
                        "Verification not confirmed and policy is 'enforce'; run marked failed",
                    );
                    exit_status = ExitStatus::VerificationFailed;
                }
            }
            Err(e) => {
                ctx.transcript.error(format!("FATAL: {}", e));
                ctx.transcript
                    .warn("Skipping remaining install steps; continuing to cleanup and reboot");
                for stage in [Stage::Download, Stage::Install, Stage::Verify] {
                    if ctx.record(stage).is_none() {
                        ctx.push(StageRecord::new(
                            stage,
                            StageStatus::Skipped,
                            "not reached",
                        ));
                    }
                }
            }
        }

        ctx.cleanup();

        let reboot = exit_status != ExitStatus::VerificationFailed;
        let rebooted = ctx.terminate(reboot).await;

        let report = ctx.into_report(exit_status, rebooted, started);
        obs::emit_run_finished(
            &report.run_id,
            report.exit_code(),
            report.duration_ms,
            report.rebooted,
        );
        report
    }
}

struct RunContext<'a> {
    run_id: String,
    config: &'a RunConfig,
    host: &'a HostServices,
    transcript: RunTranscript,
    stages: Vec<StageRecord>,
    removal: Option<RemovalReport>,
    artifact_sha256: Option<String>,
    verification: Option<VerificationReport>,
    pruned: Option<PruneResult>,
}

impl RunContext<'_> {
    fn push(&mut self, record: StageRecord) {
        obs::emit_stage_finished(record.stage, record.status, record.duration_ms);
        self.stages.push(record);
    }

    fn finish(&mut self, stage: Stage, status: StageStatus, detail: impl Into<String>, since: Instant) {
        let record =
            StageRecord::new(stage, status, detail).with_duration(since.elapsed().as_millis() as u64);
        self.push(record);
    }

    fn record(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    /// Stage 1. Problems are warnings; the run always continues.
    async fn remove_existing(&mut self) {
        let start = Instant::now();
        self.transcript.info("Checking for existing agent installations");

        let config = self.config;
        let mut report = RemovalReport::default();
        let mut found = Vec::new();
        let mut seen = HashSet::new();

        for name in &config.agent_product_names {
            match self.host.inventory.list_installed(name).await {
                Ok(products) => {
                    for product in products {
                        if seen.insert(product.id.clone()) {
                            found.push(product);
                        }
                    }
                }
                Err(e) => {
                    self.transcript.warn(format!(
                        "Could not query installed software for '{}': {}; continuing with reinstall",
                        name, e
                    ));
                    report.inventory_errors.push(format!("{}: {}", name, e));
                }
            }
        }

        if found.is_empty() && report.inventory_errors.is_empty() {
            self.transcript
                .info("No existing agent installation found; nothing to remove");
        }

        for product in found {
            self.transcript.info(format!(
                "Uninstalling {} {} ({})",
                product.display_name,
                product.version.as_deref().unwrap_or(""),
                product.id
            ));

            let outcome = match self.host.inventory.uninstall(&product).await {
                Ok(code) => RemovalOutcome::from_exit_code(code, config.already_absent_exit_code),
                Err(e) => RemovalOutcome::Failed {
                    exit_code: None,
                    reason: e.to_string(),
                },
            };

            match &outcome {
                RemovalOutcome::Removed => {
                    self.transcript.success(format!("Removed {}", product.id));
                }
                RemovalOutcome::AlreadyAbsent { exit_code } => {
                    self.transcript.warn(format!(
                        "{} was already absent (exit code {}); treating as removed",
                        product.id, exit_code
                    ));
                }
                RemovalOutcome::Failed { reason, .. } => {
                    self.transcript.warn(format!(
                        "Uninstall of {} failed: {}; continuing",
                        product.id, reason
                    ));
                }
            }
            report.push(product, outcome);
        }

        let status = if report.clean() {
            StageStatus::Passed
        } else {
            StageStatus::Warned
        };
        let summary = report.summary();
        self.removal = Some(report);
        self.finish(Stage::Uninstall, status, summary, start);
    }

    /// Stages 2-4. The first error ends the happy path.
    async fn happy_path(&mut self) -> Result<VerificationReport, RunError> {
        self.acquire().await?;
        self.install().await?;
        Ok(self.verify().await)
    }

    /// Stage 2.
    async fn acquire(&mut self) -> Result<(), RunError> {
        let start = Instant::now();
        let config = self.config;
        let dest = config.installer_path();
        let url = &config.agent_download_url;
        self.transcript.info(format!(
            "Downloading agent installer from {} to {}",
            url,
            dest.display()
        ));

        let fetched = match std::fs::create_dir_all(&config.temp_dir) {
            Ok(()) => self.host.downloader.fetch(url, &dest).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = fetched {
            self.finish(Stage::Download, StageStatus::Failed, e.to_string(), start);
            return Err(RunError::Acquisition(e));
        }

        let pinned = config.installer_sha256.as_deref();
        match artifact::file_digest(&dest) {
            Ok(digest) => {
                self.transcript.info(format!("Installer SHA-256: {}", digest));
                if let Err(e) = artifact::check_digest(&digest, pinned) {
                    self.finish(Stage::Download, StageStatus::Failed, e.to_string(), start);
                    return Err(e);
                }
                self.artifact_sha256 = Some(digest);
            }
            Err(e) if pinned.is_some() => {
                self.finish(Stage::Download, StageStatus::Failed, e.to_string(), start);
                return Err(RunError::Acquisition(e.into()));
            }
            Err(e) => {
                self.transcript
                    .warn(format!("Could not hash downloaded installer: {}", e));
            }
        }

        self.transcript.success("Agent installer downloaded");
        self.finish(
            Stage::Download,
            StageStatus::Passed,
            dest.display().to_string(),
            start,
        );
        Ok(())
    }

    /// Stage 3.
    async fn install(&mut self) -> Result<(), RunError> {
        let start = Instant::now();
        let package = self.config.installer_path();
        let log_file = self.config.installer_log_path();
        self.transcript
            .info("Installing agent with the new registration token");

        let request = InstallRequest {
            package: &package,
            token: &self.config.registration_token,
            log_file: Some(&log_file),
        };
        match self.host.installer.install(request).await {
            Ok(0) => {
                self.transcript.success("Agent installed");
                self.finish(Stage::Install, StageStatus::Passed, "exit code 0", start);
                Ok(())
            }
            Ok(exit_code) => {
                self.transcript.error(format!(
                    "Installer exited with code {}; see {}",
                    exit_code,
                    log_file.display()
                ));
                self.finish(
                    Stage::Install,
                    StageStatus::Failed,
                    format!("exit code {}", exit_code),
                    start,
                );
                Err(RunError::Installation { exit_code })
            }
            Err(e) => {
                self.finish(Stage::Install, StageStatus::Failed, e.to_string(), start);
                Err(RunError::InstallerUnavailable(e))
            }
        }
    }

    /// Stage 4. Observational; the caller applies the policy.
    async fn verify(&mut self) -> VerificationReport {
        let start = Instant::now();
        let plan = VerificationPlan::from_config(self.config);
        self.transcript.info(format!(
            "Waiting {}s for the agent to contact the broker, then checking '{}' (up to {} attempt(s))",
            plan.initial_delay.as_secs(),
            plan.channel,
            plan.max_attempts
        ));

        let report = verify::poll_for_connection(self.host.events.as_ref(), &plan).await;
        let window_mins = plan.window.as_secs() / 60;

        match &report.outcome {
            VerificationOutcome::Confirmed { event } => {
                self.transcript.success(format!(
                    "VERIFICATION SUCCESS: broker connection confirmed at {} (event {}): {}",
                    event.timestamp.to_rfc3339(),
                    event.id,
                    event.message
                ));
            }
            VerificationOutcome::Errors { errors } => {
                self.transcript.warn(format!(
                    "VERIFICATION FAILED: no connection record; {} error event(s) in '{}'",
                    errors.len(),
                    plan.channel
                ));
                for event in errors {
                    self.transcript.error(format!(
                        "Event {} at {} [{}]: {}",
                        event.id,
                        event.timestamp.to_rfc3339(),
                        event.severity.as_str(),
                        event.message
                    ));
                }
                self.transcript
                    .warn("Reboot will proceed; check the agent logs after restart");
            }
            VerificationOutcome::NoEvents => {
                self.transcript.warn(format!(
                    "No events in '{}' within the last {} minute(s); manual verification needed",
                    plan.channel, window_mins
                ));
            }
            VerificationOutcome::Indeterminate { seen } => {
                self.transcript.warn(format!(
                    "VERIFICATION INCONCLUSIVE: {} event(s) found but none confirm a broker connection",
                    seen
                ));
            }
            VerificationOutcome::QueryFailed { reason } => {
                self.transcript.warn(format!(
                    "Could not read '{}': {}; manual verification needed",
                    plan.channel, reason
                ));
            }
        }

        let status = if report.outcome.is_confirmed() {
            StageStatus::Passed
        } else if self.config.verification_policy == VerificationPolicy::Enforce {
            StageStatus::Failed
        } else {
            StageStatus::Warned
        };
        let detail = format!("{:?} after {} attempt(s)", report.outcome.verdict(), report.attempts);
        self.verification = Some(report.clone());
        self.finish(Stage::Verify, status, detail, start);
        report
    }

    /// Stage 5. Every failure here is a warning.
    fn cleanup(&mut self) {
        let start = Instant::now();
        let mut warned = false;

        let artifact_path = self.config.installer_path();
        match artifact::remove_artifact(&artifact_path) {
            ArtifactRemoval::Removed => self.transcript.info(format!(
                "Removed installer artifact {}",
                artifact_path.display()
            )),
            ArtifactRemoval::NotPresent => self.transcript.info("No installer artifact to remove"),
            ArtifactRemoval::Failed(reason) => {
                warned = true;
                self.transcript.warn(format!(
                    "Could not remove installer artifact {}: {}",
                    artifact_path.display(),
                    reason
                ));
            }
        }

        match retention::prune_run_logs(
            &self.config.log_dir,
            &self.config.log_base_name,
            self.config.retain_logs,
        ) {
            Ok(result) => {
                self.transcript.info(format!(
                    "Run logs: removed {}, kept {} (retention {})",
                    result.removed.len(),
                    result.remaining_count,
                    self.config.retain_logs
                ));
                for (path, reason) in &result.failures {
                    warned = true;
                    self.transcript.warn(format!(
                        "Could not delete old run log {}: {}",
                        path.display(),
                        reason
                    ));
                }
                self.pruned = Some(result);
            }
            Err(e) => {
                warned = true;
                self.transcript.warn(format!(
                    "Could not enumerate run logs in {}: {}",
                    self.config.log_dir.display(),
                    e
                ));
            }
        }

        let status = if warned {
            StageStatus::Warned
        } else {
            StageStatus::Passed
        };
        self.finish(Stage::Cleanup, status, "artifact and run logs", start);
    }

    /// Stage 6. Closes the transcript, then asks for a forced reboot.
    async fn terminate(&mut self, allowed: bool) -> bool {
        let start = Instant::now();

        if !allowed {
            self.transcript
                .warn("Reboot skipped: verification failed under the enforce policy");
            self.transcript.close();
            self.finish(
                Stage::Reboot,
                StageStatus::Skipped,
                "verification not confirmed",
                start,
            );
            return false;
        }
        if !self.config.reboot {
            self.transcript.info("Reboot disabled by configuration");
            self.transcript.close();
            self.finish(Stage::Reboot, StageStatus::Skipped, "disabled", start);
            return false;
        }

        self.transcript.info("Rebooting host now");
        self.transcript.close();

        match self.host.rebooter.reboot(true).await {
            Ok(()) => {
                self.finish(Stage::Reboot, StageStatus::Passed, "forced reboot requested", start);
                true
            }
            Err(e) => {
                obs::emit_reboot_error(&self.run_id, &e);
                self.transcript.error(format!("Reboot request failed: {}", e));
                self.finish(Stage::Reboot, StageStatus::Failed, e.to_string(), start);
                false
            }
        }
    }

    fn into_report(
        self,
        exit_status: ExitStatus,
        rebooted: bool,
        started: Instant,
    ) -> RunReport {
        let transcript_path = if self.transcript.path().as_os_str().is_empty() {
            None
        } else {
            Some(self.transcript.path().to_path_buf())
        };
        RunReport {
            run_id: self.run_id,
            exit_status,
            stages: self.stages,
            removal: self.removal,
            artifact_sha256: self.artifact_sha256,
            verification: self.verification,
            pruned: self.pruned,
            rebooted,
            transcript_path,
            log: self.transcript.into_entries(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}
