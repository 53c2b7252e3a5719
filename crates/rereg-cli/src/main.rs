//! rereg - session-host agent re-registration CLI
//!
//! Moves a session host to a new host pool by reinstalling the broker agent
//! with a fresh registration token.
//!
//! ## Commands
//!
//! - `run`: full re-registration (uninstall, download, install, verify, cleanup, reboot)
//! - `verify`: check the agent event channel for a broker connection record
//! - `prune-logs`: apply the run-log retention policy

mod args;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rereg_core::config::MAX_VERIFICATION_SECS;
use rereg_core::{
    poll_for_connection, prune_run_logs, LogLevel, Orchestrator, RunReport, StageStatus,
    VerificationOutcome, VerificationPlan,
};
use tracing::{error, info, Level};

use crate::args::ConfigArgs;

#[derive(Parser)]
#[command(name = "rereg")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Re-register a session host with a new host pool", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove the agent, reinstall it with a new token, verify and reboot
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Leave the host running after the run
        #[arg(long)]
        no_reboot: bool,

        /// Print the run report as JSON on stdout
        #[arg(long)]
        json_report: bool,
    },

    /// Check for a broker connection record without changing the host
    ///
    /// Exits 0 when the connection is confirmed, 2 otherwise.
    Verify {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Delete run transcripts beyond the retention count
    PruneLogs {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    rereg_core::init_tracing(cli.json, level);

    let result = match cli.command {
        Commands::Run {
            config,
            no_reboot,
            json_report,
        } => cmd_run(&config, no_reboot, json_report).await,
        Commands::Verify { config } => cmd_verify(&config).await,
        Commands::PruneLogs { config } => cmd_prune_logs(&config),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("rereg failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

/// Full re-registration run
async fn cmd_run(args: &ConfigArgs, no_reboot: bool, json_report: bool) -> Result<u8> {
    let mut config = args.load().context("Failed to load configuration")?;
    if no_reboot {
        config.reboot = false;
    }
    let host = rereg_host::host_services().context("Failed to set up host services")?;

    let report = Orchestrator::run(&config, &host).await;

    if json_report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(report.exit_code() as u8)
}

fn print_summary(report: &RunReport) {
    println!("Run {}", report.run_id);
    for record in &report.stages {
        let mark = match record.status {
            StageStatus::Passed => "ok",
            StageStatus::Warned => "warn",
            StageStatus::Failed => "FAIL",
            StageStatus::Skipped => "skip",
        };
        println!("  {:<13} {:<5} {}", record.stage.name(), mark, record.detail);
    }
    println!(
        "Warnings: {}, errors: {}",
        report.lines(LogLevel::Warning).len(),
        report.lines(LogLevel::Error).len()
    );
    if let Some(path) = &report.transcript_path {
        println!("Transcript: {}", path.display());
    }
    println!("Exit code: {}", report.exit_code());
}

/// Post-hoc verification against the event channel
async fn cmd_verify(args: &ConfigArgs) -> Result<u8> {
    let mut config = args.load().context("Failed to load configuration")?;
    if args.verification_delay.is_none() {
        config.verification_delay_secs = 0;
    }
    for secs in [
        config.verification_delay_secs,
        config.verification_window_secs,
        config.verification_poll_interval_secs,
    ] {
        anyhow::ensure!(
            secs <= MAX_VERIFICATION_SECS,
            "verification timing values must be at most {} seconds",
            MAX_VERIFICATION_SECS
        );
    }
    let host = rereg_host::host_services().context("Failed to set up host services")?;
    let plan = VerificationPlan::from_config(&config);

    info!(channel = %plan.channel, window_secs = plan.window.as_secs(), "Checking broker connection");
    let report = poll_for_connection(host.events.as_ref(), &plan).await;

    match &report.outcome {
        VerificationOutcome::Confirmed { event } => {
            println!(
                "Connected: event {} at {}: {}",
                event.id,
                event.timestamp.to_rfc3339(),
                event.message
            );
        }
        VerificationOutcome::Errors { errors } => {
            println!("Not connected; {} error event(s):", errors.len());
            for event in errors {
                println!(
                    "  {} {} [{}] {}",
                    event.timestamp.to_rfc3339(),
                    event.id,
                    event.severity.as_str(),
                    event.message
                );
            }
        }
        VerificationOutcome::NoEvents => {
            println!(
                "No events in '{}' within the last {}s",
                plan.channel,
                plan.window.as_secs()
            );
        }
        VerificationOutcome::Indeterminate { seen } => {
            println!("{} event(s) found, none confirm a broker connection", seen);
        }
        VerificationOutcome::QueryFailed { reason } => {
            println!("Could not read '{}': {}", plan.channel, reason);
        }
    }

    Ok(if report.outcome.is_confirmed() { 0 } else { 2 })
}

/// Apply the run-log retention policy only
fn cmd_prune_logs(args: &ConfigArgs) -> Result<u8> {
    let config = args.load().context("Failed to load configuration")?;
    anyhow::ensure!(config.retain_logs > 0, "retain_logs must be at least 1");

    let result = prune_run_logs(&config.log_dir, &config.log_base_name, config.retain_logs)
        .with_context(|| format!("Failed to list run logs in {}", config.log_dir.display()))?;

    for path in &result.removed {
        println!("Removed {}", path.display());
    }
    for (path, reason) in &result.failures {
        eprintln!("Could not remove {}: {}", path.display(), reason);
    }
    println!(
        "Kept {} run log(s) in {}",
        result.remaining_count,
        config.log_dir.display()
    );
    Ok(0)
}
