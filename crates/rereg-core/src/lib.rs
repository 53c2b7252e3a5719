//! rereg core - session-host agent re-registration
//!
//! Provides the re-registration orchestrator that:
//! - Removes existing broker agent installations
//! - Downloads and installs the agent with a new registration token
//! - Verifies the broker connection against the agent's event channel
//! - Cleans up, prunes old run logs and reboots the host
//!
//! Platform access goes through the traits in [`host`]; the Windows
//! implementations live in the `rereg-host` crate.

pub mod artifact;
pub mod config;
pub mod error;
pub mod fakes;
pub mod host;
pub mod obs;
pub mod orchestrator;
pub mod removal;
pub mod retention;
pub mod stage;
pub mod telemetry;
pub mod transcript;
pub mod verify;

// Re-export key types
pub use config::{RegistrationToken, RunConfig, VerificationPolicy};
pub use error::{ConfigError, HostError, HostResult, RunError};
pub use host::{
    Downloader, EventReader, EventRecord, HostServices, InstallRequest, InstalledProduct,
    Installer, Rebooter, Severity, SoftwareInventory,
};
pub use orchestrator::{ExitStatus, Orchestrator, RunReport};
pub use removal::{RemovalOutcome, RemovalReport};
pub use retention::{prune_run_logs, PruneResult};
pub use stage::{Stage, StageRecord, StageStatus};
pub use telemetry::init_tracing;
pub use transcript::{LogLevel, RunTranscript, TranscriptEntry};
pub use verify::{
    classify_events, poll_for_connection, Verdict, VerificationOutcome, VerificationPlan,
    VerificationReport,
};
