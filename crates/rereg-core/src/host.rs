//! Collaborator traits consumed by the orchestrator.
//!
//! These define the narrow seams between the workflow and the platform:
//! - `SoftwareInventory`: list and uninstall installed products
//! - `Downloader`: fetch the installer artifact
//! - `Installer`: run the installer with the registration token
//! - `EventReader`: query the agent's event channel
//! - `Rebooter`: restart the host
//!
//! All traits are async and platform-agnostic. In-memory fakes live in the
//! `fakes` module; the Windows implementations live in `rereg-host`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RegistrationToken;
use crate::error::HostResult;

/// One inventory entry matching an agent product name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledProduct {
    /// Removal handle (MSI product code).
    pub id: String,
    pub display_name: String,
    pub version: Option<String>,
}

/// Parameters handed to the installer.
#[derive(Debug, Clone)]
pub struct InstallRequest<'a> {
    pub package: &'a Path,
    pub token: &'a RegistrationToken,
    /// Optional verbose installer log.
    pub log_file: Option<&'a Path>,
}

/// Event severity, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Error,
    Warning,
    Information,
    Verbose,
}

impl Severity {
    /// Map a Windows event `Level` value.
    pub fn from_level(level: u8) -> Self {
        match level {
            1 => Severity::Critical,
            2 => Severity::Error,
            3 => Severity::Warning,
            5 => Severity::Verbose,
            _ => Severity::Information,
        }
    }

    /// Critical and error records count as failures.
    pub fn is_error(&self) -> bool {
        matches!(self, Severity::Critical | Severity::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Information => "information",
            Severity::Verbose => "verbose",
        }
    }
}

/// A record read from the system event store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: u32,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
}

/// Installed-software inventory and uninstaller.
#[async_trait]
pub trait SoftwareInventory: Send + Sync {
    /// Entries whose display name equals `name` (case-insensitive).
    async fn list_installed(&self, name: &str) -> HostResult<Vec<InstalledProduct>>;

    /// Remove one entry silently, without restarting. Returns the exit code.
    async fn uninstall(&self, product: &InstalledProduct) -> HostResult<i32>;
}

/// Artifact transport.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch `url` to `dest`, replacing anything already there.
    async fn fetch(&self, url: &str, dest: &Path) -> HostResult<()>;
}

/// Installer invoker.
#[async_trait]
pub trait Installer: Send + Sync {
    /// Install silently, without restarting. Returns the exit code.
    async fn install(&self, request: InstallRequest<'_>) -> HostResult<i32>;
}

/// Read-only access to the event store.
#[async_trait]
pub trait EventReader: Send + Sync {
    /// Records in `channel` created at or after `since`. An empty channel is `Ok(vec![])`.
    async fn query(&self, channel: &str, since: DateTime<Utc>) -> HostResult<Vec<EventRecord>>;
}

/// Host restart primitive.
#[async_trait]
pub trait Rebooter: Send + Sync {
    /// Request a restart. Production implementations do not wait for it.
    async fn reboot(&self, force: bool) -> HostResult<()>;
}

/// The set of collaborators a run talks to.
#[derive(Clone)]
pub struct HostServices {
    pub inventory: Arc<dyn SoftwareInventory>,
    pub downloader: Arc<dyn Downloader>,
    pub installer: Arc<dyn Installer>,
    pub events: Arc<dyn EventReader>,
    pub rebooter: Arc<dyn Rebooter>,
}

impl std::fmt::Debug for HostServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServices").finish_non_exhaustive()
    }
}
