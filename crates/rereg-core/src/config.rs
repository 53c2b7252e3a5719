//! Run configuration.
//!
//! A [`RunConfig`] is immutable once a run starts. The registration token is
//! carried as a [`RegistrationToken`] so it never leaks through `Debug`,
//! `Display` or serialised reports.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Upper bound for each verification timing value (one week).
pub const MAX_VERIFICATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Public download location of the broker agent installer.
pub const DEFAULT_AGENT_URL: &str =
    "https://query.prod.cms.rt.microsoft.com/cms/api/am/binary/RWrmXv";

/// Display name the agent registers in the software inventory.
pub const AGENT_PRODUCT_NAME: &str = "Remote Desktop Services Infrastructure Agent";

/// Event channel the agent writes its broker connection records to.
pub const DEFAULT_EVENT_CHANNEL: &str = "RemoteDesktopServices";

/// Event identifier the agent logs after a successful broker connection.
pub const CONNECTION_SUCCESS_EVENT_ID: u32 = 3701;

/// `ERROR_UNKNOWN_PRODUCT`: the uninstaller found nothing to remove.
pub const MSI_UNKNOWN_PRODUCT: i32 = 1605;

/// Template values shipped in deployment scripts in place of a real token.
pub const PLACEHOLDER_TOKENS: &[&str] = &["<PASTE_REGISTRATION_TOKEN_HERE>", "YOUR_REGISTRATION_TOKEN"];

/// Host-pool registration token.
///
/// Formatting and serialisation always redact the value; use
/// [`RegistrationToken::expose`] where the installer needs the secret.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RegistrationToken(String);

impl RegistrationToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw secret.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for RegistrationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RegistrationToken(<redacted>)")
    }
}

impl std::fmt::Display for RegistrationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

impl Serialize for RegistrationToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("<redacted>")
    }
}

impl<'de> Deserialize<'de> for RegistrationToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(RegistrationToken)
    }
}

/// What a failed verification does to the run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationPolicy {
    /// Log the outcome and reboot regardless.
    #[default]
    Observe,
    /// Anything short of a confirmed connection fails the run and skips the reboot.
    Enforce,
}

impl std::fmt::Display for VerificationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Observe => f.write_str("observe"),
            Self::Enforce => f.write_str("enforce"),
        }
    }
}

impl std::str::FromStr for VerificationPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "observe" => Ok(Self::Observe),
            "enforce" => Ok(Self::Enforce),
            other => Err(ConfigError::InvalidValue {
                field: "verification_policy".to_string(),
                reason: format!("unknown policy {other:?}"),
            }),
        }
    }
}

/// Everything a single re-registration run needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Host-pool registration token (secret).
    pub registration_token: RegistrationToken,

    /// Installer source.
    pub agent_download_url: String,

    /// Inventory display names removed in Stage 1.
    pub agent_product_names: Vec<String>,

    /// Directory the installer is downloaded into.
    pub temp_dir: PathBuf,

    /// File name of the downloaded installer inside `temp_dir`.
    pub installer_file_name: String,

    /// Optional pinned SHA-256 (hex) of the installer.
    pub installer_sha256: Option<String>,

    /// Directory holding run transcripts.
    pub log_dir: PathBuf,

    /// Transcript file name prefix.
    pub log_base_name: String,

    /// Number of run transcripts kept after cleanup.
    pub retain_logs: usize,

    /// Delay before the first event query.
    pub verification_delay_secs: u64,

    /// Trailing window searched on each query.
    pub verification_window_secs: u64,

    /// Pause between queries when more than one attempt is allowed.
    pub verification_poll_interval_secs: u64,

    /// Number of event queries before giving up.
    pub verification_max_attempts: u32,

    pub verification_policy: VerificationPolicy,

    /// Agent event channel.
    pub event_channel: String,

    /// Event id of a successful broker connection.
    pub success_event_id: u32,

    /// Token values rejected by the precondition check.
    pub placeholder_tokens: Vec<String>,

    /// Uninstaller exit code meaning "nothing to remove".
    pub already_absent_exit_code: i32,

    /// Whether the terminal stage actually reboots the host.
    pub reboot: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            registration_token: RegistrationToken::default(),
            agent_download_url: DEFAULT_AGENT_URL.to_string(),
            agent_product_names: vec![AGENT_PRODUCT_NAME.to_string()],
            temp_dir: default_temp_dir(),
            installer_file_name: "RDAgent.msi".to_string(),
            installer_sha256: None,
            log_dir: default_log_dir(),
            log_base_name: "AVD-Reregistration".to_string(),
            retain_logs: 5,
            verification_delay_secs: 60,
            verification_window_secs: 300,
            verification_poll_interval_secs: 30,
            verification_max_attempts: 1,
            verification_policy: VerificationPolicy::Observe,
            event_channel: DEFAULT_EVENT_CHANNEL.to_string(),
            success_event_id: CONNECTION_SUCCESS_EVENT_ID,
            placeholder_tokens: PLACEHOLDER_TOKENS.iter().map(|s| s.to_string()).collect(),
            already_absent_exit_code: MSI_UNKNOWN_PRODUCT,
            reboot: true,
        }
    }
}

impl RunConfig {
    /// Default configuration bound to `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            registration_token: RegistrationToken::new(token),
            ..Self::default()
        }
    }

    /// Load a JSON config file; absent fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Precondition check. Nothing on the host may change unless this passes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_token()?;
        if self.retain_logs == 0 {
            return Err(ConfigError::ZeroRetention);
        }
        if self.verification_max_attempts == 0 {
            return Err(ConfigError::ZeroVerificationAttempts);
        }
        for (field, secs) in [
            ("verification_delay_secs", self.verification_delay_secs),
            ("verification_window_secs", self.verification_window_secs),
            ("verification_poll_interval_secs", self.verification_poll_interval_secs),
        ] {
            if secs > MAX_VERIFICATION_SECS {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: format!("{} exceeds the maximum of {} seconds", secs, MAX_VERIFICATION_SECS),
                });
            }
        }
        if self.installer_file_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "installer_file_name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    fn validate_token(&self) -> Result<(), ConfigError> {
        if self.registration_token.is_blank() {
            return Err(ConfigError::MissingToken);
        }
        let token = self.registration_token.expose().trim();
        if let Some(placeholder) = self
            .placeholder_tokens
            .iter()
            .find(|p| p.trim().eq_ignore_ascii_case(token))
        {
            return Err(ConfigError::PlaceholderToken(placeholder.clone()));
        }
        Ok(())
    }

    /// Where Stage 2 writes the installer.
    pub fn installer_path(&self) -> PathBuf {
        self.temp_dir.join(&self.installer_file_name)
    }

    /// Verbose installer log, overwritten by each run.
    pub fn installer_log_path(&self) -> PathBuf {
        let stem = Path::new(&self.installer_file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "installer".to_string());
        self.temp_dir.join(format!("{}-install.log", stem))
    }

    pub fn verification_delay(&self) -> Duration {
        Duration::from_secs(self.verification_delay_secs)
    }

    pub fn verification_window(&self) -> Duration {
        Duration::from_secs(self.verification_window_secs)
    }

    pub fn verification_poll_interval(&self) -> Duration {
        Duration::from_secs(self.verification_poll_interval_secs)
    }
}

fn default_temp_dir() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\Temp")
    } else {
        std::env::temp_dir()
    }
}

fn default_log_dir() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\Temp\AVDReregistration")
    } else {
        std::env::temp_dir().join("rereg-logs")
    }
}
