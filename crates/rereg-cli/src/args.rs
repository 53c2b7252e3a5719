//! Configuration layering: JSON file first, then environment and flags.

use std::path::PathBuf;

use clap::Args;
use rereg_core::{ConfigError, RegistrationToken, RunConfig, VerificationPolicy};

/// Options shared by every subcommand that needs a [`RunConfig`].
#[derive(Debug, Default, Args)]
pub struct ConfigArgs {
    /// JSON configuration file (fields not given take their defaults)
    #[arg(short, long, env = "REREG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Host pool registration token
    #[arg(long, env = "REREG_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Directory for run transcripts
    #[arg(long, env = "REREG_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Directory the installer is downloaded into
    #[arg(long, env = "REREG_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Agent installer URL
    #[arg(long, env = "REREG_AGENT_URL")]
    pub agent_url: Option<String>,

    /// Expected SHA-256 of the downloaded installer
    #[arg(long, env = "REREG_INSTALLER_SHA256")]
    pub installer_sha256: Option<String>,

    /// Number of run transcripts to keep
    #[arg(long, env = "REREG_RETAIN_LOGS")]
    pub retain_logs: Option<usize>,

    /// Seconds to wait after install before checking events
    #[arg(long)]
    pub verification_delay: Option<u64>,

    /// Look-back window for the event query, in seconds
    #[arg(long)]
    pub verification_window: Option<u64>,

    /// Seconds between verification queries
    #[arg(long)]
    pub verification_interval: Option<u64>,

    /// Maximum number of verification queries
    #[arg(long)]
    pub verification_attempts: Option<u32>,

    /// What an unconfirmed verification means: observe or enforce
    #[arg(long, env = "REREG_VERIFICATION_POLICY")]
    pub verification_policy: Option<VerificationPolicy>,
}

impl ConfigArgs {
    /// Build the effective configuration. Flags win over file values.
    pub fn load(&self) -> Result<RunConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_json_file(path)?,
            None => RunConfig::default(),
        };
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut RunConfig) {
        if let Some(token) = &self.token {
            config.registration_token = RegistrationToken::new(token.as_str());
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = dir.clone();
        }
        if let Some(dir) = &self.temp_dir {
            config.temp_dir = dir.clone();
        }
        if let Some(url) = &self.agent_url {
            config.agent_download_url = url.clone();
        }
        if let Some(digest) = &self.installer_sha256 {
            config.installer_sha256 = Some(digest.clone());
        }
        if let Some(n) = self.retain_logs {
            config.retain_logs = n;
        }
        if let Some(secs) = self.verification_delay {
            config.verification_delay_secs = secs;
        }
        if let Some(secs) = self.verification_window {
            config.verification_window_secs = secs;
        }
        if let Some(secs) = self.verification_interval {
            config.verification_poll_interval_secs = secs;
        }
        if let Some(n) = self.verification_attempts {
            config.verification_max_attempts = n;
        }
        if let Some(policy) = self.verification_policy {
            config.verification_policy = policy;
        }
    }
}
