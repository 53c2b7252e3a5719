//! Error taxonomy for the re-registration workflow.

use thiserror::Error;

/// Errors found while loading or validating a run configuration.
///
/// These are the only errors that abort a run before any mutation of the host.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No registration token was supplied
    #[error("registration token is missing")]
    MissingToken,

    /// The token still carries a template placeholder
    #[error("registration token is still the placeholder value {0:?}")]
    PlaceholderToken(String),

    /// Retention must keep at least the current run's log
    #[error("retain_logs must be at least 1")]
    ZeroRetention,

    /// Verification must query the event store at least once
    #[error("verification_max_attempts must be at least 1")]
    ZeroVerificationAttempts,

    /// A field carries an unusable value
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Config file could not be read
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for `RunConfig`
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failures reported by a host collaborator (inventory, downloader, ...).
#[derive(Error, Debug)]
pub enum HostError {
    /// The external tool could not be started
    #[error("failed to launch {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// The external tool ran past its deadline
    #[error("{program} timed out after {secs} seconds")]
    Timeout { program: String, secs: u64 },

    /// The external tool ran but reported failure
    #[error("{program} failed: {detail}")]
    CommandFailed { program: String, detail: String },

    /// Tool output could not be understood
    #[error("unexpected output from {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    /// Transport failure while downloading
    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for collaborator calls.
pub type HostResult<T> = std::result::Result<T, HostError>;

/// Stage failures that end the happy path of a run.
///
/// None of these skip cleanup or the final reboot.
#[derive(Error, Debug)]
pub enum RunError {
    /// The installer artifact could not be fetched
    #[error("acquisition failed: {0}")]
    Acquisition(#[source] HostError),

    /// Downloaded artifact does not match the pinned digest
    #[error("artifact digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// The installer could not be launched
    #[error("installer could not run: {0}")]
    InstallerUnavailable(#[source] HostError),

    /// The installer exited non-zero
    #[error("installer exited with code {exit_code}")]
    Installation { exit_code: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::PlaceholderToken("<PASTE_REGISTRATION_TOKEN_HERE>".to_string());
        assert!(err.to_string().contains("placeholder"));

        let err = ConfigError::MissingToken;
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_run_error_wraps_host_error() {
        let err = RunError::Acquisition(HostError::Download {
            url: "https://example.invalid/agent.msi".to_string(),
            reason: "connection reset".to_string(),
        });
        let msg = err.to_string();
        assert!(msg.contains("acquisition failed"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_installation_error_carries_exit_code() {
        let err = RunError::Installation { exit_code: 1603 };
        assert!(err.to_string().contains("1603"));
    }
}
