//! Agent installation via `msiexec /i`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use rereg_core::{HostResult, InstallRequest, Installer};
use tracing::{info, warn};

use crate::command::{self, CommandSpec};

/// MSI property carrying the host pool registration token.
pub const TOKEN_PROPERTY: &str = "REGISTRATIONTOKEN";

/// Installer driving `msiexec.exe`.
#[derive(Debug, Clone)]
pub struct MsiInstaller {
    timeout: Duration,
}

impl Default for MsiInstaller {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl MsiInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Silent install command for `request`. The token is registered as a secret.
pub fn install_command(request: &InstallRequest<'_>) -> CommandSpec {
    let token = request.token.expose();
    let mut spec = CommandSpec::new("msiexec.exe")
        .arg("/i")
        .arg(path_arg(request.package))
        .args(["/quiet", "/norestart"])
        .arg(format!("{}={}", TOKEN_PROPERTY, token))
        .secret(token);
    if let Some(log) = request.log_file {
        spec = spec.arg("/l*v").arg(path_arg(log));
    }
    spec
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

#[async_trait]
impl Installer for MsiInstaller {
    async fn install(&self, request: InstallRequest<'_>) -> HostResult<i32> {
        let spec = install_command(&request).timeout(self.timeout);
        info!(command = %spec.display(), "Installing agent");
        let output = command::run(&spec).await?;
        if !output.success() {
            warn!(
                exit_code = output.exit_code,
                duration_ms = output.duration_ms,
                "msiexec reported failure"
            );
        }
        Ok(output.exit_code)
    }
}
