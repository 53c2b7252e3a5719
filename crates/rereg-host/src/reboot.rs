//! Host reboot via `shutdown.exe`.

use async_trait::async_trait;
use rereg_core::{HostError, HostResult, Rebooter};
use tokio::process::Command;
use tracing::info;

use crate::command::CommandSpec;

/// Requests an immediate restart. The process is spawned and not awaited;
/// the host going down is the expected outcome.
#[derive(Debug, Clone, Default)]
pub struct ShutdownRebooter;

impl ShutdownRebooter {
    pub fn new() -> Self {
        Self
    }
}

pub fn reboot_command(force: bool) -> CommandSpec {
    let spec = CommandSpec::new("shutdown.exe").arg("/r");
    let spec = if force { spec.arg("/f") } else { spec };
    spec.args(["/t", "0"])
}

#[async_trait]
impl Rebooter for ShutdownRebooter {
    async fn reboot(&self, force: bool) -> HostResult<()> {
        let spec = reboot_command(force);
        info!(command = %spec.display(), "Requesting reboot");
        Command::new(&spec.program)
            .args(&spec.args)
            .spawn()
            .map(|_| ())
            .map_err(|e| HostError::Spawn {
                program: spec.program.clone(),
                reason: e.to_string(),
            })
    }
}
