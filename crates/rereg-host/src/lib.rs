//! rereg host - Windows collaborators for the re-registration orchestrator
//!
//! Implements the `rereg-core` host traits on top of:
//! - the Uninstall registry keys (via PowerShell) and `msiexec /x`
//! - HTTPS download with `reqwest`
//! - `msiexec /i` with the registration token property
//! - `Get-WinEvent` for verification
//! - `shutdown.exe` for the final reboot

pub mod command;
pub mod download;
pub mod events;
pub mod inventory;
pub mod msi;
pub mod reboot;

use std::sync::Arc;
use std::time::Duration;

use rereg_core::{HostResult, HostServices};

pub use download::HttpDownloader;
pub use events::WinEventReader;
pub use inventory::RegistryInventory;
pub use msi::MsiInstaller;
pub use reboot::ShutdownRebooter;

/// Timeout applied to the installer download.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Production host services for a Windows session host.
pub fn host_services() -> HostResult<HostServices> {
    Ok(HostServices {
        inventory: Arc::new(RegistryInventory::new()),
        downloader: Arc::new(HttpDownloader::new(DOWNLOAD_TIMEOUT)?),
        installer: Arc::new(MsiInstaller::new()),
        events: Arc::new(WinEventReader::new()),
        rebooter: Arc::new(ShutdownRebooter::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_services_builds() {
        let services = host_services().unwrap();
        assert!(format!("{:?}", services).contains("HostServices"));
    }
}
