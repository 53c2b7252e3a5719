//! Installed-software inventory from the Windows Uninstall registry keys.

use std::time::Duration;

use async_trait::async_trait;
use rereg_core::{HostError, HostResult, InstalledProduct, SoftwareInventory};
use serde::Deserialize;
use tracing::{debug, info};

use crate::command::{self, ps_quote, CommandSpec};

const UNINSTALL_KEYS: [&str; 2] = [
    r"HKLM:\SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall\*",
    r"HKLM:\SOFTWARE\WOW6432Node\Microsoft\Windows\CurrentVersion\Uninstall\*",
];

/// One row of `Get-ItemProperty` output.
#[derive(Debug, Deserialize)]
struct UninstallEntry {
    #[serde(rename = "PSChildName")]
    key: String,
    #[serde(rename = "DisplayName")]
    display_name: Option<String>,
    #[serde(rename = "DisplayVersion", default)]
    display_version: Option<String>,
}

/// `ConvertTo-Json` emits a bare object for a single match.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<UninstallEntry>),
    One(UninstallEntry),
}

/// Inventory that queries the registry through PowerShell and removes
/// products with `msiexec /x`.
#[derive(Debug, Clone)]
pub struct RegistryInventory {
    query_timeout: Duration,
    uninstall_timeout: Duration,
}

impl Default for RegistryInventory {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(60),
            uninstall_timeout: Duration::from_secs(15 * 60),
        }
    }
}

impl RegistryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_uninstall_timeout(mut self, timeout: Duration) -> Self {
        self.uninstall_timeout = timeout;
        self
    }
}

/// PowerShell script listing uninstall entries whose DisplayName equals `name`.
///
/// Missing registry views raise non-terminating errors that would make
/// `powershell.exe` exit 1, so the script always exits 0 and an empty
/// result is just empty output.
pub fn inventory_script(name: &str) -> String {
    let paths = UNINSTALL_KEYS
        .iter()
        .map(|p| ps_quote(p))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "Get-ItemProperty -Path {} -ErrorAction SilentlyContinue | \
         Where-Object {{ $_.DisplayName -eq {} }} | \
         Select-Object PSChildName, DisplayName, DisplayVersion | \
         ConvertTo-Json -Compress; \
         exit 0",
        paths,
        ps_quote(name)
    )
}

/// Parse the script's JSON output. Empty output means no match.
pub fn parse_inventory(output: &str, name: &str) -> HostResult<Vec<InstalledProduct>> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let entries = match serde_json::from_str::<OneOrMany>(trimmed) {
        Ok(OneOrMany::Many(v)) => v,
        Ok(OneOrMany::One(e)) => vec![e],
        Err(e) => {
            return Err(HostError::Parse {
                source_name: "registry inventory".to_string(),
                reason: e.to_string(),
            })
        }
    };

    let mut products: Vec<InstalledProduct> = Vec::new();
    for entry in entries {
        // Both registry views can list the same product code.
        if products.iter().any(|p| p.id == entry.key) {
            continue;
        }
        products.push(InstalledProduct {
            id: entry.key,
            display_name: entry.display_name.unwrap_or_else(|| name.to_string()),
            version: entry.display_version.filter(|v| !v.is_empty()),
        });
    }
    Ok(products)
}

/// `msiexec` arguments that remove `product_id` silently.
pub fn uninstall_command(product_id: &str) -> CommandSpec {
    CommandSpec::new("msiexec.exe").args(["/x", product_id, "/quiet", "/norestart"])
}

#[async_trait]
impl SoftwareInventory for RegistryInventory {
    async fn list_installed(&self, name: &str) -> HostResult<Vec<InstalledProduct>> {
        let output = command::powershell(&inventory_script(name), self.query_timeout).await?;
        if !output.success() {
            return Err(HostError::CommandFailed {
                program: "powershell.exe".to_string(),
                detail: output.diagnostic(),
            });
        }
        let products = parse_inventory(&output.stdout, name)?;
        debug!(name = %name, count = products.len(), "Inventory query");
        Ok(products)
    }

    async fn uninstall(&self, product: &InstalledProduct) -> HostResult<i32> {
        let spec = uninstall_command(&product.id).timeout(self.uninstall_timeout);
        info!(command = %spec.display(), "Uninstalling product");
        let output = command::run(&spec).await?;
        Ok(output.exit_code)
    }
}
