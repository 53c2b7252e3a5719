//! In-memory fakes for the collaborator traits (testing only)
//!
//! Each fake records the calls it receives so tests can assert on which
//! stages touched the host, and in what order.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{HostError, HostResult};
use crate::host::*;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// FakeInventory
// ---------------------------------------------------------------------------

/// Inventory backed by a product list and per-product uninstall exit codes.
#[derive(Debug, Default)]
pub struct FakeInventory {
    products: Mutex<Vec<InstalledProduct>>,
    exit_codes: Mutex<HashMap<String, i32>>,
    fail_listing: bool,
    uninstalled: Mutex<Vec<String>>,
}

impl FakeInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inventory pre-populated with `products`; every uninstall exits 0.
    pub fn with_products(products: Vec<InstalledProduct>) -> Self {
        Self {
            products: Mutex::new(products),
            ..Self::default()
        }
    }

    /// Inventory whose listing call always fails.
    pub fn failing() -> Self {
        Self {
            fail_listing: true,
            ..Self::default()
        }
    }

    /// Make uninstalling `product_id` exit with `code`.
    pub fn set_exit_code(&self, product_id: &str, code: i32) {
        lock(&self.exit_codes).insert(product_id.to_string(), code);
    }

    /// Product ids passed to `uninstall`, in call order.
    pub fn uninstalled(&self) -> Vec<String> {
        lock(&self.uninstalled).clone()
    }

    /// Products still present.
    pub fn remaining(&self) -> Vec<InstalledProduct> {
        lock(&self.products).clone()
    }
}

#[async_trait]
impl SoftwareInventory for FakeInventory {
    async fn list_installed(&self, name: &str) -> HostResult<Vec<InstalledProduct>> {
        if self.fail_listing {
            return Err(HostError::CommandFailed {
                program: "inventory".to_string(),
                detail: "provider unavailable".to_string(),
            });
        }
        Ok(lock(&self.products)
            .iter()
            .filter(|p| p.display_name.eq_ignore_ascii_case(name))
            .cloned()
            .collect())
    }

    async fn uninstall(&self, product: &InstalledProduct) -> HostResult<i32> {
        lock(&self.uninstalled).push(product.id.clone());
        let code = lock(&self.exit_codes)
            .get(&product.id)
            .copied()
            .unwrap_or(0);
        if code == 0 {
            lock(&self.products).retain(|p| p.id != product.id);
        }
        Ok(code)
    }
}

// ---------------------------------------------------------------------------
// FakeDownloader
// ---------------------------------------------------------------------------

/// Downloader that writes a fixed payload, or fails every fetch.
#[derive(Debug)]
pub struct FakeDownloader {
    payload: Vec<u8>,
    fail: bool,
    fetched: Mutex<Vec<(String, PathBuf)>>,
}

impl FakeDownloader {
    pub fn serving(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            fail: false,
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            payload: Vec::new(),
            fail: true,
            fetched: Mutex::new(Vec::new()),
        }
    }

    /// `(url, dest)` pairs requested so far.
    pub fn fetched(&self) -> Vec<(String, PathBuf)> {
        lock(&self.fetched).clone()
    }
}

impl Default for FakeDownloader {
    fn default() -> Self {
        Self::serving(b"fake-msi".to_vec())
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn fetch(&self, url: &str, dest: &Path) -> HostResult<()> {
        lock(&self.fetched).push((url.to_string(), dest.to_path_buf()));
        if self.fail {
            return Err(HostError::Download {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, &self.payload)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeInstaller
// ---------------------------------------------------------------------------

/// One recorded installer invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallCall {
    pub package: PathBuf,
    pub token: String,
    pub package_existed: bool,
}

/// Installer returning a fixed exit code.
#[derive(Debug, Default)]
pub struct FakeInstaller {
    exit_code: i32,
    calls: Mutex<Vec<InstallCall>>,
}

impl FakeInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exiting_with(exit_code: i32) -> Self {
        Self {
            exit_code,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<InstallCall> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Installer for FakeInstaller {
    async fn install(&self, request: InstallRequest<'_>) -> HostResult<i32> {
        lock(&self.calls).push(InstallCall {
            package: request.package.to_path_buf(),
            token: request.token.expose().to_string(),
            package_existed: request.package.exists(),
        });
        Ok(self.exit_code)
    }
}

// ---------------------------------------------------------------------------
// FakeEventReader
// ---------------------------------------------------------------------------

/// Event store backed by a fixed record list, or a script of per-query batches.
#[derive(Debug, Default)]
pub struct FakeEventReader {
    records: Vec<EventRecord>,
    script: Mutex<VecDeque<Vec<EventRecord>>>,
    queries: Mutex<Vec<(String, DateTime<Utc>)>>,
}

impl FakeEventReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every query returns the records at or after its `since`.
    pub fn with_records(records: Vec<EventRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    /// Query `n` returns batch `n`; once the script runs out, the fixed list applies.
    pub fn scripted(batches: Vec<Vec<EventRecord>>) -> Self {
        Self {
            script: Mutex::new(batches.into()),
            ..Self::default()
        }
    }

    /// `(channel, since)` pairs queried so far.
    pub fn queries(&self) -> Vec<(String, DateTime<Utc>)> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl EventReader for FakeEventReader {
    async fn query(&self, channel: &str, since: DateTime<Utc>) -> HostResult<Vec<EventRecord>> {
        lock(&self.queries).push((channel.to_string(), since));
        if let Some(batch) = lock(&self.script).pop_front() {
            return Ok(batch);
        }
        Ok(self
            .records
            .iter()
            .filter(|r| r.timestamp >= since)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// FakeRebooter
// ---------------------------------------------------------------------------

/// Rebooter that only counts requests.
#[derive(Debug, Default)]
pub struct FakeRebooter {
    calls: Mutex<Vec<bool>>,
}

impl FakeRebooter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `force` flags of each reboot request.
    pub fn calls(&self) -> Vec<bool> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Rebooter for FakeRebooter {
    async fn reboot(&self, force: bool) -> HostResult<()> {
        lock(&self.calls).push(force);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeHost
// ---------------------------------------------------------------------------

/// All fakes together, with typed handles kept for assertions.
#[derive(Debug, Clone)]
pub struct FakeHost {
    pub inventory: Arc<FakeInventory>,
    pub downloader: Arc<FakeDownloader>,
    pub installer: Arc<FakeInstaller>,
    pub events: Arc<FakeEventReader>,
    pub rebooter: Arc<FakeRebooter>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            inventory: Arc::new(FakeInventory::new()),
            downloader: Arc::new(FakeDownloader::default()),
            installer: Arc::new(FakeInstaller::new()),
            events: Arc::new(FakeEventReader::new()),
            rebooter: Arc::new(FakeRebooter::new()),
        }
    }
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inventory(mut self, inventory: FakeInventory) -> Self {
        self.inventory = Arc::new(inventory);
        self
    }

    pub fn with_downloader(mut self, downloader: FakeDownloader) -> Self {
        self.downloader = Arc::new(downloader);
        self
    }

    pub fn with_installer(mut self, installer: FakeInstaller) -> Self {
        self.installer = Arc::new(installer);
        self
    }

    pub fn with_events(mut self, events: FakeEventReader) -> Self {
        self.events = Arc::new(events);
        self
    }

    /// Trait-object view handed to the orchestrator.
    pub fn services(&self) -> HostServices {
        HostServices {
            inventory: self.inventory.clone(),
            downloader: self.downloader.clone(),
            installer: self.installer.clone(),
            events: self.events.clone(),
            rebooter: self.rebooter.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, name: &str) -> InstalledProduct {
        InstalledProduct {
            id: id.to_string(),
            display_name: name.to_string(),
            version: None,
        }
    }

    #[tokio::test]
    async fn test_inventory_filters_case_insensitively() {
        let inv = FakeInventory::with_products(vec![
            product("{A}", "Remote Desktop Services Infrastructure Agent"),
            product("{B}", "Something Else"),
        ]);
        let found = inv
            .list_installed("remote desktop services infrastructure agent")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "{A}");
    }

    #[tokio::test]
    async fn test_inventory_uninstall_removes_on_success_only() {
        let inv = FakeInventory::with_products(vec![product("{A}", "x"), product("{B}", "x")]);
        inv.set_exit_code("{B}", 1603);

        assert_eq!(inv.uninstall(&product("{A}", "x")).await.unwrap(), 0);
        assert_eq!(inv.uninstall(&product("{B}", "x")).await.unwrap(), 1603);
        assert_eq!(inv.uninstalled(), vec!["{A}", "{B}"]);
        assert_eq!(inv.remaining().len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_events_then_fixed() {
        let rec = EventRecord {
            id: 1,
            timestamp: Utc::now(),
            severity: Severity::Information,
            message: "m".to_string(),
        };
        let reader = FakeEventReader::scripted(vec![vec![], vec![rec.clone()]]);
        let since = Utc::now() - chrono::Duration::minutes(5);
        assert!(reader.query("c", since).await.unwrap().is_empty());
        assert_eq!(reader.query("c", since).await.unwrap(), vec![rec]);
        assert!(reader.query("c", since).await.unwrap().is_empty());
        assert_eq!(reader.queries().len(), 3);
    }
}
