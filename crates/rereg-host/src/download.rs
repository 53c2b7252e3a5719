//! HTTP download of the agent installer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rereg_core::{Downloader, HostError, HostResult};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Downloader over HTTPS.
///
/// Streams into `<dest>.part` and renames on completion, so `dest` only
/// ever holds a complete body.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> HostResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("rereg/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| HostError::Download {
                url: String::new(),
                reason: format!("could not build HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

/// Sibling path the body is streamed into.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

fn transport(url: &str, e: impl std::fmt::Display) -> HostError {
    HostError::Download {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

impl HttpDownloader {
    async fn stream_to(&self, url: &str, part: &Path) -> HostResult<u64> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(transport(url, format!("HTTP {}", status)));
        }

        let mut file = tokio::fs::File::create(part).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| transport(url, e))? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        if written == 0 {
            return Err(transport(url, "empty response body"));
        }
        Ok(written)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str, dest: &Path) -> HostResult<()> {
        let part = partial_path(dest);
        debug!(url = %url, part = %part.display(), "Starting download");

        match self.stream_to(url, &part).await {
            Ok(bytes) => {
                tokio::fs::rename(&part, dest).await?;
                info!(url = %url, dest = %dest.display(), bytes, "Download complete");
                Ok(())
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_path() {
        let dest = Path::new("/tmp/RDAgent.msi");
        assert_eq!(partial_path(dest), PathBuf::from("/tmp/RDAgent.msi.part"));
    }

    #[tokio::test]
    async fn test_unreachable_host_leaves_no_files() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("RDAgent.msi");
        let downloader = HttpDownloader::new(Duration::from_secs(2)).unwrap();

        let result = downloader.fetch("http://127.0.0.1:9/agent.msi", &dest).await;

        assert!(matches!(result, Err(HostError::Download { .. })));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }
}
