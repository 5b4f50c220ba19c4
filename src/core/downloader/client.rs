use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::Client;
use serde::de::DeserializeOwned;
use sha1::{Digest, Sha1};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::core::error::{PanelError, PanelResult};

/// Streaming downloader with optional SHA-1 validation.
///
/// Files are written to a `.part` sibling and renamed into place, so a
/// destination that exists is always a complete download.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// GET `url` and decode the JSON body. Any transport or status failure
    /// is reported as `DownloadFailed`.
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> PanelResult<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PanelError::download(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PanelError::download(url, format!("HTTP {}", status.as_u16())));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PanelError::download(url, e))
    }

    /// GET `url` as text (used for Maven metadata).
    pub async fn fetch_text(&self, url: &str) -> PanelResult<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PanelError::download(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PanelError::download(url, format!("HTTP {}", status.as_u16())));
        }

        response.text().await.map_err(|e| PanelError::download(url, e))
    }

    // ── Single file download ────────────────────────────

    /// Download `url` to `dest`, overwriting, optionally validating SHA-1.
    ///
    /// Creates parent directories as needed.
    pub async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        sha1_expected: Option<&str>,
    ) -> PanelResult<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PanelError::io(parent, e))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PanelError::download(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PanelError::download(url, format!("HTTP {}", status.as_u16())));
        }

        let part = part_path(dest);
        let mut hasher = Sha1::new();
        let mut written = 0_u64;

        // Write inside a block so the handle is dropped before the rename.
        {
            let mut file = tokio::fs::File::create(&part)
                .await
                .map_err(|e| PanelError::io(&part, e))?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| PanelError::download(url, e))?;
                hasher.update(&chunk);
                written += chunk.len() as u64;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| PanelError::io(&part, e))?;
            }
            file.flush().await.map_err(|e| PanelError::io(&part, e))?;
        }

        if let Some(expected) = sha1_expected {
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected) {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(PanelError::ChecksumMismatch {
                    path: dest.to_path_buf(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        tokio::fs::rename(&part, dest)
            .await
            .map_err(|e| PanelError::io(dest, e))?;

        debug!("Downloaded: {} -> {:?} ({} bytes)", url, dest, written);
        Ok(())
    }

    /// Download only when `dest` is absent. Returns whether a download ran.
    pub async fn download_if_missing(&self, url: &str, dest: &Path) -> PanelResult<bool> {
        if tokio::fs::try_exists(dest)
            .await
            .map_err(|e| PanelError::io(dest, e))?
        {
            info!("{:?} already present, skipping download", dest);
            return Ok(false);
        }

        self.download_file(url, dest, None).await?;
        Ok(true)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut raw = dest.as_os_str().to_owned();
    raw.push(".part");
    PathBuf::from(raw)
}
