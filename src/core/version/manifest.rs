// ─── Version Manifest ───
// Handles fetching the Mojang version manifest v2 and the per-version
// document that carries the dedicated server download.

use serde::Deserialize;
use tracing::info;

use crate::core::downloader::Downloader;
use crate::core::error::{PanelError, PanelResult};

pub const VERSION_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";

/// Top-level Mojang version manifest.
#[derive(Debug, Deserialize)]
pub struct VersionManifest {
    pub versions: Vec<VersionEntry>,
}

/// A single entry in the manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub version_type: String,
    pub url: String,
    #[serde(default)]
    pub sha1: Option<String>,
}

/// The slice of a version document the panel needs.
#[derive(Debug, Deserialize)]
pub struct VersionDocument {
    pub id: String,
    pub downloads: VersionDownloads,
}

#[derive(Debug, Deserialize)]
pub struct VersionDownloads {
    #[serde(default)]
    pub server: Option<DownloadArtifact>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadArtifact {
    pub url: String,
    pub sha1: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl VersionManifest {
    pub async fn fetch(downloader: &Downloader) -> PanelResult<Self> {
        info!("Fetching Minecraft version manifest...");
        let manifest: VersionManifest = downloader.fetch_json(VERSION_MANIFEST_URL).await?;
        info!("Loaded {} versions from manifest", manifest.versions.len());
        Ok(manifest)
    }

    /// Find a specific version entry by ID (e.g. "1.20.4").
    pub fn find_version(&self, id: &str) -> Option<&VersionEntry> {
        self.versions.iter().find(|v| v.id == id)
    }
}

/// Resolves the dedicated server jar for `game_version`.
pub async fn server_download(
    downloader: &Downloader,
    game_version: &str,
) -> PanelResult<DownloadArtifact> {
    let manifest = VersionManifest::fetch(downloader).await?;
    let entry = manifest
        .find_version(game_version)
        .ok_or_else(|| PanelError::UnsupportedVersion(game_version.to_string()))?;

    let document: VersionDocument = downloader.fetch_json(&entry.url).await?;
    document
        .downloads
        .server
        .ok_or_else(|| PanelError::UnsupportedVersion(document.id))
}
