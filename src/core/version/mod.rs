pub mod manifest;

pub use manifest::{server_download, DownloadArtifact, VersionManifest};
