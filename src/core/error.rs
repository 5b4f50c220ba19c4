use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the panel backend.
/// Every module returns `Result<T, PanelError>`.
#[derive(Debug, Error)]
pub enum PanelError {
    // ── Request validation ──────────────────────────────
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    // ── Lifecycle guards ────────────────────────────────
    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Server is not running")]
    NotRunning,

    // ── Provisioning ────────────────────────────────────
    #[error("Unsupported Minecraft version: {0}")]
    UnsupportedVersion(String),

    #[error("Download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Checksum mismatch for {path:?}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Extraction failed for {path:?}: {reason}")]
    ExtractionFailed { path: PathBuf, reason: String },

    #[error("{variant} installer failed: {reason}")]
    InstallFailed { variant: String, reason: String },

    #[error("Missing artifact after install: {0:?}")]
    MissingArtifact(PathBuf),

    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    // ── Formats ─────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type PanelResult<T> = Result<T, PanelError>;

impl PanelError {
    pub fn invalid(message: impl Into<String>) -> Self {
        PanelError::InvalidRequest(message.into())
    }

    pub fn download(url: &str, reason: impl std::fmt::Display) -> Self {
        PanelError::DownloadFailed {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PanelError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<std::io::Error> for PanelError {
    fn from(source: std::io::Error) -> Self {
        PanelError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}
