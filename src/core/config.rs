// ─── Configuration ───
// Named settings read from `config.json`. Every read returns an immutable
// snapshot; callers never observe a half-updated file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::{PanelError, PanelResult};

const APP_DIR_NAME: &str = "CraftPanel";
const CONFIG_FILE: &str = "config.json";

pub const CONFIG_PATH_ENV: &str = "CRAFTPANEL_CONFIG";
pub const DATA_DIR_ENV: &str = "CRAFTPANEL_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub default_server_type: String,
    pub default_server_version: String,
    /// JVM heap floor, passed verbatim to `-Xms`.
    pub min_memory: String,
    /// JVM heap ceiling, passed verbatim to `-Xmx`.
    pub max_memory: String,
    pub server_directory: PathBuf,
    pub runtime_directory: PathBuf,
    pub logs_file: PathBuf,
    pub tokens_file: PathBuf,
    pub disable_frontend_auth: bool,
    pub api_bind: SocketAddr,
    pub stream_bind: SocketAddr,
    pub telemetry_interval_secs: u64,
    pub history_retention_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_server_type: "vanilla".into(),
            default_server_version: "1.20.1".into(),
            min_memory: "1G".into(),
            max_memory: "2G".into(),
            server_directory: PathBuf::from("servers"),
            runtime_directory: PathBuf::from("runtimes"),
            logs_file: PathBuf::from("logs/logs.json"),
            tokens_file: PathBuf::from("tokens.json"),
            disable_frontend_auth: false,
            api_bind: SocketAddr::from(([0, 0, 0, 0], 3001)),
            stream_bind: SocketAddr::from(([0, 0, 0, 0], 3002)),
            telemetry_interval_secs: 5,
            history_retention_secs: 60 * 60,
        }
    }
}

impl Settings {
    /// The `-Xmx`/`-Xms` pair shared by launch templates and `user_jvm_args.txt`.
    pub fn memory_flags(&self) -> Vec<String> {
        vec![
            format!("-Xmx{}", self.max_memory),
            format!("-Xms{}", self.min_memory),
        ]
    }

    /// Anchors every relative path at `data_dir`.
    pub fn rooted_at(mut self, data_dir: &Path) -> Self {
        for path in [
            &mut self.server_directory,
            &mut self.runtime_directory,
            &mut self.logs_file,
            &mut self.tokens_file,
        ] {
            if path.is_relative() {
                *path = data_dir.join(&*path);
            }
        }
        self
    }
}

/// Supplies configuration as an immutable snapshot per read.
pub trait ConfigSource: Send + Sync {
    fn snapshot(&self) -> PanelResult<Arc<Settings>>;
}

/// Re-reads `config.json` on every snapshot so edits apply without restart.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
    data_dir: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: PathBuf, data_dir: PathBuf) -> Self {
        Self { path, data_dir }
    }

    /// Resolves the config location from the environment, falling back to
    /// `<data dir>/config.json`.
    pub fn from_env() -> Self {
        let data_dir = std::env::var_os(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join(CONFIG_FILE));
        Self::new(path, data_dir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Startup helper: a malformed file must not keep the panel from booting.
    pub fn snapshot_or_default(&self) -> Arc<Settings> {
        match self.snapshot() {
            Ok(settings) => settings,
            Err(err) => {
                warn!("Config {:?} unreadable, using defaults: {}", self.path, err);
                Arc::new(Settings::default().rooted_at(&self.data_dir))
            }
        }
    }
}

impl ConfigSource for FileConfigSource {
    fn snapshot(&self) -> PanelResult<Arc<Settings>> {
        let settings = match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice::<Settings>(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(source) => return Err(PanelError::io(&self.path, source)),
        };
        Ok(Arc::new(settings.rooted_at(&self.data_dir)))
    }
}

/// Fixed settings, used when the file source is unusable and in tests.
#[derive(Debug, Clone)]
pub struct StaticConfigSource(Arc<Settings>);

impl StaticConfigSource {
    pub fn new(settings: Settings) -> Self {
        Self(Arc::new(settings))
    }
}

impl ConfigSource for StaticConfigSource {
    fn snapshot(&self) -> PanelResult<Arc<Settings>> {
        Ok(self.0.clone())
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_rooted_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileConfigSource::new(dir.path().join("config.json"), dir.path().into());

        let settings = source.snapshot().unwrap();

        assert_eq!(settings.default_server_type, "vanilla");
        assert_eq!(settings.server_directory, dir.path().join("servers"));
        assert_eq!(settings.logs_file, dir.path().join("logs/logs.json"));
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"maxMemory":"4G","disableFrontendAuth":true,"serverDirectory":"/srv/mc"}"#,
        )
        .unwrap();
        let source = FileConfigSource::new(path, dir.path().into());

        let settings = source.snapshot().unwrap();

        assert_eq!(settings.max_memory, "4G");
        assert_eq!(settings.min_memory, "1G");
        assert!(settings.disable_frontend_auth);
        assert_eq!(settings.server_directory, PathBuf::from("/srv/mc"));
    }

    #[test]
    fn every_snapshot_rereads_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"disableFrontendAuth":false}"#).unwrap();
        let source = FileConfigSource::new(path.clone(), dir.path().into());

        let before = source.snapshot().unwrap();
        std::fs::write(&path, r#"{"disableFrontendAuth":true}"#).unwrap();
        let after = source.snapshot().unwrap();

        assert!(!before.disable_frontend_auth);
        assert!(after.disable_frontend_auth);
    }

    #[test]
    fn malformed_file_is_an_error_but_startup_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let source = FileConfigSource::new(path, dir.path().into());

        assert!(matches!(source.snapshot(), Err(PanelError::Json(_))));
        assert_eq!(
            *source.snapshot_or_default(),
            Settings::default().rooted_at(dir.path())
        );
    }

    #[test]
    fn memory_flags_follow_jvm_order() {
        let settings = Settings {
            min_memory: "512M".into(),
            max_memory: "3G".into(),
            ..Settings::default()
        };
        assert_eq!(settings.memory_flags(), vec!["-Xmx3G", "-Xms512M"]);
    }
}
