use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::{PanelError, PanelResult};

/// Server distribution family as named in requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerFamily {
    Vanilla,
    Mods,
    Plugins,
}

impl ServerFamily {
    pub fn parse(raw: &str) -> PanelResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "vanilla" => Ok(Self::Vanilla),
            "mods" => Ok(Self::Mods),
            "plugins" => Ok(Self::Plugins),
            other => Err(PanelError::invalid(format!("unknown server type '{other}'"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vanilla => "vanilla",
            Self::Mods => "mods",
            Self::Plugins => "plugins",
        }
    }
}

/// Concrete provisioning recipe, selected by family and core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerVariant {
    Vanilla,
    Forge,
    Fabric,
    Paper,
    Spigot,
}

impl ServerVariant {
    /// Two-level lookup: family first, then the core inside it.
    pub fn resolve(family: ServerFamily, core: Option<&str>) -> PanelResult<Self> {
        let core = core
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty());

        match family {
            ServerFamily::Vanilla => Ok(Self::Vanilla),
            ServerFamily::Mods => match core.as_deref() {
                Some("forge") => Ok(Self::Forge),
                Some("fabric") => Ok(Self::Fabric),
                Some(other) => Err(PanelError::invalid(format!(
                    "core '{other}' is not a mods core (expected forge or fabric)"
                ))),
                None => Err(PanelError::invalid(
                    "mods servers need a core: forge or fabric",
                )),
            },
            ServerFamily::Plugins => match core.as_deref() {
                Some("paper") => Ok(Self::Paper),
                Some("spigot") => Ok(Self::Spigot),
                Some(other) => Err(PanelError::invalid(format!(
                    "core '{other}' is not a plugins core (expected paper or spigot)"
                ))),
                None => Err(PanelError::invalid(
                    "plugins servers need a core: paper or spigot",
                )),
            },
        }
    }

    pub fn family(self) -> ServerFamily {
        match self {
            Self::Vanilla => ServerFamily::Vanilla,
            Self::Forge | Self::Fabric => ServerFamily::Mods,
            Self::Paper | Self::Spigot => ServerFamily::Plugins,
        }
    }

    /// `None` for vanilla, which has no core.
    pub fn core(self) -> Option<&'static str> {
        match self {
            Self::Vanilla => None,
            Self::Forge => Some("forge"),
            Self::Fabric => Some("fabric"),
            Self::Paper => Some("paper"),
            Self::Spigot => Some("spigot"),
        }
    }

    pub fn as_str(self) -> &'static str {
        self.core().unwrap_or("vanilla")
    }
}

impl fmt::Display for ServerVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated start request. Construction is the only validation point;
/// a value of this type never needs re-checking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub variant: ServerVariant,
    pub game_version: String,
}

impl SessionRequest {
    pub fn new(variant: ServerVariant, game_version: &str) -> PanelResult<Self> {
        let game_version = game_version.trim();
        let well_formed = !game_version.is_empty()
            && game_version.len() <= 32
            && !game_version.starts_with('.')
            && game_version
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !well_formed {
            return Err(PanelError::invalid(format!(
                "malformed game version '{game_version}'"
            )));
        }

        Ok(Self {
            variant,
            game_version: game_version.to_string(),
        })
    }

    /// Builds a request from raw API parameters.
    pub fn parse(family: &str, game_version: &str, core: Option<&str>) -> PanelResult<Self> {
        let family = ServerFamily::parse(family)?;
        Self::new(ServerVariant::resolve(family, core)?, game_version)
    }

    /// `<install root>/<family>-<core>-<version>`, or `vanilla-<version>`.
    pub fn working_dir(&self, install_root: &Path) -> PathBuf {
        let name = match self.variant.core() {
            None => format!("vanilla-{}", self.game_version),
            Some(core) => format!(
                "{}-{}-{}",
                self.variant.family().as_str(),
                core,
                self.game_version
            ),
        };
        install_root.join(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Stopped,
    Preparing,
    Provisioning,
    Launching,
    Running,
    Stopping,
}

impl SessionState {
    /// Coarse status reported by the API and stored in samples.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }
}

/// Metadata about the live session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub variant: ServerVariant,
    pub family: ServerFamily,
    pub core: Option<String>,
    pub game_version: String,
    pub working_dir: PathBuf,
    pub runtime: Option<PathBuf>,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}
