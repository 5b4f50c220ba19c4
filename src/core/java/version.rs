// ─── Version Resolver ───
// Maps a Minecraft version to the Java major it runs on.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::{PanelError, PanelResult};

/// A Java major version (8, 17, 21, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeVersion(pub u32);

impl RuntimeVersion {
    pub fn major(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "java{}", self.0)
    }
}

/// Oldest `1.x` line with a server download in the Mojang manifest.
const OLDEST_SUPPORTED_MINOR: u32 = 2;
/// Newest `1.x` line the table knows about.
const NEWEST_SUPPORTED_MINOR: u32 = 21;
/// Snapshot years (`YYwWWx`) covered by the table.
const SNAPSHOT_YEARS: std::ops::RangeInclusive<u32> = 12..=25;

/// Required runtime for `game_version`.
///
/// Release ranges:
/// - `1.2` – `1.16.5`  → Java 8
/// - `1.17` – `1.20.4` → Java 17
/// - `1.20.5` – `1.21.x` → Java 21
///
/// Pre-releases and release candidates (`1.20.5-pre1`) follow their
/// target release; weekly snapshots follow their year.
pub fn required_runtime_version(game_version: &str) -> PanelResult<RuntimeVersion> {
    let unsupported = || PanelError::UnsupportedVersion(game_version.to_string());
    let trimmed = game_version.trim().to_ascii_lowercase();

    if let Some(year) = snapshot_year(&trimmed) {
        if !SNAPSHOT_YEARS.contains(&year) {
            return Err(unsupported());
        }
        return Ok(RuntimeVersion(match year {
            0..=20 => 8,
            21..=23 => 17,
            _ => 21,
        }));
    }

    let release = trimmed.split('-').next().unwrap_or_default();
    let mut parts = release.split('.');
    let major = parse_part(parts.next()).ok_or_else(unsupported)?;
    let minor = parse_part(parts.next()).ok_or_else(unsupported)?;
    let patch = match parts.next() {
        Some(raw) => parse_part(Some(raw)).ok_or_else(unsupported)?,
        None => 0,
    };
    if parts.next().is_some() || major != 1 {
        return Err(unsupported());
    }
    if !(OLDEST_SUPPORTED_MINOR..=NEWEST_SUPPORTED_MINOR).contains(&minor) {
        return Err(unsupported());
    }

    let java = if minor >= 21 || (minor == 20 && patch >= 5) {
        21
    } else if minor >= 17 {
        17
    } else {
        8
    };
    Ok(RuntimeVersion(java))
}

fn parse_part(raw: Option<&str>) -> Option<u32> {
    raw.filter(|p| !p.is_empty())?.parse::<u32>().ok()
}

/// `23w31a` → `Some(23)`.
fn snapshot_year(version: &str) -> Option<u32> {
    let (year, rest) = version.split_once('w')?;
    if year.len() != 2 || rest.len() < 3 {
        return None;
    }
    let week = &rest[..2];
    if !week.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    year.parse().ok()
}
