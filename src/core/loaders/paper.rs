use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::core::error::{PanelError, PanelResult};

use super::context::InstallContext;
use super::installer::{LaunchSpec, VariantInstaller};

const PAPER_API_BASE: &str = "https://api.papermc.io/v2/projects/paper";

/// Paper: a prebuilt jar from the PaperMC API, downloaded once per version.
pub struct PaperInstaller;

#[derive(Debug, Deserialize)]
struct PaperBuilds {
    #[serde(default)]
    builds: Vec<PaperBuild>,
}

#[derive(Debug, Deserialize)]
struct PaperBuild {
    build: u32,
    downloads: PaperDownloads,
}

#[derive(Debug, Deserialize)]
struct PaperDownloads {
    application: PaperDownload,
}

#[derive(Debug, Deserialize)]
struct PaperDownload {
    name: String,
}

/// `paper-<version>-<build>.jar` already in `working_dir`, highest build first.
async fn existing_jar(working_dir: &Path, game_version: &str) -> PanelResult<Option<String>> {
    let prefix = format!("paper-{game_version}-");
    let mut best: Option<(u32, String)> = None;

    let mut entries = match tokio::fs::read_dir(working_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(PanelError::io(working_dir, source)),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PanelError::io(working_dir, e))?
    {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(build) = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".jar"))
            .and_then(|b| b.parse::<u32>().ok())
        else {
            continue;
        };
        if best.as_ref().map_or(true, |(b, _)| build > *b) {
            best = Some((build, name));
        }
    }

    Ok(best.map(|(_, name)| name))
}

fn latest_build(builds: PaperBuilds) -> Option<PaperBuild> {
    builds.builds.into_iter().max_by_key(|b| b.build)
}

#[async_trait]
impl VariantInstaller for PaperInstaller {
    async fn install(&self, ctx: InstallContext<'_>) -> PanelResult<LaunchSpec> {
        let jar_name = match existing_jar(ctx.working_dir, ctx.game_version).await? {
            Some(name) => {
                info!(variant = "paper", "Reusing {}", name);
                name
            }
            None => {
                let builds_url = format!("{PAPER_API_BASE}/versions/{}/builds", ctx.game_version);
                let builds: PaperBuilds = ctx.downloader.fetch_json(&builds_url).await?;
                let build = latest_build(builds)
                    .ok_or_else(|| PanelError::UnsupportedVersion(ctx.game_version.to_string()))?;

                let name = build.downloads.application.name;
                let url = format!(
                    "{PAPER_API_BASE}/versions/{}/builds/{}/downloads/{}",
                    ctx.game_version, build.build, name
                );
                let dest = ctx.working_dir.join(&name);
                if ctx.downloader.download_if_missing(&url, &dest).await? {
                    ctx.logs
                        .append(format!("[paper] Paper server downloaded: {}", dest.display()))
                        .await;
                }
                name
            }
        };

        Ok(LaunchSpec::java_jar(
            ctx.runtime,
            ctx.settings,
            &jar_name,
            ctx.working_dir,
        ))
    }
}
