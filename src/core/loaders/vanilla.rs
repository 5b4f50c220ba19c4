use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use crate::core::downloader::Downloader;
use crate::core::error::{PanelError, PanelResult};
use crate::core::version::server_download;

use super::context::InstallContext;
use super::installer::{LaunchSpec, VariantInstaller};

pub const SERVER_JAR: &str = "server.jar";

/// Vanilla: the Mojang dedicated server jar, launched directly.
pub struct VanillaInstaller;

/// Places the Mojang server jar at `dest` unless it is already there.
/// Shared with the Fabric recipe, which launches on top of it.
pub(crate) async fn ensure_server_jar(
    downloader: &Downloader,
    game_version: &str,
    dest: &Path,
) -> PanelResult<bool> {
    if tokio::fs::try_exists(dest)
        .await
        .map_err(|e| PanelError::io(dest, e))?
    {
        return Ok(false);
    }

    let artifact = server_download(downloader, game_version).await?;
    downloader
        .download_file(&artifact.url, dest, Some(&artifact.sha1))
        .await?;
    Ok(true)
}

#[async_trait]
impl VariantInstaller for VanillaInstaller {
    async fn install(&self, ctx: InstallContext<'_>) -> PanelResult<LaunchSpec> {
        let jar = ctx.working_dir.join(SERVER_JAR);
        if ensure_server_jar(ctx.downloader, ctx.game_version, &jar).await? {
            info!(variant = "vanilla", "Server {} downloaded to {:?}", ctx.game_version, jar);
            ctx.logs
                .append(format!("[vanilla] Server {} downloaded", ctx.game_version))
                .await;
        }

        Ok(LaunchSpec::java_jar(
            ctx.runtime,
            ctx.settings,
            SERVER_JAR,
            ctx.working_dir,
        ))
    }
}
