use async_trait::async_trait;
use tracing::info;

use crate::core::error::PanelResult;

use super::context::InstallContext;
use super::installer::{LaunchSpec, VariantInstaller};

const GETBUKKIT_BASE: &str = "https://download.getbukkit.org/spigot";

/// Spigot: a prebuilt jar from the GetBukkit mirror.
pub struct SpigotInstaller;

fn jar_name(game_version: &str) -> String {
    format!("spigot-{game_version}.jar")
}

#[async_trait]
impl VariantInstaller for SpigotInstaller {
    async fn install(&self, ctx: InstallContext<'_>) -> PanelResult<LaunchSpec> {
        let name = jar_name(ctx.game_version);
        let url = format!("{GETBUKKIT_BASE}/{name}");
        let dest = ctx.working_dir.join(&name);

        if ctx.downloader.download_if_missing(&url, &dest).await? {
            info!(variant = "spigot", "Downloaded {}", name);
            ctx.logs
                .append(format!("[spigot] Spigot server downloaded: {}", dest.display()))
                .await;
        }

        Ok(LaunchSpec::java_jar(
            ctx.runtime,
            ctx.settings,
            &name,
            ctx.working_dir,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::core::config::Settings;
    use crate::core::downloader::Downloader;
    use crate::core::events::LogBuffer;
    use crate::core::java::{RuntimeHandle, RuntimeVersion};

    #[tokio::test]
    async fn present_jar_is_not_downloaded_again() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("spigot-1.20.1.jar"), b"jar").unwrap();
        let logs = LogBuffer::load(dir.path().join("logs.json")).await;
        let runtime = RuntimeHandle {
            version: RuntimeVersion(17),
            home: PathBuf::from("/rt/java17"),
            java_bin: PathBuf::from("/rt/java17/bin/java"),
        };
        let settings = Settings::default();
        let downloader = Downloader::new(reqwest::Client::new());

        let spec = SpigotInstaller
            .install(InstallContext {
                game_version: "1.20.1",
                working_dir: dir.path(),
                runtime: &runtime,
                settings: &settings,
                downloader: &downloader,
                logs: &logs,
            })
            .await
            .unwrap();

        assert!(spec.command_line().ends_with("-jar spigot-1.20.1.jar nogui"));
        assert!(logs.snapshot().await.is_empty());
    }
}
