use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::core::error::{PanelError, PanelResult};
use crate::core::session::ServerVariant;

use super::context::InstallContext;
use super::installer::{LaunchSpec, VariantInstaller};
use super::process::run_installer;
use super::vanilla::{ensure_server_jar, SERVER_JAR};

const FABRIC_META_BASE: &str = "https://meta.fabricmc.net/v2";
const INSTALLER_JAR: &str = "fabric-installer.jar";
pub const LAUNCH_JAR: &str = "fabric-server-launch.jar";

/// Fabric: the installer writes the launch jar and libraries; the vanilla
/// server jar is fetched separately since Fabric does not bundle it.
pub struct FabricInstaller;

/// Entry of `/v2/versions/installer`.
#[derive(Debug, Clone, Deserialize)]
pub struct FabricInstallerVersion {
    pub url: String,
    pub version: String,
    #[serde(default)]
    pub stable: bool,
}

/// Newest stable installer; the endpoint lists newest first.
fn pick_stable_installer(versions: &[FabricInstallerVersion]) -> Option<&FabricInstallerVersion> {
    versions.iter().find(|v| v.stable)
}

#[async_trait]
impl VariantInstaller for FabricInstaller {
    async fn install(&self, ctx: InstallContext<'_>) -> PanelResult<LaunchSpec> {
        let listing_url = format!("{FABRIC_META_BASE}/versions/installer");
        let versions: Vec<FabricInstallerVersion> = ctx.downloader.fetch_json(&listing_url).await?;
        let installer = pick_stable_installer(&versions).ok_or_else(|| {
            PanelError::download(&listing_url, "no stable Fabric installer published")
        })?;

        ctx.logs
            .append(format!(
                "[fabric] Downloading Fabric installer {}...",
                installer.version
            ))
            .await;
        let installer_path = ctx.working_dir.join(INSTALLER_JAR);
        ctx.downloader
            .download_file(&installer.url, &installer_path, None)
            .await?;

        let java = ctx.runtime.java_bin.to_string_lossy().to_string();
        let args = vec![
            "-jar".to_string(),
            INSTALLER_JAR.to_string(),
            "server".to_string(),
            "-dir".to_string(),
            ctx.working_dir.to_string_lossy().to_string(),
            "-mcversion".to_string(),
            ctx.game_version.to_string(),
        ];
        run_installer(ServerVariant::Fabric, &java, &args, ctx.working_dir, ctx.logs).await?;
        info!(variant = "fabric", "Fabric installed for {}", ctx.game_version);

        finish_install(&ctx).await
    }
}

/// Vanilla jar plus the launch jar the installer should have written.
async fn finish_install(ctx: &InstallContext<'_>) -> PanelResult<LaunchSpec> {
    let server_jar = ctx.working_dir.join(SERVER_JAR);
    if ensure_server_jar(ctx.downloader, ctx.game_version, &server_jar).await? {
        ctx.logs
            .append(format!(
                "[fabric] Minecraft server jar downloaded: {}",
                server_jar.display()
            ))
            .await;
    }

    let launch_jar = ctx.working_dir.join(LAUNCH_JAR);
    if !launch_jar.is_file() {
        return Err(PanelError::MissingArtifact(launch_jar));
    }

    Ok(LaunchSpec::java_jar(
        ctx.runtime,
        ctx.settings,
        LAUNCH_JAR,
        ctx.working_dir,
    ))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::core::config::Settings;
    use crate::core::downloader::Downloader;
    use crate::core::events::LogBuffer;
    use crate::core::java::{RuntimeHandle, RuntimeVersion};

    #[test]
    fn picks_first_stable_installer() {
        let versions: Vec<FabricInstallerVersion> = serde_json::from_str(
            r#"[
                {"url":"https://maven.fabricmc.net/net/fabricmc/fabric-installer/1.0.2/fabric-installer-1.0.2.jar","maven":"net.fabricmc:fabric-installer:1.0.2","version":"1.0.2","stable":false},
                {"url":"https://maven.fabricmc.net/net/fabricmc/fabric-installer/1.0.1/fabric-installer-1.0.1.jar","maven":"net.fabricmc:fabric-installer:1.0.1","version":"1.0.1","stable":true},
                {"url":"https://maven.fabricmc.net/net/fabricmc/fabric-installer/1.0.0/fabric-installer-1.0.0.jar","maven":"net.fabricmc:fabric-installer:1.0.0","version":"1.0.0","stable":true}
            ]"#,
        )
        .unwrap();

        assert_eq!(pick_stable_installer(&versions).unwrap().version, "1.0.1");
        assert!(pick_stable_installer(&versions[..1]).is_none());
    }

    #[tokio::test]
    async fn launch_jar_must_exist_after_install() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SERVER_JAR), b"jar").unwrap();
        let logs = LogBuffer::load(dir.path().join("logs.json")).await;
        let runtime = RuntimeHandle {
            version: RuntimeVersion(17),
            home: PathBuf::from("/rt/java17"),
            java_bin: PathBuf::from("/rt/java17/bin/java"),
        };
        let settings = Settings::default();
        let downloader = Downloader::new(reqwest::Client::new());
        let ctx = InstallContext {
            game_version: "1.20.1",
            working_dir: dir.path(),
            runtime: &runtime,
            settings: &settings,
            downloader: &downloader,
            logs: &logs,
        };

        match finish_install(&ctx).await {
            Err(PanelError::MissingArtifact(path)) => {
                assert_eq!(path, dir.path().join(LAUNCH_JAR))
            }
            other => panic!("expected missing launch jar, got {other:?}"),
        }

        std::fs::write(dir.path().join(LAUNCH_JAR), b"jar").unwrap();
        let spec = finish_install(&ctx).await.unwrap();
        assert_eq!(spec.args[spec.args.len() - 3..], ["-jar", LAUNCH_JAR, "nogui"]);
    }
}
