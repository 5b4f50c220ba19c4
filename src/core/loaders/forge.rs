use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::core::downloader::Downloader;
use crate::core::error::{PanelError, PanelResult};
use crate::core::session::ServerVariant;

use super::context::InstallContext;
use super::installer::{LaunchSpec, VariantInstaller};
use super::process::run_installer;

const FORGE_MAVEN: &str = "https://maven.minecraftforge.net";
const FORGE_PROMOTIONS_URL: &str =
    "https://files.minecraftforge.net/net/minecraftforge/forge/promotions_slim.json";
const INSTALLER_JAR: &str = "forge-installer.jar";
const RUN_SCRIPT: &str = "run.sh";

/// Forge: runs the official installer headless, then launches through the
/// `run.sh` it generates, rewritten to use the provisioned runtime.
pub struct ForgeInstaller;

/// `promotions_slim.json`.
#[derive(Debug, Deserialize)]
pub struct ForgePromotions {
    #[serde(default)]
    pub promos: HashMap<String, String>,
}

/// Subset of Forge's `maven-metadata.xml`.
#[derive(Debug, Deserialize)]
struct MavenMetadata {
    versioning: MavenVersioning,
}

#[derive(Debug, Deserialize)]
struct MavenVersioning {
    versions: MavenVersions,
}

#[derive(Debug, Deserialize)]
struct MavenVersions {
    #[serde(default)]
    version: Vec<String>,
}

impl ForgePromotions {
    /// Recommended build for `mc`, else the latest one.
    pub fn pick(&self, mc: &str) -> Option<&str> {
        self.promos
            .get(&format!("{mc}-recommended"))
            .or_else(|| self.promos.get(&format!("{mc}-latest")))
            .map(String::as_str)
    }
}

/// Newest Forge build for `mc` listed in `maven-metadata.xml`. Entries are
/// `<mc>-<forge>` in publication order, newest first.
fn latest_from_metadata(xml: &str, mc: &str) -> PanelResult<Option<String>> {
    let metadata: MavenMetadata = quick_xml::de::from_str(xml)?;
    let prefix = format!("{mc}-");
    Ok(metadata
        .versioning
        .versions
        .version
        .into_iter()
        .find_map(|v| v.strip_prefix(&prefix).map(str::to_string)))
}

async fn resolve_forge_version(downloader: &Downloader, mc: &str) -> PanelResult<String> {
    match downloader
        .fetch_json::<ForgePromotions>(FORGE_PROMOTIONS_URL)
        .await
    {
        Ok(promotions) => {
            if let Some(found) = promotions.pick(mc) {
                return Ok(found.to_string());
            }
        }
        Err(err) => warn!(variant = "forge", "Forge promotions unavailable: {}", err),
    }

    let metadata_url = format!("{FORGE_MAVEN}/net/minecraftforge/forge/maven-metadata.xml");
    let xml = downloader.fetch_text(&metadata_url).await?;
    latest_from_metadata(&xml, mc)?.ok_or_else(|| PanelError::UnsupportedVersion(mc.to_string()))
}

fn installer_url(mc: &str, forge: &str) -> String {
    format!("{FORGE_MAVEN}/net/minecraftforge/forge/{mc}-{forge}/forge-{mc}-{forge}-installer.jar")
}

/// The launcher script Forge would generate, pointed at `java`.
fn render_run_script(java: &str, mc: &str, forge: &str) -> String {
    format!(
        "#!/usr/bin/env sh\n\
         # Add custom JVM arguments (such as RAM allocation) to the user_jvm_args.txt\n\
         \n\
         \"{java}\" -jar forge-{mc}-{forge}-shim.jar --onlyCheckJava || exit 1\n\
         \n\
         # Add custom program arguments (such as nogui) to the next line before the \"$@\" or pass them to this script directly\n\
         \"{java}\" @user_jvm_args.txt @libraries/net/minecraftforge/forge/{mc}-{forge}/unix_args.txt \"$@\"\n"
    )
}

fn args_file(working_dir: &Path, mc: &str, forge: &str) -> std::path::PathBuf {
    working_dir
        .join("libraries")
        .join("net")
        .join("minecraftforge")
        .join("forge")
        .join(format!("{mc}-{forge}"))
        .join("unix_args.txt")
}

async fn write_run_script(path: &Path, contents: &str) -> PanelResult<()> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| PanelError::io(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| PanelError::io(path, e))?;
    }
    Ok(())
}

#[async_trait]
impl VariantInstaller for ForgeInstaller {
    async fn install(&self, ctx: InstallContext<'_>) -> PanelResult<LaunchSpec> {
        let forge = resolve_forge_version(ctx.downloader, ctx.game_version).await?;
        info!(
            variant = "forge",
            "Installing Forge {} for Minecraft {}", forge, ctx.game_version
        );
        install_build(&ctx, &forge).await
    }
}

/// Installs `forge` unless already present, then points `run.sh` at the
/// provisioned runtime.
async fn install_build(ctx: &InstallContext<'_>, forge: &str) -> PanelResult<LaunchSpec> {
    let mc = ctx.game_version;
    let java = ctx.runtime.java_bin.to_string_lossy().to_string();

    // A completed install leaves the args file behind; reuse it.
    if args_file(ctx.working_dir, mc, forge).is_file() {
        info!(variant = "forge", "Forge {}-{} already installed", mc, forge);
    } else {
        let installer_path = ctx.working_dir.join(INSTALLER_JAR);
        ctx.downloader
            .download_file(&installer_url(mc, forge), &installer_path, None)
            .await?;

        ctx.logs
            .append("[forge] Installing Forge in headless mode...")
            .await;
        let args = vec![
            "-Djava.awt.headless=true".to_string(),
            "-jar".to_string(),
            INSTALLER_JAR.to_string(),
            "--installServer".to_string(),
        ];
        run_installer(ServerVariant::Forge, &java, &args, ctx.working_dir, ctx.logs).await?;
    }

    let run_script = ctx.working_dir.join(RUN_SCRIPT);
    if !run_script.is_file() {
        return Err(PanelError::MissingArtifact(run_script));
    }
    write_run_script(&run_script, &render_run_script(&java, mc, forge)).await?;

    Ok(LaunchSpec {
        program: "bash".to_string(),
        args: vec![run_script.to_string_lossy().to_string(), "nogui".to_string()],
        working_dir: ctx.working_dir.to_path_buf(),
        runtime_home: Some(ctx.runtime.home.clone()),
    })
}
