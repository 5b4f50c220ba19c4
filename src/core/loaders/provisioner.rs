// ─── Artifact Provisioner ───
// Resolves the runtime, prepares the working directory and runs the
// variant recipe. The session controller only sees the trait.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::core::config::Settings;
use crate::core::downloader::Downloader;
use crate::core::error::PanelResult;
use crate::core::events::LogBuffer;
use crate::core::java::{required_runtime_version, RuntimeProvisioner};
use crate::core::session::SessionRequest;

use super::context::InstallContext;
use super::environment::prepare_environment;
use super::installer::{Installer, LaunchSpec};

/// Inputs the controller hands to a provisioner for one start attempt.
pub struct ProvisionContext<'a> {
    pub working_dir: &'a Path,
    pub settings: &'a Settings,
    pub logs: &'a LogBuffer,
}

/// Brings a working directory to a launchable state.
#[async_trait]
pub trait SessionProvisioner: Send + Sync {
    async fn provision(
        &self,
        request: &SessionRequest,
        ctx: ProvisionContext<'_>,
    ) -> PanelResult<LaunchSpec>;
}

pub struct ArtifactProvisioner {
    runtimes: Arc<RuntimeProvisioner>,
    downloader: Downloader,
}

impl ArtifactProvisioner {
    pub fn new(runtimes: Arc<RuntimeProvisioner>, downloader: Downloader) -> Self {
        Self {
            runtimes,
            downloader,
        }
    }
}

#[async_trait]
impl SessionProvisioner for ArtifactProvisioner {
    async fn provision(
        &self,
        request: &SessionRequest,
        ctx: ProvisionContext<'_>,
    ) -> PanelResult<LaunchSpec> {
        let variant = request.variant;
        let required = required_runtime_version(&request.game_version)?;
        info!(variant = %variant, "Minecraft {} requires {}", request.game_version, required);
        ctx.logs
            .append(format!(
                "[java] Minecraft {} requires Java {}",
                request.game_version,
                required.major()
            ))
            .await;

        let runtime = self.runtimes.ensure_runtime(required).await?;
        prepare_environment(variant, ctx.working_dir, ctx.settings).await?;

        let installer = Installer::new(variant);
        let spec = installer
            .install(InstallContext {
                game_version: &request.game_version,
                working_dir: ctx.working_dir,
                runtime: &runtime,
                settings: ctx.settings,
                downloader: &self.downloader,
                logs: ctx.logs,
            })
            .await?;

        info!(variant = %variant, "Launch command: {}", spec.command_line());
        Ok(spec)
    }
}
