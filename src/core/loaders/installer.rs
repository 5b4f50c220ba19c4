use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::config::Settings;
use crate::core::error::PanelResult;
use crate::core::java::RuntimeHandle;
use crate::core::session::ServerVariant;

use super::{
    context::InstallContext, fabric::FabricInstaller, forge::ForgeInstaller,
    paper::PaperInstaller, spigot::SpigotInstaller, vanilla::VanillaInstaller,
};

/// Exact process invocation for a provisioned server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub runtime_home: Option<PathBuf>,
}

impl LaunchSpec {
    /// `<java> -Xmx.. -Xms.. -jar <jar> nogui`, the template shared by every
    /// jar-launched variant.
    pub fn java_jar(
        runtime: &RuntimeHandle,
        settings: &Settings,
        jar: &str,
        working_dir: &Path,
    ) -> Self {
        let mut prefix = runtime.invocation_prefix().into_iter();
        let program = prefix.next().unwrap_or_else(|| "java".to_string());
        let mut args: Vec<String> = prefix.collect();
        args.extend(settings.memory_flags());
        args.extend(["-jar".to_string(), jar.to_string(), "nogui".to_string()]);

        Self {
            program,
            args,
            working_dir: working_dir.to_path_buf(),
            runtime_home: Some(runtime.home.clone()),
        }
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One provisioning recipe per server variant.
#[async_trait]
pub trait VariantInstaller: Send + Sync {
    async fn install(&self, ctx: InstallContext<'_>) -> PanelResult<LaunchSpec>;
}

/// Static dispatch over the recipes, keyed by variant.
pub enum Installer {
    Vanilla(VanillaInstaller),
    Forge(ForgeInstaller),
    Fabric(FabricInstaller),
    Paper(PaperInstaller),
    Spigot(SpigotInstaller),
}

impl Installer {
    pub fn new(variant: ServerVariant) -> Self {
        match variant {
            ServerVariant::Vanilla => Self::Vanilla(VanillaInstaller),
            ServerVariant::Forge => Self::Forge(ForgeInstaller),
            ServerVariant::Fabric => Self::Fabric(FabricInstaller),
            ServerVariant::Paper => Self::Paper(PaperInstaller),
            ServerVariant::Spigot => Self::Spigot(SpigotInstaller),
        }
    }

    pub async fn install(&self, ctx: InstallContext<'_>) -> PanelResult<LaunchSpec> {
        match self {
            Installer::Vanilla(i) => i.install(ctx).await,
            Installer::Forge(i) => i.install(ctx).await,
            Installer::Fabric(i) => i.install(ctx).await,
            Installer::Paper(i) => i.install(ctx).await,
            Installer::Spigot(i) => i.install(ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::java::RuntimeVersion;

    #[test]
    fn java_jar_template_puts_memory_flags_before_jar() {
        let runtime = RuntimeHandle {
            version: RuntimeVersion(17),
            home: PathBuf::from("/rt/java17"),
            java_bin: PathBuf::from("/rt/java17/bin/java"),
        };
        let settings = Settings {
            min_memory: "1G".into(),
            max_memory: "4G".into(),
            ..Settings::default()
        };

        let spec = LaunchSpec::java_jar(&runtime, &settings, "server.jar", Path::new("/srv/v"));

        assert_eq!(spec.program, "/rt/java17/bin/java");
        assert_eq!(spec.args, vec!["-Xmx4G", "-Xms1G", "-jar", "server.jar", "nogui"]);
        assert_eq!(
            spec.command_line(),
            "/rt/java17/bin/java -Xmx4G -Xms1G -jar server.jar nogui"
        );
        assert_eq!(spec.runtime_home, Some(PathBuf::from("/rt/java17")));
    }
}
