use std::path::Path;

use tracing::debug;

use crate::core::config::Settings;
use crate::core::error::{PanelError, PanelResult};
use crate::core::session::{ServerFamily, ServerVariant};

pub const EULA_FILE: &str = "eula.txt";
pub const JVM_ARGS_FILE: &str = "user_jvm_args.txt";

/// Preconditions shared by every variant, run before its recipe.
///
/// Creates the working directory (and `mods/` for mod loaders), accepts the
/// EULA and writes the memory bounds to `user_jvm_args.txt`.
pub async fn prepare_environment(
    variant: ServerVariant,
    working_dir: &Path,
    settings: &Settings,
) -> PanelResult<()> {
    create_dir(working_dir).await?;

    if variant.family() == ServerFamily::Mods {
        create_dir(&working_dir.join("mods")).await?;
    }

    let jvm_args = working_dir.join(JVM_ARGS_FILE);
    write(&jvm_args, settings.memory_flags().join(" ")).await?;

    let eula = working_dir.join(EULA_FILE);
    write(&eula, "eula=true\n".to_string()).await?;

    debug!(variant = %variant, "Environment ready in {:?}", working_dir);
    Ok(())
}

async fn create_dir(path: &Path) -> PanelResult<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| PanelError::io(path, e))
}

async fn write(path: &Path, contents: String) -> PanelResult<()> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| PanelError::io(path, e))
}
