pub mod context;
pub mod environment;
pub mod fabric;
pub mod forge;
pub mod installer;
pub mod paper;
pub mod process;
pub mod provisioner;
pub mod spigot;
pub mod vanilla;

pub use context::InstallContext;
pub use installer::{Installer, LaunchSpec, VariantInstaller};
pub use provisioner::{ArtifactProvisioner, ProvisionContext, SessionProvisioner};
