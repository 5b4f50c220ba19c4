pub mod runtime;
pub mod version;

pub use runtime::{RuntimeHandle, RuntimeProvisioner};
pub use version::{required_runtime_version, RuntimeVersion};
