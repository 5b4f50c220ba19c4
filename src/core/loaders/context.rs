use std::path::Path;

use crate::core::config::Settings;
use crate::core::downloader::Downloader;
use crate::core::events::LogBuffer;
use crate::core::java::RuntimeHandle;

/// Everything a variant recipe needs to bring `working_dir` to a
/// launchable state.
pub struct InstallContext<'a> {
    pub game_version: &'a str,
    pub working_dir: &'a Path,
    pub runtime: &'a RuntimeHandle,
    pub settings: &'a Settings,
    pub downloader: &'a Downloader,
    pub logs: &'a LogBuffer,
}
