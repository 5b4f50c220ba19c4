// ─── Runtime Provisioner ───
// Resolves, downloads and caches Temurin runtimes keyed by Java major.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::core::downloader::Downloader;
use crate::core::error::{PanelError, PanelResult};

use super::version::RuntimeVersion;

pub const ADOPTIUM_API_BASE: &str = "https://api.adoptium.net/v3/assets/latest";
const MARKER_FILE: &str = "runtime.json";
const STAGING_DIR: &str = "temp";

/// A ready-to-use runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeHandle {
    pub version: RuntimeVersion,
    pub home: PathBuf,
    pub java_bin: PathBuf,
}

impl RuntimeHandle {
    /// Leading argv for anything executed on this runtime.
    pub fn invocation_prefix(&self) -> Vec<String> {
        vec![self.java_bin.to_string_lossy().to_string()]
    }
}

/// Completion marker written once extraction and relocation succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeMarker {
    major: u32,
    version: String,
    vendor: String,
    os: String,
    arch: String,
    source_url: String,
    sha256_archive: String,
    java_bin_rel: String,
    installed_at: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AdoptiumRelease {
    binary: AdoptiumBinary,
    version: AdoptiumVersion,
}

#[derive(Debug, Clone, Deserialize)]
struct AdoptiumBinary {
    package: AdoptiumPackage,
}

#[derive(Debug, Clone, Deserialize)]
struct AdoptiumPackage {
    checksum: String,
    link: String,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AdoptiumVersion {
    openjdk_version: String,
}

#[derive(Debug, Clone)]
struct DownloadRuntimeSpec {
    version: String,
    url: String,
    file_name: String,
    sha256: String,
}

/// Cache of installed runtimes under `root/java<major>`.
///
/// Entries are immutable once written. Installs for the same major are
/// serialized through a per-version lock and re-check the cache after
/// acquiring it, so two concurrent sessions never extract twice.
pub struct RuntimeProvisioner {
    root: PathBuf,
    downloader: Downloader,
    api_base: String,
    cache: Mutex<HashMap<RuntimeVersion, RuntimeHandle>>,
    locks: Mutex<HashMap<RuntimeVersion, Arc<tokio::sync::Mutex<()>>>>,
}

impl RuntimeProvisioner {
    pub fn new(root: PathBuf, downloader: Downloader) -> Self {
        Self::with_api_base(root, downloader, ADOPTIUM_API_BASE)
    }

    pub fn with_api_base(root: PathBuf, downloader: Downloader, api_base: &str) -> Self {
        Self {
            root,
            downloader,
            api_base: api_base.trim_end_matches('/').to_string(),
            cache: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    #[instrument(skip(self), fields(runtime = %version))]
    pub async fn ensure_runtime(&self, version: RuntimeVersion) -> PanelResult<RuntimeHandle> {
        if let Some(hit) = self.cached(version) {
            return Ok(hit);
        }

        let lock = self.lock_for(version);
        let _guard = lock.lock().await;

        if let Some(hit) = self.cached(version) {
            return Ok(hit);
        }

        let home = self.home_for(version);
        let handle = match read_marker(&home, version).await? {
            Some(existing) => {
                debug!("Reusing runtime at {:?}", existing.home);
                existing
            }
            None => self.install(version).await?,
        };

        self.remember(handle.clone());
        Ok(handle)
    }

    fn home_for(&self, version: RuntimeVersion) -> PathBuf {
        self.root.join(version.to_string())
    }

    fn cached(&self, version: RuntimeVersion) -> Option<RuntimeHandle> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&version)
            .cloned()
    }

    fn remember(&self, handle: RuntimeHandle) {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(handle.version, handle);
    }

    fn lock_for(&self, version: RuntimeVersion) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(version)
            .or_default()
            .clone()
    }

    async fn install(&self, version: RuntimeVersion) -> PanelResult<RuntimeHandle> {
        let spec = self.fetch_runtime_spec(version).await?;

        let staging_root = self.root.join(STAGING_DIR);
        tokio::fs::create_dir_all(&staging_root)
            .await
            .map_err(|e| PanelError::io(&staging_root, e))?;
        let staging_id = Uuid::new_v4().to_string();
        let archive_path = staging_root.join(format!("{staging_id}-{}", spec.file_name));
        let extract_dir = staging_root.join(format!("{staging_id}_dir"));

        let download_start = Instant::now();
        info!("Downloading {} {} from {}", version, spec.version, spec.url);
        self.downloader
            .download_file(&spec.url, &archive_path, None)
            .await?;
        verify_sha256(&archive_path, &spec.sha256).await?;
        info!("Runtime download finished in {:?}", download_start.elapsed());

        let extract_start = Instant::now();
        let archive_for_task = archive_path.clone();
        let extract_for_task = extract_dir.clone();
        tokio::task::spawn_blocking(move || {
            extract::extract_archive(&archive_for_task, &extract_for_task)
        })
        .await
        .map_err(|e| PanelError::ExtractionFailed {
            path: archive_path.clone(),
            reason: format!("extraction task failed: {e}"),
        })??;
        info!("Runtime extraction finished in {:?}", extract_start.elapsed());

        let staged_bin = locate_java_binary(&extract_dir).ok_or_else(|| {
            PanelError::ExtractionFailed {
                path: archive_path.clone(),
                reason: "archive contains no java executable".into(),
            }
        })?;
        ensure_executable(&staged_bin)?;
        let java_bin_rel = staged_bin
            .strip_prefix(&extract_dir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from("bin").join(java_exe()));

        let home = self.home_for(version);
        if home.exists() {
            // Present without a marker: an interrupted earlier install.
            tokio::fs::remove_dir_all(&home)
                .await
                .map_err(|e| PanelError::io(&home, e))?;
        }
        tokio::fs::rename(&extract_dir, &home)
            .await
            .map_err(|e| PanelError::io(&home, e))?;

        let marker = RuntimeMarker {
            major: version.major(),
            version: spec.version,
            vendor: "Temurin".into(),
            os: platform::platform_os().into(),
            arch: platform::platform_arch().into(),
            source_url: spec.url,
            sha256_archive: spec.sha256,
            java_bin_rel: java_bin_rel.to_string_lossy().to_string(),
            installed_at: Utc::now().to_rfc3339(),
        };
        write_marker(&home, &marker).await?;
        let _ = tokio::fs::remove_file(&archive_path).await;

        Ok(RuntimeHandle {
            version,
            java_bin: home.join(&java_bin_rel),
            home,
        })
    }

    async fn fetch_runtime_spec(&self, version: RuntimeVersion) -> PanelResult<DownloadRuntimeSpec> {
        let mut last_error = None;

        for image_type in ["jre", "jdk"] {
            let api_url = format!(
                "{}/{}/hotspot?architecture={}&image_type={}&os={}&vendor=eclipse",
                self.api_base,
                version.major(),
                platform::platform_arch(),
                image_type,
                platform::platform_os()
            );

            match self.downloader.fetch_json::<Vec<AdoptiumRelease>>(&api_url).await {
                Ok(releases) => {
                    if let Some(found) = releases.into_iter().next() {
                        return Ok(DownloadRuntimeSpec {
                            version: found.version.openjdk_version,
                            url: found.binary.package.link,
                            file_name: found.binary.package.name,
                            sha256: found.binary.package.checksum,
                        });
                    }
                }
                Err(err) => last_error = Some(err),
            }
        }

        Err(last_error.unwrap_or_else(|| PanelError::DownloadFailed {
            url: self.api_base.clone(),
            reason: format!(
                "no Temurin release for {} on {}/{}",
                version,
                platform::platform_os(),
                platform::platform_arch()
            ),
        }))
    }
}

async fn read_marker(home: &Path, version: RuntimeVersion) -> PanelResult<Option<RuntimeHandle>> {
    let marker_path = home.join(MARKER_FILE);
    let bytes = match tokio::fs::read(&marker_path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(PanelError::io(&marker_path, source)),
    };

    let Ok(marker) = serde_json::from_slice::<RuntimeMarker>(&bytes) else {
        return Ok(None);
    };
    if marker.major != version.major() {
        return Ok(None);
    }

    let java_bin = home.join(&marker.java_bin_rel);
    if !java_bin.exists() {
        return Ok(None);
    }

    Ok(Some(RuntimeHandle {
        version,
        home: home.to_path_buf(),
        java_bin,
    }))
}

async fn write_marker(home: &Path, marker: &RuntimeMarker) -> PanelResult<()> {
    let marker_path = home.join(MARKER_FILE);
    let payload = serde_json::to_vec_pretty(marker)?;
    tokio::fs::write(&marker_path, payload)
        .await
        .map_err(|e| PanelError::io(&marker_path, e))
}

async fn verify_sha256(path: &Path, expected: &str) -> PanelResult<()> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PanelError::io(path, e))?;
    let actual = format!("{:x}", Sha256::digest(&bytes));
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        let _ = tokio::fs::remove_file(path).await;
        return Err(PanelError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

fn java_exe() -> &'static str {
    if cfg!(windows) {
        "java.exe"
    } else {
        "java"
    }
}

fn locate_java_binary(runtime_root: &Path) -> Option<PathBuf> {
    let primary = runtime_root.join("bin").join(java_exe());
    if primary.is_file() {
        return Some(primary);
    }

    let mac_layout = runtime_root
        .join("Contents")
        .join("Home")
        .join("bin")
        .join(java_exe());
    if mac_layout.is_file() {
        return Some(mac_layout);
    }

    None
}

fn ensure_executable(java_bin: &Path) -> PanelResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(java_bin)
            .map_err(|e| PanelError::io(java_bin, e))?
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(java_bin, perms).map_err(|e| PanelError::io(java_bin, e))?;
    }
    #[cfg(not(unix))]
    let _ = java_bin;
    Ok(())
}

/// Drops the archive's top-level directory and any non-normal component.
fn strip_top_level(path: &Path) -> PathBuf {
    let mut components = path.components();
    let _ = components.next();
    let mut rel = PathBuf::new();
    for component in components {
        if let Component::Normal(part) = component {
            rel.push(part);
        }
    }
    rel
}

mod platform {
    pub fn platform_arch() -> &'static str {
        match std::env::consts::ARCH {
            "x86_64" => "x64",
            "aarch64" => "aarch64",
            "x86" => "x32",
            "arm" => "arm",
            other => other,
        }
    }

    pub fn platform_os() -> &'static str {
        match std::env::consts::OS {
            "windows" => "windows",
            "macos" => "mac",
            _ => "linux",
        }
    }
}

mod extract {
    use std::fs::File;
    use std::path::Path;

    use flate2::read::GzDecoder;

    use super::strip_top_level;
    use crate::core::error::{PanelError, PanelResult};

    pub fn extract_archive(archive: &Path, dest: &Path) -> PanelResult<()> {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        let failed = |reason: String| PanelError::ExtractionFailed {
            path: archive.to_path_buf(),
            reason,
        };

        if dest.exists() {
            std::fs::remove_dir_all(dest).map_err(|e| failed(e.to_string()))?;
        }
        std::fs::create_dir_all(dest).map_err(|e| failed(e.to_string()))?;

        let result = if name.ends_with(".zip") {
            extract_zip(archive, dest)
        } else {
            extract_tar_gz(archive, dest)
        };
        result.map_err(|e| match e {
            PanelError::ExtractionFailed { .. } => e,
            other => failed(other.to_string()),
        })
    }

    fn extract_tar_gz(archive: &Path, dest: &Path) -> PanelResult<()> {
        let file = File::open(archive).map_err(|e| PanelError::io(archive, e))?;
        let mut tarball = tar::Archive::new(GzDecoder::new(file));
        tarball.set_preserve_permissions(true);

        for entry in tarball.entries()? {
            let mut entry = entry?;
            let rel = strip_top_level(&entry.path()?);
            if rel.as_os_str().is_empty() {
                continue;
            }

            let out_path = dest.join(rel);
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| PanelError::io(parent, e))?;
            }
            entry
                .unpack(&out_path)
                .map_err(|e| PanelError::io(&out_path, e))?;
        }

        Ok(())
    }

    fn extract_zip(archive: &Path, dest: &Path) -> PanelResult<()> {
        let file = File::open(archive).map_err(|e| PanelError::io(archive, e))?;
        let mut zip = zip::ZipArchive::new(file)?;

        for index in 0..zip.len() {
            let mut zipped = zip.by_index(index)?;
            let Some(enclosed) = zipped.enclosed_name() else {
                return Err(PanelError::ExtractionFailed {
                    path: archive.to_path_buf(),
                    reason: format!("unsafe entry path {}", zipped.name()),
                });
            };
            let rel = strip_top_level(&enclosed);
            if rel.as_os_str().is_empty() {
                continue;
            }

            let out_path = dest.join(rel);
            if zipped.is_dir() {
                std::fs::create_dir_all(&out_path).map_err(|e| PanelError::io(&out_path, e))?;
                continue;
            }

            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| PanelError::io(parent, e))?;
            }
            let mut out = File::create(&out_path).map_err(|e| PanelError::io(&out_path, e))?;
            std::io::copy(&mut zipped, &mut out).map_err(|e| PanelError::io(&out_path, e))?;

            #[cfg(unix)]
            if let Some(mode) = zipped.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode))
                    .map_err(|e| PanelError::io(&out_path, e))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn offline_provisioner(root: &Path) -> RuntimeProvisioner {
        RuntimeProvisioner::with_api_base(
            root.to_path_buf(),
            Downloader::new(reqwest::Client::new()),
            "http://127.0.0.1:9/v3/assets/latest",
        )
    }

    fn seed_installed_runtime(root: &Path, major: u32) -> PathBuf {
        let home = root.join(format!("java{major}"));
        std::fs::create_dir_all(home.join("bin")).unwrap();
        std::fs::write(home.join("bin").join(java_exe()), b"#!/bin/sh\n").unwrap();
        let marker = RuntimeMarker {
            major,
            version: format!("{major}.0.1+12"),
            vendor: "Temurin".into(),
            os: "linux".into(),
            arch: "x64".into(),
            source_url: "https://example.invalid/jre.tar.gz".into(),
            sha256_archive: "00".into(),
            java_bin_rel: format!("bin/{}", java_exe()),
            installed_at: Utc::now().to_rfc3339(),
        };
        std::fs::write(
            home.join(MARKER_FILE),
            serde_json::to_vec(&marker).unwrap(),
        )
        .unwrap();
        home
    }

    #[tokio::test]
    async fn completed_marker_is_reused_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let home = seed_installed_runtime(dir.path(), 17);
        let provisioner = offline_provisioner(dir.path());

        let handle = provisioner.ensure_runtime(RuntimeVersion(17)).await.unwrap();

        assert_eq!(handle.home, home);
        assert_eq!(handle.java_bin, home.join("bin").join(java_exe()));
        assert_eq!(
            handle.invocation_prefix(),
            vec![handle.java_bin.to_string_lossy().to_string()]
        );
    }

    #[tokio::test]
    async fn concurrent_requests_for_one_version_share_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        seed_installed_runtime(dir.path(), 21);
        let provisioner = Arc::new(offline_provisioner(dir.path()));

        let a = {
            let p = provisioner.clone();
            tokio::spawn(async move { p.ensure_runtime(RuntimeVersion(21)).await })
        };
        let b = {
            let p = provisioner.clone();
            tokio::spawn(async move { p.ensure_runtime(RuntimeVersion(21)).await })
        };

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn cache_survives_marker_removal() {
        let dir = tempfile::tempdir().unwrap();
        let home = seed_installed_runtime(dir.path(), 8);
        let provisioner = offline_provisioner(dir.path());

        let first = provisioner.ensure_runtime(RuntimeVersion(8)).await.unwrap();
        std::fs::remove_file(home.join(MARKER_FILE)).unwrap();
        let second = provisioner.ensure_runtime(RuntimeVersion(8)).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_runtime_with_unreachable_api_is_download_failed() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = offline_provisioner(dir.path());

        let err = provisioner
            .ensure_runtime(RuntimeVersion(17))
            .await
            .unwrap_err();

        assert!(matches!(err, PanelError::DownloadFailed { .. }));
    }

    #[tokio::test]
    async fn marker_without_binary_is_not_trusted() {
        let dir = tempfile::tempdir().unwrap();
        let home = seed_installed_runtime(dir.path(), 17);
        std::fs::remove_file(home.join("bin").join(java_exe())).unwrap();

        assert!(read_marker(&home, RuntimeVersion(17)).await.unwrap().is_none());
    }

    #[test]
    fn tar_gz_extraction_strips_top_level_directory() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("OpenJDK17U-jre_x64_linux.tar.gz");
        {
            let file = std::fs::File::create(&archive).unwrap();
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
            let mut builder = tar::Builder::new(encoder);
            let body = b"#!/bin/sh\necho java\n";
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, "jdk-17.0.9+9-jre/bin/java", &body[..])
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let dest = dir.path().join("out");
        extract::extract_archive(&archive, &dest).unwrap();

        assert!(dest.join("bin").join("java").is_file());
        assert_eq!(locate_java_binary(&dest), Some(dest.join("bin").join("java")));
    }

    #[test]
    fn zip_extraction_strips_top_level_directory() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("OpenJDK17U-jre_x64_windows.zip");
        {
            let file = std::fs::File::create(&archive).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            writer
                .start_file(
                    "jdk-17.0.9+9-jre/bin/java.exe",
                    zip::write::SimpleFileOptions::default(),
                )
                .unwrap();
            writer.write_all(b"MZ").unwrap();
            writer.finish().unwrap();
        }

        let dest = dir.path().join("out");
        extract::extract_archive(&archive, &dest).unwrap();

        assert!(dest.join("bin").join("java.exe").is_file());
    }

    #[test]
    fn corrupt_archive_is_extraction_failed() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.tar.gz");
        std::fs::write(&archive, b"definitely not gzip").unwrap();

        let err = extract::extract_archive(&archive, &dir.path().join("out")).unwrap_err();

        assert!(matches!(err, PanelError::ExtractionFailed { .. }));
    }

    #[test]
    fn strip_top_level_drops_parent_components() {
        assert_eq!(
            strip_top_level(Path::new("jdk/../../etc/passwd")),
            PathBuf::from("etc/passwd")
        );
        assert_eq!(strip_top_level(Path::new("jdk")), PathBuf::new());
    }
}
