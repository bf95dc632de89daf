//! Download, verification, and installation of detector releases.
//!
//! An update moves through
//! `Checking -> (UpToDate | UpdateNeeded) -> Downloading -> Verifying -> Installing -> Installed`.
//! Installation never leaves the host without a detector: the new release is
//! staged in `<root>/<version>/`, the active `bin/` is renamed to `bin.bak/`,
//! the staged directory is renamed to `bin/`, and only then is the backup
//! removed. The manifest is written last.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;

use highlighter_common::config::DetectorConfig;
use highlighter_common::error::{HighlighterError, HighlighterResult};
use highlighter_project_model::{current_platform, DetectorManifest};

use crate::paths::{validate_version, DetectorPaths, DETECTOR_EXE};

/// Source of manifests and release archives.
#[async_trait]
pub trait UpdateTransport: Send + Sync {
    async fn fetch_manifest(&self, url: &str) -> HighlighterResult<DetectorManifest>;

    /// Write the body at `url` to `dest`, reporting `(downloaded, total)`.
    /// Returns the number of bytes written.
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &mut (dyn FnMut(u64, Option<u64>) + Send),
    ) -> HighlighterResult<u64>;
}

/// HTTPS transport.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get(&self, url: &str) -> HighlighterResult<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HighlighterError::update(format!("Request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(HighlighterError::update(format!(
                "HTTP {}: {}",
                response.status(),
                url
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl UpdateTransport for HttpTransport {
    async fn fetch_manifest(&self, url: &str) -> HighlighterResult<DetectorManifest> {
        self.get(url)
            .await?
            .json::<DetectorManifest>()
            .await
            .map_err(|e| HighlighterError::update(format!("Invalid manifest from {url}: {e}")))
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &mut (dyn FnMut(u64, Option<u64>) + Send),
    ) -> HighlighterResult<u64> {
        let response = self.get(url).await?;
        let total = response.content_length();
        let mut file = tokio::fs::File::create(dest).await?;
        let mut downloaded: u64 = 0;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| HighlighterError::update(format!("Download interrupted: {e}")))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            on_progress(downloaded, total);
        }
        file.flush().await?;
        Ok(downloaded)
    }
}

/// Observable steps of an update run.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateStep {
    Checking,
    UpToDate { version: String },
    UpdateNeeded { version: String },
    Downloading { downloaded: u64, total: Option<u64> },
    Verifying,
    Installing,
    Installed { version: String },
}

/// Result of comparing the remote manifest against the installation.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCheck {
    pub remote: DetectorManifest,
    pub installed: Option<DetectorManifest>,
    pub update_required: bool,
}

/// What [`DetectorUpdater::ensure_current`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate { version: String },
    Installed { version: String },
}

impl UpdateOutcome {
    pub fn version(&self) -> &str {
        match self {
            UpdateOutcome::UpToDate { version } | UpdateOutcome::Installed { version } => version,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    fn from_url(url: &str) -> Option<Self> {
        let path = url.split(|c: char| c == '?' || c == '#').next().unwrap_or(url).to_ascii_lowercase();
        if path.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else {
            None
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::TarGz => "tar.gz",
        }
    }
}

/// Keeps the detector installation current.
pub struct DetectorUpdater<T = HttpTransport> {
    transport: T,
    paths: DetectorPaths,
    manifest_url: String,
    platform: String,
    ensured: OnceCell<UpdateOutcome>,
}

impl DetectorUpdater<HttpTransport> {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(
            HttpTransport::new(),
            DetectorPaths::new(&config.install_root),
            &config.manifest_url,
        )
    }
}

impl<T: UpdateTransport> DetectorUpdater<T> {
    pub fn new(transport: T, paths: DetectorPaths, manifest_url: impl Into<String>) -> Self {
        Self {
            transport,
            paths,
            manifest_url: manifest_url.into(),
            platform: current_platform(),
            ensured: OnceCell::new(),
        }
    }

    pub fn paths(&self) -> &DetectorPaths {
        &self.paths
    }

    /// Manifest of the active installation, if any.
    pub fn installed_manifest(&self) -> HighlighterResult<Option<DetectorManifest>> {
        let path = self.paths.manifest_path();
        DetectorManifest::load(&path).map_err(|e| {
            HighlighterError::update(format!("Unreadable manifest {}: {e}", path.display()))
        })
    }

    /// Fetch the remote manifest and decide whether an update is required.
    pub async fn check(&self) -> HighlighterResult<UpdateCheck> {
        let remote = self.transport.fetch_manifest(&self.manifest_url).await?;
        if remote.platform != self.platform {
            return Err(HighlighterError::update(format!(
                "Manifest is for {}, this host is {}",
                remote.platform, self.platform
            )));
        }

        let installed = self.installed_manifest()?;
        let update_required = remote.requires_update(installed.as_ref()) || !self.paths.is_installed();
        tracing::debug!(
            remote = %remote.version,
            installed = ?installed.as_ref().map(|m| m.version.as_str()),
            update_required,
            "Detector update check"
        );
        Ok(UpdateCheck {
            remote,
            installed,
            update_required,
        })
    }

    /// Check once per process and install the remote release when needed.
    ///
    /// A successful result is remembered; later calls return it without
    /// touching the network. Failures are not remembered.
    pub async fn ensure_current(
        &self,
        mut on_step: impl FnMut(UpdateStep) + Send,
    ) -> HighlighterResult<UpdateOutcome> {
        self.ensured
            .get_or_try_init(|| self.run(&mut on_step))
            .await
            .cloned()
    }

    async fn run(
        &self,
        on_step: &mut (dyn FnMut(UpdateStep) + Send),
    ) -> HighlighterResult<UpdateOutcome> {
        on_step(UpdateStep::Checking);
        let check = self.check().await?;
        let version = check.remote.version.clone();
        if !check.update_required {
            tracing::info!(%version, "Detector is up to date");
            on_step(UpdateStep::UpToDate {
                version: version.clone(),
            });
            return Ok(UpdateOutcome::UpToDate { version });
        }

        on_step(UpdateStep::UpdateNeeded {
            version: version.clone(),
        });
        self.install(&check.remote, on_step).await?;
        on_step(UpdateStep::Installed {
            version: version.clone(),
        });
        Ok(UpdateOutcome::Installed { version })
    }

    /// Download, verify, and activate the release described by `manifest`.
    pub async fn install(
        &self,
        manifest: &DetectorManifest,
        on_step: &mut (dyn FnMut(UpdateStep) + Send),
    ) -> HighlighterResult<()> {
        validate_version(&manifest.version)?;
        let kind = ArchiveKind::from_url(&manifest.url).ok_or_else(|| {
            HighlighterError::update(format!("Unsupported archive type: {}", manifest.url))
        })?;
        tokio::fs::create_dir_all(self.paths.root()).await?;

        let archive = self.paths.archive_path(&manifest.version, kind.extension());
        tracing::info!(version = %manifest.version, url = %manifest.url, "Downloading detector");
        let downloaded = {
            let mut report = |downloaded: u64, total: Option<u64>| {
                on_step(UpdateStep::Downloading { downloaded, total })
            };
            self.transport.download(&manifest.url, &archive, &mut report).await
        };
        let downloaded = match downloaded {
            Ok(bytes) => bytes,
            Err(err) => {
                remove_quietly(&archive);
                return Err(err);
            }
        };
        if manifest.size_bytes != 0 && downloaded != manifest.size_bytes {
            tracing::warn!(
                expected = manifest.size_bytes,
                actual = downloaded,
                "Downloaded size differs from manifest"
            );
        }

        on_step(UpdateStep::Verifying);
        let actual = {
            let archive = archive.clone();
            blocking(move || sha256_file(&archive)).await
        };
        let actual = match actual {
            Ok(hash) => hash,
            Err(err) => {
                remove_quietly(&archive);
                return Err(err);
            }
        };
        if !actual.eq_ignore_ascii_case(&manifest.checksum) {
            remove_quietly(&archive);
            tracing::error!(expected = %manifest.checksum, %actual, "Detector checksum mismatch");
            return Err(HighlighterError::ChecksumMismatch {
                expected: manifest.checksum.clone(),
                actual,
            });
        }

        on_step(UpdateStep::Installing);
        let staging = self.paths.version_dir(&manifest.version);
        let staged = {
            let (archive, staging) = (archive.clone(), staging.clone());
            blocking(move || stage_release(kind, &archive, &staging)).await
        };
        remove_quietly(&archive);
        let release_dir = match staged {
            Ok(dir) => dir,
            Err(err) => {
                remove_dir_quietly(&staging);
                return Err(err);
            }
        };

        let swapped = swap_into_place(&release_dir, &self.paths);
        if release_dir != staging {
            remove_dir_quietly(&staging);
        }
        swapped?;

        let manifest_path = self.paths.manifest_path();
        manifest.save(&manifest_path).map_err(|e| {
            HighlighterError::update(format!("Failed to write {}: {e}", manifest_path.display()))
        })?;
        tracing::info!(version = %manifest.version, "Detector installed");
        Ok(())
    }
}

async fn blocking<R, F>(f: F) -> HighlighterResult<R>
where
    F: FnOnce() -> HighlighterResult<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| HighlighterError::update(format!("Worker task failed: {e}")))?
}

/// Lowercase hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> HighlighterResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Extract into a fresh `staging` dir and return the directory holding the
/// executable.
fn stage_release(kind: ArchiveKind, archive: &Path, staging: &Path) -> HighlighterResult<PathBuf> {
    if staging.exists() {
        std::fs::remove_dir_all(staging)?;
    }
    std::fs::create_dir_all(staging)?;

    let file = File::open(archive)?;
    match kind {
        ArchiveKind::Zip => {
            let mut zip = zip::ZipArchive::new(file)
                .map_err(|e| HighlighterError::update(format!("Failed to open zip: {e}")))?;
            zip.extract(staging)
                .map_err(|e| HighlighterError::update(format!("Failed to extract zip: {e}")))?;
        }
        ArchiveKind::TarGz => {
            let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(file));
            tar.unpack(staging)
                .map_err(|e| HighlighterError::update(format!("Failed to extract tar.gz: {e}")))?;
        }
    }

    let exe = find_executable(staging, 2).ok_or_else(|| {
        HighlighterError::update(format!("{DETECTOR_EXE} not found in release archive"))
    })?;
    mark_executable(&exe)?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| HighlighterError::update("Release executable has no parent directory"))
}

fn find_executable(dir: &Path, depth: usize) -> Option<PathBuf> {
    let direct = dir.join(DETECTOR_EXE);
    if direct.is_file() {
        return Some(direct);
    }
    if depth == 0 {
        return None;
    }
    let mut subdirs: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort();
    subdirs
        .iter()
        .find_map(|sub| find_executable(sub, depth - 1))
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> HighlighterResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> HighlighterResult<()> {
    Ok(())
}

/// Replace `bin/` with `release`. At every instant either the old or the
/// new release is reachable as `bin/` or `bin.bak/`.
fn swap_into_place(release: &Path, paths: &DetectorPaths) -> HighlighterResult<()> {
    let bin = paths.bin_dir();
    let backup = paths.backup_dir();

    if backup.exists() {
        if bin.exists() {
            std::fs::remove_dir_all(&backup)?;
        } else {
            // An earlier swap died between its two renames.
            std::fs::rename(&backup, &bin)?;
        }
    }

    let had_previous = bin.exists();
    if had_previous {
        std::fs::rename(&bin, &backup)?;
    }

    if let Err(err) = std::fs::rename(release, &bin) {
        if had_previous {
            if let Err(restore) = std::fs::rename(&backup, &bin) {
                tracing::error!(error = %restore, "Failed to restore previous detector");
            }
        }
        return Err(HighlighterError::update(format!(
            "Failed to activate new detector: {err}"
        )));
    }

    if had_previous {
        remove_dir_quietly(&backup);
    }
    Ok(())
}

fn remove_quietly(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %err, "Failed to remove file");
        }
    }
}

fn remove_dir_quietly(path: &Path) {
    if let Err(err) = std::fs::remove_dir_all(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %err, "Failed to remove directory");
        }
    }
}
