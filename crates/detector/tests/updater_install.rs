//! Detector installation against a local transport.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use highlighter_common::error::{HighlighterError, HighlighterResult};
use highlighter_detector::{
    sha256_file, DetectorPaths, DetectorUpdater, UpdateOutcome, UpdateStep, UpdateTransport,
    DETECTOR_EXE,
};
use highlighter_project_model::{current_platform, DetectorManifest};

#[derive(Default)]
struct Counters {
    fetches: AtomicUsize,
    downloads: AtomicUsize,
}

/// Serves a fixed manifest and copies a local archive as the download.
struct LocalTransport {
    manifest: DetectorManifest,
    archive: PathBuf,
    counters: Arc<Counters>,
}

#[async_trait]
impl UpdateTransport for LocalTransport {
    async fn fetch_manifest(&self, _url: &str) -> HighlighterResult<DetectorManifest> {
        self.counters.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.manifest.clone())
    }

    async fn download(
        &self,
        _url: &str,
        dest: &Path,
        on_progress: &mut (dyn FnMut(u64, Option<u64>) + Send),
    ) -> HighlighterResult<u64> {
        self.counters.downloads.fetch_add(1, Ordering::SeqCst);
        let bytes = std::fs::read(&self.archive)?;
        std::fs::write(dest, &bytes)?;
        let len = bytes.len() as u64;
        on_progress(len, Some(len));
        Ok(len)
    }
}

fn zip_release(path: &Path, exe_body: &[u8]) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default().unix_permissions(0o644);
    zip.start_file(DETECTOR_EXE, options).unwrap();
    zip.write_all(exe_body).unwrap();
    zip.start_file("models/weights.bin", options).unwrap();
    zip.write_all(&[7u8; 64]).unwrap();
    zip.finish().unwrap();
}

fn tar_gz_release(path: &Path, exe_body: &[u8]) {
    let encoder = flate2::write::GzEncoder::new(
        File::create(path).unwrap(),
        flate2::Compression::default(),
    );
    let mut builder = tar::Builder::new(encoder);
    let mut header = tar::Header::new_gnu();
    header.set_size(exe_body.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder
        .append_data(&mut header, format!("detector-release/{DETECTOR_EXE}"), exe_body)
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap();
}

fn manifest(version: &str, timestamp_ms: i64, url: &str, archive: Option<&Path>) -> DetectorManifest {
    let (checksum, size_bytes) = match archive {
        Some(path) => (
            sha256_file(path).unwrap(),
            std::fs::metadata(path).unwrap().len(),
        ),
        None => ("00".repeat(32), 0),
    };
    DetectorManifest {
        version: version.to_string(),
        platform: current_platform(),
        url: url.to_string(),
        size_bytes,
        checksum,
        timestamp_ms,
    }
}

/// An installation of version 1.0.0 whose binary contains `v1`.
fn install_v1(paths: &DetectorPaths) -> DetectorManifest {
    std::fs::create_dir_all(paths.bin_dir()).unwrap();
    std::fs::write(paths.executable(), b"v1").unwrap();
    let installed = manifest("1.0.0", 1_000, "https://cdn.invalid/detector-1.0.0.zip", None);
    installed.save(&paths.manifest_path()).unwrap();
    installed
}

fn entries(dir: &Path) -> BTreeSet<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

struct Setup {
    _scratch: tempfile::TempDir,
    root: tempfile::TempDir,
    archive: PathBuf,
}

impl Setup {
    fn new(archive_name: &str) -> Self {
        let scratch = tempfile::tempdir().unwrap();
        let archive = scratch.path().join(archive_name);
        Self {
            _scratch: scratch,
            root: tempfile::tempdir().unwrap(),
            archive,
        }
    }

    fn paths(&self) -> DetectorPaths {
        DetectorPaths::new(self.root.path())
    }

    fn updater(&self, remote: DetectorManifest) -> (DetectorUpdater<LocalTransport>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let transport = LocalTransport {
            manifest: remote,
            archive: self.archive.clone(),
            counters: counters.clone(),
        };
        (
            DetectorUpdater::new(transport, self.paths(), "https://cdn.invalid/manifest.json"),
            counters,
        )
    }
}

#[tokio::test]
async fn test_checksum_mismatch_leaves_install_untouched() {
    let setup = Setup::new("detector-2.0.0.zip");
    let paths = setup.paths();
    let installed = install_v1(&paths);
    zip_release(&setup.archive, b"v2");
    let remote = manifest("2.0.0", 2_000, "https://cdn.invalid/detector-2.0.0.zip", None);
    let (updater, _) = setup.updater(remote);

    let mut steps = Vec::new();
    let err = updater
        .ensure_current(|step| steps.push(step))
        .await
        .unwrap_err();

    assert!(matches!(err, HighlighterError::ChecksumMismatch { .. }), "{err}");
    assert_eq!(std::fs::read(paths.executable()).unwrap(), b"v1");
    assert_eq!(entries(&paths.bin_dir()), BTreeSet::from([DETECTOR_EXE.to_string()]));
    assert_eq!(updater.installed_manifest().unwrap(), Some(installed));
    assert_eq!(
        entries(paths.root()),
        BTreeSet::from(["bin".to_string(), "manifest.json".to_string()])
    );
    assert!(steps.contains(&UpdateStep::Verifying));
    assert!(!steps.contains(&UpdateStep::Installing));
}

#[tokio::test]
async fn test_zip_release_replaces_previous_install() {
    let setup = Setup::new("detector-2.0.0.zip");
    let paths = setup.paths();
    install_v1(&paths);
    zip_release(&setup.archive, b"v2");
    let remote = manifest(
        "2.0.0",
        2_000,
        "https://cdn.invalid/detector-2.0.0.zip",
        Some(&setup.archive),
    );
    let (updater, counters) = setup.updater(remote.clone());

    let mut steps = Vec::new();
    let outcome = updater.ensure_current(|step| steps.push(step)).await.unwrap();

    assert_eq!(outcome, UpdateOutcome::Installed { version: "2.0.0".into() });
    assert_eq!(std::fs::read(paths.executable()).unwrap(), b"v2");
    assert!(paths.bin_dir().join("models").join("weights.bin").is_file());
    assert_eq!(updater.installed_manifest().unwrap(), Some(remote));
    assert_eq!(
        entries(paths.root()),
        BTreeSet::from(["bin".to_string(), "manifest.json".to_string()])
    );
    assert_eq!(counters.downloads.load(Ordering::SeqCst), 1);

    let order: Vec<&UpdateStep> = steps
        .iter()
        .filter(|s| !matches!(s, UpdateStep::Downloading { .. }))
        .collect();
    assert_eq!(
        order,
        vec![
            &UpdateStep::Checking,
            &UpdateStep::UpdateNeeded { version: "2.0.0".into() },
            &UpdateStep::Verifying,
            &UpdateStep::Installing,
            &UpdateStep::Installed { version: "2.0.0".into() },
        ]
    );

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(paths.executable()).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}

#[tokio::test]
async fn test_nested_tar_gz_release_on_fresh_host() {
    let setup = Setup::new("detector-3.1.0.tar.gz");
    let paths = setup.paths();
    tar_gz_release(&setup.archive, b"v3");
    let remote = manifest(
        "3.1.0",
        3_000,
        "https://cdn.invalid/detector-3.1.0.tar.gz",
        Some(&setup.archive),
    );
    let (updater, _) = setup.updater(remote);

    let outcome = updater.ensure_current(|_| {}).await.unwrap();

    assert_eq!(outcome.version(), "3.1.0");
    assert_eq!(std::fs::read(paths.executable()).unwrap(), b"v3");
    assert!(!paths.version_dir("3.1.0").exists());
    assert!(!paths.backup_dir().exists());
}

#[tokio::test]
async fn test_current_install_is_checked_once() {
    let setup = Setup::new("detector-1.0.0.zip");
    let paths = setup.paths();
    let installed = install_v1(&paths);
    let (updater, counters) = setup.updater(installed);

    let first = updater.ensure_current(|_| {}).await.unwrap();
    let second = updater.ensure_current(|_| {}).await.unwrap();

    assert_eq!(first, UpdateOutcome::UpToDate { version: "1.0.0".into() });
    assert_eq!(second, first);
    assert_eq!(counters.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(counters.downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_binary_forces_reinstall() {
    let setup = Setup::new("detector-1.0.0.zip");
    let paths = setup.paths();
    zip_release(&setup.archive, b"v1-again");
    let remote = manifest(
        "1.0.0",
        1_000,
        "https://cdn.invalid/detector-1.0.0.zip",
        Some(&setup.archive),
    );
    remote.save(&paths.manifest_path()).unwrap();
    let (updater, _) = setup.updater(remote);

    let check = updater.check().await.unwrap();
    assert!(check.update_required);

    updater.ensure_current(|_| {}).await.unwrap();
    assert_eq!(std::fs::read(paths.executable()).unwrap(), b"v1-again");
}

#[tokio::test]
async fn test_foreign_platform_manifest_is_rejected() {
    let setup = Setup::new("detector-2.0.0.zip");
    zip_release(&setup.archive, b"v2");
    let mut remote = manifest(
        "2.0.0",
        2_000,
        "https://cdn.invalid/detector-2.0.0.zip",
        Some(&setup.archive),
    );
    remote.platform = "plan9-mips".to_string();
    let (updater, counters) = setup.updater(remote);

    let err = updater.ensure_current(|_| {}).await.unwrap_err();
    assert!(matches!(err, HighlighterError::Update { .. }));
    assert!(err.to_string().contains("plan9-mips"));
    assert_eq!(counters.downloads.load(Ordering::SeqCst), 0);
    assert!(!setup.paths().is_installed());
}

async fn assert_version_rejected(version: &str) {
    let setup = Setup::new("detector-2.0.0.zip");
    let paths = setup.paths();
    let installed = install_v1(&paths);
    zip_release(&setup.archive, b"v2");
    let remote = manifest(
        version,
        2_000,
        "https://cdn.invalid/detector-2.0.0.zip",
        Some(&setup.archive),
    );
    let (updater, counters) = setup.updater(remote);

    let err = updater.ensure_current(|_| {}).await.unwrap_err();

    assert!(matches!(err, HighlighterError::Update { .. }), "{err}");
    assert_eq!(counters.downloads.load(Ordering::SeqCst), 0);
    assert_eq!(std::fs::read(paths.executable()).unwrap(), b"v1");
    assert_eq!(updater.installed_manifest().unwrap(), Some(installed));
    assert_eq!(
        entries(paths.root()),
        BTreeSet::from(["bin".to_string(), "manifest.json".to_string()])
    );
}

#[tokio::test]
async fn test_empty_version_keeps_install_root() {
    assert_version_rejected("").await;
}

#[tokio::test]
async fn test_version_named_bin_keeps_active_release() {
    assert_version_rejected("bin").await;
}

#[tokio::test]
async fn test_version_with_path_separator_is_rejected() {
    assert_version_rejected("../escape").await;
}
