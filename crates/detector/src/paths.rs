//! On-disk layout of a detector installation.
//!
//! ```text
//! <root>/
//!   bin/<exe>          active release
//!   bin.bak/           previous release, only present mid-swap
//!   <version>/         extraction staging for a new release
//!   manifest.json      manifest of the active release
//! ```

use std::path::{Path, PathBuf};

use highlighter_common::error::{HighlighterError, HighlighterResult};

const RESERVED_NAMES: [&str; 3] = ["bin", "bin.bak", "manifest.json"];

/// File name of the detector executable.
pub const DETECTOR_EXE: &str = if cfg!(windows) {
    "highlighter-detector.exe"
} else {
    "highlighter-detector"
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorPaths {
    root: PathBuf,
}

impl DetectorPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join("bin.bak")
    }

    pub fn executable(&self) -> PathBuf {
        self.bin_dir().join(DETECTOR_EXE)
    }

    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.root.join(version)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    /// Where a release archive is downloaded before verification.
    pub fn archive_path(&self, version: &str, extension: &str) -> PathBuf {
        self.root.join(format!("detector-{version}.{extension}"))
    }

    pub fn is_installed(&self) -> bool {
        self.executable().is_file()
    }
}

/// Reject release versions that cannot be used as a staging directory name.
///
/// The version is joined onto the install root, so it must be a single
/// plain path component that does not alias the active layout.
pub fn validate_version(version: &str) -> HighlighterResult<()> {
    let invalid = version.trim().is_empty()
        || version == "."
        || version == ".."
        || version.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
        || RESERVED_NAMES
            .iter()
            .any(|name| version.eq_ignore_ascii_case(name));
    if invalid {
        return Err(HighlighterError::update(format!(
            "Invalid detector version {version:?}"
        )));
    }
    Ok(())
}
