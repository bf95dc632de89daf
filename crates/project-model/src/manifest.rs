//! Detector release manifest.
//!
//! The same JSON document is served remotely and persisted next to the
//! installed detector binary. Comparing the two decides whether an update
//! is needed.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::export::ModelError;

/// Description of one detector release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorManifest {
    /// Release version string.
    pub version: String,

    /// Target platform (e.g. "linux-x64", "win32-x64").
    pub platform: String,

    /// Archive download URL.
    pub url: String,

    /// Archive size in bytes.
    #[serde(rename = "size")]
    pub size_bytes: u64,

    /// SHA-256 of the archive, lowercase hex.
    pub checksum: String,

    /// Publication time, epoch milliseconds.
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
}

impl DetectorManifest {
    /// Whether `self` (the freshly fetched manifest) should replace `installed`.
    ///
    /// An update is required when nothing is installed, the versions differ,
    /// or the remote release is newer.
    pub fn requires_update(&self, installed: Option<&DetectorManifest>) -> bool {
        match installed {
            None => true,
            Some(local) => {
                local.version != self.version || self.timestamp_ms > local.timestamp_ms
            }
        }
    }

    /// Publication time as a UTC datetime, if representable.
    pub fn published_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp_millis(self.timestamp_ms)
    }

    /// Read a persisted manifest. A missing file yields `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>, ModelError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Persist the manifest as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Platform identifier for the running host, in manifest notation.
pub fn current_platform() -> String {
    let os = match std::env::consts::OS {
        "windows" => "win32",
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        other => other,
    };
    format!("{os}-{arch}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(version: &str, timestamp_ms: i64) -> DetectorManifest {
        DetectorManifest {
            version: version.to_string(),
            platform: "linux-x64".to_string(),
            url: "https://example.invalid/detector.zip".to_string(),
            size_bytes: 1024,
            checksum: "00".repeat(32),
            timestamp_ms,
        }
    }

    #[test]
    fn test_requires_update_rules() {
        let remote = manifest("1.2.0", 2_000);
        assert!(remote.requires_update(None));
        assert!(remote.requires_update(Some(&manifest("1.1.0", 2_000))));
        assert!(remote.requires_update(Some(&manifest("1.2.0", 1_000))));
        assert!(!remote.requires_update(Some(&manifest("1.2.0", 2_000))));
        assert!(!remote.requires_update(Some(&manifest("1.2.0", 3_000))));
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(manifest("1.0.0", 5)).unwrap();
        assert_eq!(json["size"], 1024);
        assert_eq!(json["timestamp"], 5);
        assert!(json.get("size_bytes").is_none());
    }

    #[test]
    fn test_load_missing_is_none_and_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("manifest.json");
        assert!(DetectorManifest::load(&path).unwrap().is_none());

        let m = manifest("2.0.0", 1_700_000_000_000);
        m.save(&path).unwrap();
        assert_eq!(DetectorManifest::load(&path).unwrap(), Some(m.clone()));
        assert!(m.published_at().is_some());
    }

    #[test]
    fn test_current_platform_shape() {
        let platform = current_platform();
        assert!(platform.contains('-'));
    }
}
