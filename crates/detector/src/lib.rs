//! Highlighter Detector
//!
//! Integration with the external highlight detector:
//! - [`protocol`]: start/end-token framing of JSON messages on stdout
//! - [`detector`]: spawning the detector, forwarding progress, cancellation
//! - [`updater`]: fetching, verifying, and installing detector releases
//! - [`paths`]: the on-disk installation layout

pub mod detector;
pub mod paths;
pub mod protocol;
pub mod updater;

pub use detector::{DetectorEvent, HighlightDetector};
pub use paths::{DetectorPaths, DETECTOR_EXE};
pub use protocol::{DetectorMessage, MessageFramer, Milestone};
pub use updater::{
    sha256_file, DetectorUpdater, HttpTransport, UpdateCheck, UpdateOutcome, UpdateStep,
    UpdateTransport,
};
