//! Highlighter Project Model
//!
//! Defines the core data contracts shared by the rendering, cutting, and
//! detection crates:
//! - **Clip:** a source recording plus its trims and lazily probed metadata
//! - **Highlight:** a detected moment, immutable once received
//! - **Export:** output options, music mix settings, and the export request
//! - **Transition:** the closed set of transition effects and their parameters
//! - **Manifest:** detector release descriptions used by the updater
//!
//! All times are seconds relative to the start of the source file.

pub mod clip;
pub mod export;
pub mod highlight;
pub mod manifest;
pub mod transition;

pub use clip::*;
pub use export::*;
pub use highlight::*;
pub use manifest::*;
pub use transition::*;
