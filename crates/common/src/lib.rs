//! Highlighter Common Utilities
//!
//! Shared infrastructure for all Highlighter crates:
//! - Error types and result aliases
//! - Progress throttling and frame/time conversions
//! - Cooperative cancellation
//! - Bounded-concurrency mapping
//! - Subprocess helpers (process groups, stderr draining, binary lookup)
//! - Tracing/logging initialization
//! - Configuration loading

pub mod cancel;
pub mod clock;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod logging;
pub mod process;

pub use cancel::*;
pub use clock::*;
pub use concurrency::*;
pub use config::*;
pub use error::*;
