//! Highlighter Processing Core
//!
//! Turns detected highlights into editable clips:
//! - **Windows:** pad each highlight, clamp to the recording, and keep the
//!   padding as trims so the original range can be reconstructed
//! - **Mode:** stream-copy H.264/MP4 sources, re-encode everything else
//! - **Batching:** a few cuts at a time, each under a hard time limit;
//!   failed or stuck cuts are dropped instead of failing the batch

pub mod clip_cutter;

pub use clip_cutter::{ClipCutter, CutClip, CutMode, CutWindow};
