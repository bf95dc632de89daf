//! Highlighter Render Engine
//!
//! Offline rendering pipeline that decodes each clip frame-by-frame through
//! an external transcoder, blends clip boundaries with transition effects,
//! and re-encodes everything with a crossfaded audio track into one file.
//!
//! # Pipeline Architecture
//!
//! ```text
//! clip 1 ──► AudioSource ──┐
//! clip 2 ──► AudioSource ──┼── AudioCrossfader ──► AudioMixer (music) ──┐
//! clip N ──► AudioSource ──┘                                            │
//!                                                                       ▼
//! clip 1 ──► ProcessFrameSource ──┐                             ProcessFrameWriter
//! clip 2 ──► ProcessFrameSource ──┼── Transitioner (GPU, boundaries) ► (H.264 + AAC)
//! clip N ──► ProcessFrameSource ──┘                                     │
//!                                                                       ▼
//!                                                                  output.mp4
//! ```

pub mod audio;
pub mod export;
pub mod frame_source;
pub mod frame_writer;
pub mod gpu;
pub mod plan;
pub mod rendering_clip;
pub mod transcoder;
pub mod transitioner;

pub use audio::{AudioCrossfader, AudioMixer, AudioSource, MixInput};
pub use export::*;
pub use frame_source::ProcessFrameSource;
pub use frame_writer::ProcessFrameWriter;
pub use gpu::GpuContext;
pub use plan::FramePlan;
pub use rendering_clip::{ClipMetadata, ClipState, RenderingClip};
pub use transcoder::{MediaInfo, Transcoder};
pub use transitioner::Transitioner;
