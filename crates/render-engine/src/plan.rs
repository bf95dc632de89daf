//! Frame accounting for an export.
//!
//! Every clip contributes `round(trimmed_secs * fps)` frames. At each
//! boundary the last `t` frames of the outgoing clip are blended with the
//! first `t` frames of the incoming clip, so the boundary costs `t` frames of
//! output. `t` is the configured transition length in frames, capped at half
//! of either neighbour so a transition never eats more than half a clip.

use highlighter_common::clock::{frames_to_secs, secs_to_frames};

/// Planned frame layout of one export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePlan {
    fps: u32,
    clip_frames: Vec<u64>,
    transition_frames: Vec<u64>,
}

impl FramePlan {
    /// Build a plan from trimmed clip durations and the effective transition
    /// duration (zero for hard cuts).
    pub fn new(trimmed_secs: &[f64], transition_secs: f64, fps: u32) -> Self {
        let clip_frames: Vec<u64> = trimmed_secs
            .iter()
            .map(|secs| secs_to_frames(*secs, fps))
            .collect();
        let configured = secs_to_frames(transition_secs, fps);
        let transition_frames = clip_frames
            .windows(2)
            .map(|pair| effective_transition_frames(configured, pair[0], pair[1]))
            .collect();

        Self {
            fps,
            clip_frames,
            transition_frames,
        }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn clip_count(&self) -> usize {
        self.clip_frames.len()
    }

    /// Frames decoded from clip `index`.
    pub fn clip_frames(&self, index: usize) -> u64 {
        self.clip_frames.get(index).copied().unwrap_or(0)
    }

    /// Blended frames between clip `index` and clip `index + 1`.
    pub fn transition_frames(&self, boundary: usize) -> u64 {
        self.transition_frames.get(boundary).copied().unwrap_or(0)
    }

    /// Leading frames of clip `index` consumed by the previous boundary.
    pub fn incoming_frames(&self, index: usize) -> u64 {
        match index {
            0 => 0,
            i => self.transition_frames(i - 1),
        }
    }

    /// Trailing frames of clip `index` blended into the next clip.
    pub fn outgoing_frames(&self, index: usize) -> u64 {
        self.transition_frames(index)
    }

    /// Frames of clip `index` written without blending.
    pub fn solo_frames(&self, index: usize) -> u64 {
        self.clip_frames(index)
            .saturating_sub(self.incoming_frames(index))
            .saturating_sub(self.outgoing_frames(index))
    }

    /// Output frame count after transitions overlap their neighbours.
    pub fn total_frames(&self) -> u64 {
        let clips: u64 = self.clip_frames.iter().sum();
        let transitions: u64 = self.transition_frames.iter().sum();
        clips.saturating_sub(transitions)
    }

    pub fn total_duration_secs(&self) -> f64 {
        frames_to_secs(self.total_frames(), self.fps)
    }

    /// Audio overlap at each boundary, matching the video transitions.
    pub fn overlaps_secs(&self) -> Vec<f64> {
        self.transition_frames
            .iter()
            .map(|frames| frames_to_secs(*frames, self.fps))
            .collect()
    }
}

/// Transition length at one boundary: the configured length capped at half
/// of each neighbour.
pub fn effective_transition_frames(configured: u64, from_frames: u64, to_frames: u64) -> u64 {
    configured.min(from_frames / 2).min(to_frames / 2)
}

/// Blend progress for the `step`-th of `steps` transition frames. Both ends
/// are exclusive, so no blended frame duplicates a pure source frame.
pub fn transition_progress(step: u64, steps: u64) -> f32 {
    (step as f64 + 1.0) as f32 / (steps as f64 + 1.0) as f32
}
