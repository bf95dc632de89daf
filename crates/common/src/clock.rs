//! Timing utilities for progress reporting.
//!
//! Frame cadence during a preview export can reach hundreds of frames per
//! second, far more than any progress consumer wants to see. The
//! [`ProgressThrottle`] gates per-frame callbacks to a fixed wall-clock rate.

use std::time::{Duration, Instant};

/// Rate limiter for progress callbacks.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last_tick: Option<Instant>,
}

impl ProgressThrottle {
    /// Create a throttle that fires at most once per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_tick: None,
        }
    }

    /// Check whether enough time has passed since the last tick.
    /// Returns true and records the tick if ready.
    /// The first call always returns true.
    pub fn should_tick(&mut self) -> bool {
        self.should_tick_at(Instant::now())
    }

    /// [`Self::should_tick`] against an explicit instant.
    pub fn should_tick_at(&mut self, now: Instant) -> bool {
        match self.last_tick {
            None => {
                self.last_tick = Some(now);
                true
            }
            Some(last) if now.duration_since(last) >= self.interval => {
                self.last_tick = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Minimum spacing between ticks.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Convert a duration in seconds to a whole frame count at `fps`.
pub fn secs_to_frames(secs: f64, fps: u32) -> u64 {
    if secs <= 0.0 {
        return 0;
    }
    (secs * fps as f64).round() as u64
}

/// Convert a frame count back to seconds at `fps`.
pub fn frames_to_secs(frames: u64, fps: u32) -> f64 {
    if fps == 0 {
        return 0.0;
    }
    frames as f64 / fps as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_first_tick_fires() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(200));
        let start = Instant::now();
        assert!(throttle.should_tick_at(start));
        assert!(!throttle.should_tick_at(start + Duration::from_millis(50)));
        assert!(throttle.should_tick_at(start + Duration::from_millis(210)));
    }

    #[test]
    fn test_frame_conversions() {
        assert_eq!(secs_to_frames(10.0, 30), 300);
        assert_eq!(secs_to_frames(4.0, 30), 120);
        assert_eq!(secs_to_frames(0.5, 30), 15);
        assert_eq!(secs_to_frames(-1.0, 30), 0);
        assert!((frames_to_secs(540, 30) - 18.0).abs() < 1e-9);
        assert_eq!(frames_to_secs(10, 0), 0.0);
    }
}
