//! Frame timing
//!
//! [`GameTime`] is the snapshot handed to update, [`RenderContext`] the one
//! handed to draw.

use std::time::Duration;

/// Snapshot of game time for one frame.
#[derive(Debug, Clone)]
pub struct GameTime {
    total: Duration,
    elapsed: Duration,
    warp_elapsed: Duration,
    frame_count: u64,
    frames_per_second: f32,
    time_per_frame: Duration,
    fps_updated: bool,
    factor: f64,
    accumulated_elapsed: Duration,
    accumulated_frames: u32,
}

impl Default for GameTime {
    fn default() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }
}

impl GameTime {
    /// Time at `total`, `elapsed` after the previous frame
    #[must_use]
    pub fn new(total: Duration, elapsed: Duration) -> Self {
        Self {
            total,
            elapsed,
            warp_elapsed: elapsed,
            frame_count: 0,
            frames_per_second: 0.0,
            time_per_frame: Duration::ZERO,
            fps_updated: false,
            factor: 1.0,
            accumulated_elapsed: Duration::ZERO,
            accumulated_frames: 0,
        }
    }

    /// Advance to the next frame.
    ///
    /// Frame rate figures are refreshed once more than a second of counted
    /// frames has accumulated.
    pub fn update(&mut self, total: Duration, elapsed: Duration, increment_frame_count: bool) {
        self.total = total;
        self.elapsed = elapsed;
        self.warp_elapsed = elapsed.mul_f64(self.factor);
        self.fps_updated = false;

        if increment_frame_count {
            self.accumulated_elapsed += elapsed;
            let seconds = self.accumulated_elapsed.as_secs_f64();
            if self.accumulated_frames > 0 && seconds > 1.0 {
                self.time_per_frame = self.accumulated_elapsed / self.accumulated_frames;
                self.frames_per_second = (f64::from(self.accumulated_frames) / seconds) as f32;
                self.accumulated_frames = 0;
                self.accumulated_elapsed = Duration::ZERO;
                self.fps_updated = true;
            }
            self.accumulated_frames += 1;
            self.frame_count += 1;
        }
    }

    /// Restart counting from `total`
    pub fn reset(&mut self, total: Duration) {
        self.update(total, Duration::ZERO, false);
        self.accumulated_elapsed = Duration::ZERO;
        self.accumulated_frames = 0;
        self.frame_count = 0;
    }

    /// Time since the start of the game
    #[must_use]
    pub fn total(&self) -> Duration {
        self.total
    }

    /// Time since the previous frame
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Elapsed time in seconds
    #[must_use]
    pub fn delta_seconds(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }

    /// Elapsed time scaled by the time factor
    #[must_use]
    pub fn warp_elapsed(&self) -> Duration {
        self.warp_elapsed
    }

    /// Frames counted since the start
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Frames per second over the last full window
    #[must_use]
    pub fn frames_per_second(&self) -> f32 {
        self.frames_per_second
    }

    /// Average frame duration over the last full window
    #[must_use]
    pub fn time_per_frame(&self) -> Duration {
        self.time_per_frame
    }

    /// Whether the frame rate figures changed this frame
    #[must_use]
    pub fn fps_updated(&self) -> bool {
        self.fps_updated
    }

    /// Time multiplier
    #[must_use]
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Set the time multiplier, negative values clamp to zero
    pub fn set_factor(&mut self, factor: f64) {
        self.factor = factor.max(0.0);
    }

    /// Back to real time
    pub fn reset_factor(&mut self) {
        self.factor = 1.0;
    }
}

/// Per-frame value handed to processors' draw.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    /// Index of the frame being drawn
    pub frame: u64,
    /// Time of the frame being drawn
    pub time: GameTime,
}
