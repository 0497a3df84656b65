//! Debug and statistics module

use std::collections::VecDeque;
use std::time::Duration;

/// Sliding window of durations
#[derive(Debug, Clone)]
pub struct TimingStats {
    /// Most recent samples
    samples: VecDeque<Duration>,
    /// Maximum samples to keep
    max_samples: usize,
    /// Average sample in milliseconds
    avg_ms: f32,
    /// Minimum sample in milliseconds
    min_ms: f32,
    /// Maximum sample in milliseconds
    max_ms: f32,
    /// Samples recorded since creation
    total_samples: u64,
}

impl TimingStats {
    /// Default window length
    pub const DEFAULT_WINDOW: usize = 120;

    /// Create a tracker keeping the last `window` samples
    pub fn new(window: usize) -> Self {
        let max_samples = window.max(1);
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
            avg_ms: 0.0,
            min_ms: 0.0,
            max_ms: 0.0,
            total_samples: 0,
        }
    }

    /// Record one sample
    pub fn record(&mut self, sample: Duration) {
        self.total_samples += 1;

        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);

        self.update_stats();
    }

    fn update_stats(&mut self) {
        if self.samples.is_empty() {
            return;
        }

        let mut total = Duration::ZERO;
        let mut min = Duration::MAX;
        let mut max = Duration::ZERO;

        for &sample in &self.samples {
            total += sample;
            min = min.min(sample);
            max = max.max(sample);
        }

        let count = self.samples.len() as f32;
        self.avg_ms = total.as_secs_f32() / count * 1000.0;
        self.min_ms = min.as_secs_f32() * 1000.0;
        self.max_ms = max.as_secs_f32() * 1000.0;
    }

    /// Samples per second implied by the average, 0 when samples are empty
    pub fn rate(&self) -> f32 {
        if self.avg_ms > 0.0 {
            1000.0 / self.avg_ms
        } else {
            0.0
        }
    }

    /// Average sample in milliseconds
    pub fn avg_ms(&self) -> f32 {
        self.avg_ms
    }

    /// Minimum sample in milliseconds
    pub fn min_ms(&self) -> f32 {
        self.min_ms
    }

    /// Maximum sample in milliseconds
    pub fn max_ms(&self) -> f32 {
        self.max_ms
    }

    /// Most recent sample
    pub fn last(&self) -> Option<Duration> {
        self.samples.back().copied()
    }

    /// Samples recorded since creation
    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// One-line summary
    pub fn format_stats(&self) -> String {
        format!(
            "{:.2}ms (min: {:.2}, max: {:.2})",
            self.avg_ms, self.min_ms, self.max_ms
        )
    }
}

impl Default for TimingStats {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}

/// Update and draw timings of one processor
#[derive(Debug, Clone, Default)]
pub struct ProcessorTimings {
    /// Time spent in update
    pub update: TimingStats,
    /// Time spent in draw
    pub draw: TimingStats,
}

/// Frame statistics tracker
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    /// Frame durations
    pub frames: TimingStats,
}

impl FrameStats {
    /// Create a new frame stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame with the given delta time
    pub fn record_frame(&mut self, delta: Duration) {
        self.frames.record(delta);
    }

    /// Get current FPS
    pub fn fps(&self) -> f32 {
        self.frames.rate()
    }

    /// Get total frames recorded
    pub fn total_frames(&self) -> u64 {
        self.frames.total_samples()
    }

    /// Get a formatted stats string
    pub fn format_stats(&self) -> String {
        format!("FPS: {:.1} | Frame: {}", self.fps(), self.frames.format_stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_drops_oldest() {
        let mut stats = TimingStats::new(2);
        stats.record(Duration::from_millis(10));
        stats.record(Duration::from_millis(20));
        stats.record(Duration::from_millis(30));

        assert_eq!(stats.total_samples(), 3);
        assert_eq!(stats.last(), Some(Duration::from_millis(30)));
        assert!((stats.avg_ms() - 25.0).abs() < 1e-3);
        assert!((stats.min_ms() - 20.0).abs() < 1e-3);
        assert!((stats.max_ms() - 30.0).abs() < 1e-3);
    }

    #[test]
    fn test_frame_rate() {
        let mut stats = FrameStats::new();
        assert_eq!(stats.fps(), 0.0);

        stats.record_frame(Duration::from_millis(20));
        assert!((stats.fps() - 50.0).abs() < 1e-2);
        assert!(stats.format_stats().starts_with("FPS: 50.0"));
    }
}
