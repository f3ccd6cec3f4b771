//! Uptime clock for output sessions.
//!
//! An output records a clock when its native object starts. The clock gives
//! the monotonic uptime reported in live stats and the wall-clock start time
//! reported in snapshots.

use std::time::{Duration, Instant};

/// Monotonic uptime anchored to the moment an output went live.
#[derive(Debug, Clone)]
pub struct UptimeClock {
    /// The instant the session started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,
}

impl UptimeClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Time elapsed since start.
    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Milliseconds elapsed since start.
    pub fn elapsed_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Seconds elapsed since start.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    /// Format a millisecond duration as `HH:MM:SS.mmm`.
    pub fn format_timecode(ms: u64) -> String {
        let hours = ms / 3_600_000;
        let minutes = (ms / 60_000) % 60;
        let seconds = (ms / 1000) % 60;
        let millis = ms % 1000;
        format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
    }
}

/// Fraction of a fixed-duration blend that has elapsed, clamped to `[0, 1]`.
pub fn blend_progress(elapsed: Duration, duration_ms: u32) -> f64 {
    if duration_ms == 0 {
        return 1.0;
    }
    (elapsed.as_secs_f64() * 1000.0 / duration_ms as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_elapsed() {
        let clock = UptimeClock::start();
        assert!(clock.elapsed_ms() < 1000);
        assert!(!clock.epoch_wall().is_empty());
    }

    #[test]
    fn test_format_timecode() {
        assert_eq!(UptimeClock::format_timecode(0), "00:00:00.000");
        assert_eq!(UptimeClock::format_timecode(3_723_004), "01:02:03.004");
    }

    #[test]
    fn test_blend_progress_clamps() {
        assert!((blend_progress(Duration::from_millis(150), 300) - 0.5).abs() < 1e-9);
        assert_eq!(blend_progress(Duration::from_millis(900), 300), 1.0);
        assert_eq!(blend_progress(Duration::from_millis(10), 0), 1.0);
    }
}
