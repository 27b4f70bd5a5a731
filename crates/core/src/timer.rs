//! Frame timing.

use std::time::{Duration, Instant};

/// Measures the delta between consecutive frames.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    /// Total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time elapsed since the last call to `tick()`.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    /// Delta time in seconds since the last tick.
    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts frames and reports a frames-per-second figure once per window.
///
/// The window title is refreshed from this, so it only yields a value when a
/// full window has elapsed.
#[derive(Debug)]
pub struct FpsCounter {
    window: Duration,
    accumulated: Duration,
    frames: u32,
    last_fps: u32,
}

impl FpsCounter {
    /// Counter reporting once per second.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            accumulated: Duration::ZERO,
            frames: 0,
            last_fps: 0,
        }
    }

    /// Record one frame that took `delta`.
    ///
    /// Returns `Some(fps)` when the window closed on this frame.
    pub fn frame(&mut self, delta: Duration) -> Option<u32> {
        self.frames += 1;
        self.accumulated += delta;
        if self.accumulated < self.window {
            return None;
        }

        let secs = self.accumulated.as_secs_f64();
        self.last_fps = (f64::from(self.frames) / secs).round() as u32;
        self.frames = 0;
        self.accumulated = Duration::ZERO;
        Some(self.last_fps)
    }

    /// The most recently reported value.
    pub fn fps(&self) -> u32 {
        self.last_fps
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_tick_is_monotonic() {
        let mut timer = Timer::new();
        let first = timer.tick();
        let second = timer.tick();
        assert!(timer.elapsed() >= first + second);
    }

    #[test]
    fn test_fps_reports_once_per_window() {
        let mut fps = FpsCounter::new();
        let frame = Duration::from_millis(10);

        for _ in 0..99 {
            assert_eq!(fps.frame(frame), None);
        }
        assert_eq!(fps.frame(frame), Some(100));
        assert_eq!(fps.fps(), 100);

        // Counter restarts after reporting.
        assert_eq!(fps.frame(frame), None);
        assert_eq!(fps.fps(), 100);
    }

    #[test]
    fn test_fps_slow_frames() {
        let mut fps = FpsCounter::with_window(Duration::from_secs(1));
        assert_eq!(fps.frame(Duration::from_millis(500)), None);
        assert_eq!(fps.frame(Duration::from_millis(500)), Some(2));
    }
}
