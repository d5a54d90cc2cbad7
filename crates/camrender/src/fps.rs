use std::time::{Duration, Instant};

pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Counts drawn frames and yields the count once per reporting window.
///
/// The first frame only opens the window. Frames inside the window add to the
/// count; the first frame past it reports the count and starts a new window
/// with itself counted.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    interval: Duration,
    window_start: Option<Instant>,
    count: u32,
}

impl FpsCounter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            window_start: None,
            count: 0,
        }
    }

    pub fn record(&mut self) -> Option<u32> {
        self.record_at(Instant::now())
    }

    pub fn record_at(&mut self, now: Instant) -> Option<u32> {
        let Some(start) = self.window_start else {
            self.window_start = Some(now);
            return None;
        };
        if now.saturating_duration_since(start) <= self.interval {
            self.count += 1;
            None
        } else {
            let reported = self.count;
            self.count = 1;
            self.window_start = Some(now);
            Some(reported)
        }
    }

    pub fn reset(&mut self) {
        self.window_start = None;
        self.count = 0;
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(DEFAULT_REPORT_INTERVAL)
    }
}

/// Accumulator-based draw cap. A pacer without a target lets every frame
/// through.
#[derive(Debug, Clone)]
pub struct FramePacer {
    target_interval: Option<Duration>,
    accumulator: Duration,
    last_tick: Option<Instant>,
}

const PACER_SLACK: Duration = Duration::from_micros(250);

impl FramePacer {
    /// `max_fps` of zero disables pacing.
    pub fn new(max_fps: u32) -> Self {
        let target_interval = (max_fps > 0).then(|| Duration::from_secs(1) / max_fps);
        Self {
            target_interval,
            accumulator: Duration::ZERO,
            last_tick: None,
        }
    }

    pub fn is_limited(&self) -> bool {
        self.target_interval.is_some()
    }

    pub fn reset(&mut self) {
        self.accumulator = Duration::ZERO;
        self.last_tick = None;
    }

    pub fn should_render(&mut self) -> bool {
        self.should_render_at(Instant::now())
    }

    pub fn should_render_at(&mut self, now: Instant) -> bool {
        let last = self.last_tick.replace(now);
        let (Some(interval), Some(last)) = (self.target_interval, last) else {
            return true;
        };
        let delta = now.saturating_duration_since(last);
        // A long stall must not release a burst of frames afterwards.
        self.accumulator = self.accumulator.saturating_add(delta).min(interval * 2);
        if self.accumulator + PACER_SLACK < interval {
            false
        } else {
            self.accumulator = self.accumulator.saturating_sub(interval);
            true
        }
    }
}
