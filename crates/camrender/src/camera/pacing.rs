use std::time::Duration;

/// Highest software capture rate; anything faster uses the fallback interval.
pub const MAX_THROTTLED_FPS: u32 = 30;

/// Interval used when the requested rate is out of range.
pub const FALLBACK_CAPTURE_INTERVAL: Duration = Duration::from_millis(66);

/// How capture requests are issued once a session is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapturePacing {
    /// One repeating request; the hardware resubmits at its native rate.
    #[default]
    Repeating,
    /// Single captures issued from delayed loop tasks.
    Throttled { fps: u32 },
}

impl CapturePacing {
    /// Maps a configured rate to a pacing mode; zero means repeating.
    pub fn from_fps(fps: u32) -> Self {
        if fps == 0 {
            CapturePacing::Repeating
        } else {
            CapturePacing::Throttled { fps }
        }
    }

    /// Delay between single captures, or `None` for repeating requests.
    pub fn interval(&self) -> Option<Duration> {
        match *self {
            CapturePacing::Repeating => None,
            CapturePacing::Throttled { fps } if fps == 0 || fps > MAX_THROTTLED_FPS => {
                Some(FALLBACK_CAPTURE_INTERVAL)
            }
            CapturePacing::Throttled { fps } => Some(Duration::from_millis(1000 / fps as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttled_interval_follows_rate() {
        assert_eq!(CapturePacing::Throttled { fps: 10 }.interval(), Some(Duration::from_millis(100)));
        assert_eq!(CapturePacing::Throttled { fps: 30 }.interval(), Some(Duration::from_millis(33)));
    }

    #[test]
    fn out_of_range_rates_use_fallback() {
        assert_eq!(CapturePacing::Throttled { fps: 0 }.interval(), Some(FALLBACK_CAPTURE_INTERVAL));
        assert_eq!(CapturePacing::Throttled { fps: 60 }.interval(), Some(FALLBACK_CAPTURE_INTERVAL));
    }

    #[test]
    fn zero_fps_means_repeating() {
        assert_eq!(CapturePacing::from_fps(0), CapturePacing::Repeating);
        assert_eq!(CapturePacing::Repeating.interval(), None);
        assert_eq!(CapturePacing::from_fps(15), CapturePacing::Throttled { fps: 15 });
    }
}
