//! Presentation clock for outgoing video frames
//!
//! Each media track owns one clock. Timestamps start at zero, grow by a fixed
//! number of ticks per delivered frame and never repeat, whatever the spacing
//! of the frames arriving from the browser.

use std::time::Duration;
use tokio::time::Instant;

/// Standard RTP clock rate for video
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Default nominal frame rate
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Time base of a timestamp, as a `numerator / denominator` fraction of a second
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub numerator: u32,
    pub denominator: u32,
}

#[derive(Debug)]
pub struct PresentationClock {
    clock_rate: u32,
    ticks_per_frame: u64,
    next_pts: u64,
    delivered: u64,
    started: Option<Instant>,
}

impl PresentationClock {
    /// Create a clock. Zero rates fall back to the video defaults.
    #[must_use]
    pub fn new(clock_rate: u32, frame_rate: u32) -> Self {
        let clock_rate = if clock_rate == 0 { VIDEO_CLOCK_RATE } else { clock_rate };
        let frame_rate = if frame_rate == 0 { DEFAULT_FRAME_RATE } else { frame_rate };
        let ticks_per_frame = u64::from(clock_rate / frame_rate).max(1);

        Self {
            clock_rate,
            ticks_per_frame,
            next_pts: 0,
            delivered: 0,
            started: None,
        }
    }

    /// Timestamp the next delivered frame will carry
    #[must_use]
    pub fn peek(&self) -> u64 {
        self.next_pts
    }

    /// Commit the next timestamp to a delivered frame and return it.
    pub fn advance(&mut self) -> u64 {
        let pts = self.next_pts;
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
        self.next_pts += self.ticks_per_frame;
        self.delivered += 1;
        pts
    }

    /// Earliest instant a frame stamped with `pts` should be released.
    ///
    /// `None` until the first frame has been delivered.
    #[must_use]
    pub fn release_at(&self, pts: u64) -> Option<Instant> {
        self.started.map(|start| start + self.ticks_to_duration(pts))
    }

    #[must_use]
    pub fn time_base(&self) -> TimeBase {
        TimeBase {
            numerator: 1,
            denominator: self.clock_rate,
        }
    }

    /// Nominal display time of one frame
    #[must_use]
    pub fn frame_duration(&self) -> Duration {
        self.ticks_to_duration(self.ticks_per_frame)
    }

    #[must_use]
    pub fn ticks_per_frame(&self) -> u64 {
        self.ticks_per_frame
    }

    #[must_use]
    pub fn frames_delivered(&self) -> u64 {
        self.delivered
    }

    fn ticks_to_duration(&self, ticks: u64) -> Duration {
        let clock_rate = u64::from(self.clock_rate);
        let secs = ticks / clock_rate;
        let rem = ticks % clock_rate;
        Duration::from_secs(secs) + Duration::from_nanos(rem * 1_000_000_000 / clock_rate)
    }
}

impl Default for PresentationClock {
    fn default() -> Self {
        Self::new(VIDEO_CLOCK_RATE, DEFAULT_FRAME_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_step_is_3000_ticks() {
        let clock = PresentationClock::default();
        assert_eq!(clock.ticks_per_frame(), 3_000);
        assert_eq!(
            clock.time_base(),
            TimeBase {
                numerator: 1,
                denominator: 90_000
            }
        );
        assert_eq!(clock.frame_duration(), Duration::from_nanos(33_333_333));
    }

    #[test]
    fn test_strictly_increasing() {
        let mut clock = PresentationClock::default();
        let stamps: Vec<u64> = (0..100).map(|_| clock.advance()).collect();

        assert_eq!(stamps[0], 0);
        assert!(stamps.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(clock.frames_delivered(), 100);
    }

    #[test]
    fn test_peek_does_not_commit() {
        let mut clock = PresentationClock::default();
        assert_eq!(clock.peek(), 0);
        assert_eq!(clock.peek(), 0);
        assert_eq!(clock.advance(), 0);
        assert_eq!(clock.peek(), 3_000);
    }

    #[test]
    fn test_zero_rates_fall_back() {
        let clock = PresentationClock::new(0, 0);
        assert_eq!(clock.ticks_per_frame(), 3_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_schedule() {
        let mut clock = PresentationClock::default();
        assert!(clock.release_at(0).is_none());

        let first = clock.advance();
        let start = clock.release_at(first).unwrap();
        let second = clock.advance();

        assert_eq!(
            clock.release_at(second).unwrap() - start,
            clock.frame_duration()
        );
    }
}
