//! The shared "next free start time" cursor of a session

use super::session::PlaybackHandle;

/// Slack allowed between the output clock and the timeline end when deciding
/// that playback has drained. Output clocks report completion at sample or
/// timer granularity, never exactly on the float boundary.
const CLOCK_TOLERANCE: f64 = 0.001;

/// Where the next decoded buffer will start, in output clock seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackTimeline {
    next_start_time: f64,
}

impl PlaybackTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Claim `duration` seconds directly after everything already claimed.
    ///
    /// Returns the start time. If the timeline fell behind the clock (the
    /// network was slower than playback) the buffer starts now instead.
    pub fn reserve(&mut self, clock_now: f64, duration: f64) -> f64 {
        let start = clock_now.max(self.next_start_time);
        self.next_start_time = start + duration.max(0.0);
        start
    }

    /// Seconds of claimed audio still ahead of the clock
    pub fn remaining(&self, clock_now: f64) -> f64 {
        (self.next_start_time - clock_now).max(0.0)
    }

    pub fn reset(&mut self) {
        self.next_start_time = 0.0;
    }
}

/// A session has finished playing when nothing is scheduled and the clock
/// has caught up with the end of the timeline.
pub fn is_session_complete(
    handles: &[PlaybackHandle],
    timeline: &PlaybackTimeline,
    clock_now: f64,
) -> bool {
    handles.is_empty() && clock_now + CLOCK_TOLERANCE >= timeline.next_start_time()
}
