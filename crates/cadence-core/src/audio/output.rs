//! The audio output boundary: a real-time clock plus scheduled voices

use std::fmt;

use super::frame::PcmBuffer;
use crate::error::Result;

/// Identifier of one scheduled buffer on an output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VoiceId(pub u64);

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice-{}", self.0)
    }
}

/// Invoked once when a voice finishes playing on its own.
pub type EndedCallback = Box<dyn FnOnce() + Send + 'static>;

/// A shared audio clock and output device.
///
/// Implementations must never invoke an [`EndedCallback`] from inside
/// `schedule` or `stop`, nor while holding their own internal locks: callers
/// hold their session lock across these calls and the callback takes it
/// again. A stopped voice never reports completion.
pub trait AudioOutput: Send + Sync {
    /// Current position of the output clock, in seconds
    fn current_time(&self) -> f64;

    /// Play `buffer` starting at `start_at` on the output clock
    fn schedule(&self, buffer: PcmBuffer, start_at: f64, on_ended: EndedCallback)
        -> Result<VoiceId>;

    /// Silence a voice immediately and release its buffer
    fn stop(&self, voice: VoiceId);
}
