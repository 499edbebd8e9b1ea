//! Gapless playback sessions

mod scheduler;
mod session;
mod timeline;

pub use scheduler::{schedule_chunk, try_schedule_chunk};
pub use session::{
    PlaybackHandle, PlaybackSession, SessionState, SpeechRequest, SpeechTicket,
    DEFAULT_COMPLETION_GRACE,
};
pub use timeline::{is_session_complete, PlaybackTimeline};
