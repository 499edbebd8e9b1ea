//! Audio frames, PCM decoding and output clocks

mod clock;
#[cfg(feature = "device")]
mod device;
mod frame;
mod manual;
mod output;

pub use clock::ClockOutput;
#[cfg(feature = "device")]
pub use device::DeviceOutput;
pub use frame::{decode_frame, encode_pcm16, AudioFrame, PcmBuffer, PcmFormat};
pub use manual::{ManualOutput, ScheduledSpan};
pub use output::{AudioOutput, EndedCallback, VoiceId};
