//! Cadence Core - Resilient Streaming Speech
//!
//! This crate turns text into gapless streamed speech over a rate-limited
//! synthesis API, rotating through a pool of API keys as they run out.
//!
//! # Architecture
//!
//! - [`credentials`]: ordered key pool with monotonic rotation
//! - [`text`]: markdown cleanup and sentence-aligned chunking
//! - [`synthesis`]: streaming requests with retry, rotation and deadlines
//! - [`playback`]: session state machine and gapless timeline scheduling
//! - [`orchestrator`]: ties the above together for one utterance
//!
//! # Example
//!
//! ```ignore
//! use cadence_core::{
//!     ChunkOrchestrator, ClockOutput, CredentialPool, GeminiBackend, PcmFormat,
//!     PlaybackSession, SpeechClient, SpeechConfig,
//! };
//! use std::sync::Arc;
//!
//! let config = SpeechConfig::default();
//! let pool = Arc::new(CredentialPool::new(["key-1", "key-2"])?);
//! let backend = Arc::new(GeminiBackend::new(&config)?);
//! let orchestrator = ChunkOrchestrator::new(SpeechClient::new(backend, pool, &config), &config);
//!
//! let session = Arc::new(PlaybackSession::new(
//!     Arc::new(ClockOutput::new()),
//!     PcmFormat::mono(config.sample_rate),
//! ));
//! orchestrator.speak("Hello there. How are you?", &session).await;
//! ```

pub mod audio;
pub mod config;
pub mod credentials;
pub mod error;
pub mod orchestrator;
pub mod playback;
pub mod synthesis;
pub mod text;

pub use audio::{AudioFrame, AudioOutput, ClockOutput, ManualOutput, PcmBuffer, PcmFormat};
#[cfg(feature = "device")]
pub use audio::DeviceOutput;
pub use config::{ServerConfig, SpeechConfig};
pub use credentials::{Credential, CredentialPool};
pub use error::{Error, Result};
pub use orchestrator::{ChunkOrchestrator, SpeakOutcome};
pub use playback::{
    is_session_complete, schedule_chunk, PlaybackHandle, PlaybackSession, PlaybackTimeline,
    SessionState, SpeechRequest, SpeechTicket,
};
pub use synthesis::{
    GeminiBackend, RequestReport, RequestStatus, ResponseGenerator, SpeechClient,
    SynthesisBackend,
};
pub use text::{prepare_for_speech, segment, SpeechChunk, SpeechTextOptions};
