//! Remote speech synthesis and text generation

mod backend;
mod client;
mod gemini;
mod generator;
mod sse;

pub use backend::{FrameStream, SynthesisBackend};
pub use client::{RequestReport, RequestStatus, SpeechClient};
pub use gemini::GeminiBackend;
pub use generator::ResponseGenerator;
pub use sse::SseDecoder;

#[cfg(test)]
pub(crate) use client::tests;
