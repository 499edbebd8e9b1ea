//! The network boundary for synthesis and generation calls

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::audio::AudioFrame;
use crate::credentials::Credential;
use crate::error::Result;

/// Audio frames of one streaming synthesis call, in arrival order.
///
/// The stream ends when the server closes it; an `Err` item means the call
/// failed part way through.
pub type FrameStream = BoxStream<'static, Result<AudioFrame>>;

/// A remote service that can speak text and answer prompts
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Open a server-streaming synthesis call for one chunk of text
    async fn stream_speech(&self, text: &str, credential: &Credential) -> Result<FrameStream>;

    /// Produce a single full text answer
    async fn generate_text(&self, prompt: &str, credential: &Credential) -> Result<String>;
}
