//! Full text responses with credential rotation

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::backend::SynthesisBackend;
use crate::config::SpeechConfig;
use crate::credentials::CredentialPool;
use crate::error::{Error, Result};

/// Asks the text model for complete answers.
///
/// Shares the credential pool with speech requests, so a key burned by
/// one is skipped by the other.
pub struct ResponseGenerator {
    backend: Arc<dyn SynthesisBackend>,
    pool: Arc<CredentialPool>,
    max_attempts: usize,
    request_timeout: Duration,
    apology: String,
}

impl ResponseGenerator {
    pub fn new(
        backend: Arc<dyn SynthesisBackend>,
        pool: Arc<CredentialPool>,
        config: &SpeechConfig,
    ) -> Self {
        Self {
            backend,
            pool,
            max_attempts: config.text_max_attempts.max(1),
            request_timeout: config.request_timeout(),
            apology: config.apology_message.clone(),
        }
    }

    /// Answer `prompt`, or return the apology message when nothing works.
    pub async fn generate(&self, prompt: &str) -> String {
        match self.try_generate(prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Text generation failed, answering with apology: {}", e);
                self.apology.clone()
            }
        }
    }

    /// Answer `prompt`, reporting why when every attempt failed.
    pub async fn try_generate(&self, prompt: &str) -> Result<String> {
        let mut last_error = Error::PoolExhausted;

        for attempt in 1..=self.max_attempts {
            let credential = self.pool.current()?;

            let result = tokio::time::timeout(
                self.request_timeout,
                self.backend.generate_text(prompt, &credential),
            )
            .await
            .unwrap_or_else(|_| {
                Err(Error::TransportFailure(
                    "timed out waiting for text response".to_string(),
                ))
            });

            match result {
                Ok(text) => {
                    info!(attempt, chars = text.chars().count(), "Text response received");
                    return Ok(text);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(attempt, "Text request failed, not retrying: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        credential = credential.index(),
                        "Text request failed: {}",
                        e
                    );
                    last_error = e;
                    if !self.pool.rotate_past(&credential) {
                        return Err(Error::PoolExhausted);
                    }
                }
            }
        }

        Err(last_error)
    }
}
