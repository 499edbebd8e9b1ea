//! Streaming speech requests with retry and credential rotation

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::SynthesisBackend;
use crate::audio::AudioFrame;
use crate::config::SpeechConfig;
use crate::credentials::{Credential, CredentialPool};
use crate::error::{Error, Result};

/// How a speech request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// A stream ran to its end.
    Completed,
    /// No credential was left to try.
    PoolExhausted,
    /// The attempt ceiling was reached.
    RetriesExhausted,
    /// The caller cancelled while the request was in flight.
    Cancelled,
}

/// Outcome of one `request_speech` call.
///
/// Frames from failed attempts that were already delivered stay delivered,
/// so `frames` counts every frame across all attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestReport {
    pub status: RequestStatus,
    pub frames: usize,
    pub attempts: usize,
    pub rotations: usize,
}

enum AttemptEnd {
    Finished,
    Cancelled,
}

/// Issues streaming synthesis calls against the shared credential pool.
pub struct SpeechClient {
    backend: Arc<dyn SynthesisBackend>,
    pool: Arc<CredentialPool>,
    max_attempts: usize,
    request_timeout: Duration,
}

impl SpeechClient {
    pub fn new(
        backend: Arc<dyn SynthesisBackend>,
        pool: Arc<CredentialPool>,
        config: &SpeechConfig,
    ) -> Self {
        Self {
            backend,
            pool,
            max_attempts: config.speech_max_attempts.max(1),
            request_timeout: config.request_timeout(),
        }
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// Synthesize `text`, handing each frame to `on_frame` as it arrives.
    ///
    /// A failed attempt rotates past the credential it used and tries again
    /// with the next one. A credential that failed is never retried. Errors
    /// no other credential could fix end the request without rotating.
    pub async fn request_speech<F>(
        &self,
        text: &str,
        cancel: &CancellationToken,
        mut on_frame: F,
    ) -> RequestReport
    where
        F: FnMut(AudioFrame) + Send,
    {
        let mut report = RequestReport {
            status: RequestStatus::RetriesExhausted,
            frames: 0,
            attempts: 0,
            rotations: 0,
        };

        while report.attempts < self.max_attempts {
            if cancel.is_cancelled() {
                report.status = RequestStatus::Cancelled;
                return report;
            }

            let credential = match self.pool.current() {
                Ok(credential) => credential,
                Err(_) => {
                    warn!("No credentials left for speech request");
                    report.status = RequestStatus::PoolExhausted;
                    return report;
                }
            };

            report.attempts += 1;
            debug!(
                attempt = report.attempts,
                credential = credential.index(),
                chars = text.chars().count(),
                "Requesting speech"
            );

            match self
                .attempt(text, &credential, cancel, &mut on_frame, &mut report.frames)
                .await
            {
                Ok(AttemptEnd::Finished) => {
                    info!(
                        frames = report.frames,
                        attempts = report.attempts,
                        "Speech request completed"
                    );
                    report.status = RequestStatus::Completed;
                    return report;
                }
                Ok(AttemptEnd::Cancelled) => {
                    debug!("Speech request cancelled");
                    report.status = RequestStatus::Cancelled;
                    return report;
                }
                Err(e) if !e.is_retryable() => {
                    warn!(
                        attempt = report.attempts,
                        credential = credential.index(),
                        "Speech request failed, not retrying: {}",
                        e
                    );
                    return report;
                }
                Err(e) => {
                    warn!(
                        attempt = report.attempts,
                        credential = credential.index(),
                        "Speech request failed: {}",
                        e
                    );
                    report.rotations += 1;
                    if !self.pool.rotate_past(&credential) {
                        report.status = RequestStatus::PoolExhausted;
                        return report;
                    }
                }
            }
        }

        warn!(attempts = report.attempts, "Speech request gave up");
        report
    }

    async fn attempt<F>(
        &self,
        text: &str,
        credential: &Credential,
        cancel: &CancellationToken,
        on_frame: &mut F,
        frames: &mut usize,
    ) -> Result<AttemptEnd>
    where
        F: FnMut(AudioFrame) + Send,
    {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(AttemptEnd::Cancelled),
            opened = tokio::time::timeout(
                self.request_timeout,
                self.backend.stream_speech(text, credential),
            ) => opened,
        };
        let mut stream = opened.map_err(|_| {
            Error::TransportFailure("timed out opening speech stream".to_string())
        })??;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(AttemptEnd::Cancelled),
                next = tokio::time::timeout(self.request_timeout, stream.next()) => next,
            };

            match next.map_err(|_| {
                Error::TransportFailure("timed out waiting for audio".to_string())
            })? {
                Some(frame) => {
                    on_frame(frame?);
                    *frames += 1;
                }
                None => return Ok(AttemptEnd::Finished),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::synthesis::backend::FrameStream;
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::Mutex;

    /// What the scripted backend does for a given key
    #[derive(Clone)]
    pub(crate) enum Script {
        Fail,
        Frames(Vec<&'static str>),
        Audio(Vec<AudioFrame>),
        FramesThenFail(Vec<&'static str>),
        Hang,
        Text(&'static str),
        Rejected,
    }

    /// Backend whose behavior is fixed per credential token
    pub(crate) struct ScriptedBackend {
        scripts: Vec<(&'static str, Script)>,
        calls: Mutex<Vec<String>>,
        texts: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(scripts: Vec<(&'static str, Script)>) -> Self {
            Self {
                scripts,
                calls: Mutex::new(Vec::new()),
                texts: Mutex::new(Vec::new()),
            }
        }

        fn script_for(&self, credential: &Credential) -> Script {
            self.calls
                .lock()
                .unwrap()
                .push(credential.token().to_string());
            self.scripts
                .iter()
                .find(|(token, _)| *token == credential.token())
                .map(|(_, script)| script.clone())
                .unwrap_or(Script::Fail)
        }

        /// Tokens used, one entry per call
        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        /// Texts sent to `stream_speech`, one entry per call
        pub(crate) fn texts(&self) -> Vec<String> {
            self.texts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SynthesisBackend for ScriptedBackend {
        async fn stream_speech(&self, text: &str, credential: &Credential) -> Result<FrameStream> {
            self.texts.lock().unwrap().push(text.to_string());
            match self.script_for(credential) {
                Script::Fail | Script::Text(_) => {
                    Err(Error::TransportFailure("HTTP 429".to_string()))
                }
                Script::Frames(frames) => Ok(Box::pin(stream::iter(
                    frames.into_iter().map(|f| Ok(AudioFrame::from_base64(f))),
                ))),
                Script::Audio(frames) => Ok(Box::pin(stream::iter(frames.into_iter().map(Ok)))),
                Script::FramesThenFail(frames) => Ok(Box::pin(stream::iter(
                    frames
                        .into_iter()
                        .map(|f| Ok(AudioFrame::from_base64(f)))
                        .chain(std::iter::once(Err(Error::TransportFailure(
                            "stream reset".to_string(),
                        )))),
                ))),
                Script::Hang => Ok(Box::pin(stream::pending::<Result<AudioFrame>>())),
                Script::Rejected => Err(Error::Config("invalid speech endpoint".to_string())),
            }
        }

        async fn generate_text(&self, _prompt: &str, credential: &Credential) -> Result<String> {
            match self.script_for(credential) {
                Script::Text(text) => Ok(text.to_string()),
                Script::Rejected => Err(Error::Config("invalid text endpoint".to_string())),
                _ => Err(Error::TransportFailure("HTTP 503".to_string())),
            }
        }
    }

    fn client(backend: Arc<ScriptedBackend>, keys: &[&str]) -> SpeechClient {
        let pool = Arc::new(CredentialPool::new(keys.iter().copied()).unwrap());
        SpeechClient::new(backend, pool, &SpeechConfig::default())
    }

    #[tokio::test]
    async fn test_rotates_until_a_key_works() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ("k1", Script::Fail),
            ("k2", Script::Fail),
            ("k3", Script::Frames(vec!["AAAA", "BBBB"])),
        ]));
        let client = client(backend.clone(), &["k1", "k2", "k3"]);

        let mut received = Vec::new();
        let report = client
            .request_speech("Hello.", &CancellationToken::new(), |f| received.push(f))
            .await;

        assert_eq!(report.status, RequestStatus::Completed);
        assert_eq!(report.rotations, 2);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.frames, 2);
        assert_eq!(received.len(), 2);
        assert_eq!(backend.calls(), vec!["k1", "k2", "k3"]);
        assert_eq!(client.pool().position(), 2);

        // The next request starts on the key that worked.
        let report = client
            .request_speech("Again.", &CancellationToken::new(), |_| {})
            .await;
        assert_eq!(report.status, RequestStatus::Completed);
        assert_eq!(backend.calls(), vec!["k1", "k2", "k3", "k3"]);
    }

    #[tokio::test]
    async fn test_all_keys_failing_exhausts_pool() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ("k1", Script::Fail),
            ("k2", Script::Fail),
        ]));
        let client = client(backend.clone(), &["k1", "k2"]);

        let report = client
            .request_speech("Hello.", &CancellationToken::new(), |_| {})
            .await;

        assert_eq!(report.status, RequestStatus::PoolExhausted);
        assert_eq!(report.frames, 0);
        assert!(client.pool().is_exhausted());

        // An exhausted pool issues no further network calls.
        let report = client
            .request_speech("Again.", &CancellationToken::new(), |_| {})
            .await;
        assert_eq!(report.status, RequestStatus::PoolExhausted);
        assert_eq!(report.attempts, 0);
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_attempt_ceiling_is_respected() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let client = client(backend.clone(), &["k1", "k2", "k3", "k4", "k5"]);

        let report = client
            .request_speech("Hello.", &CancellationToken::new(), |_| {})
            .await;

        assert_eq!(report.status, RequestStatus::RetriesExhausted);
        assert_eq!(report.attempts, 3);
        assert_eq!(backend.calls(), vec!["k1", "k2", "k3"]);
        assert_eq!(client.pool().position(), 3);
    }

    #[tokio::test]
    async fn test_non_transport_error_keeps_credential() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ("k1", Script::Rejected),
            ("k2", Script::Frames(vec!["AAAA"])),
        ]));
        let client = client(backend.clone(), &["k1", "k2"]);

        let report = client
            .request_speech("Hello.", &CancellationToken::new(), |_| {})
            .await;

        assert_eq!(report.status, RequestStatus::RetriesExhausted);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.rotations, 0);
        assert_eq!(report.frames, 0);
        assert_eq!(backend.calls(), vec!["k1"]);
        assert_eq!(client.pool().position(), 0);
    }

    #[tokio::test]
    async fn test_partial_stream_keeps_delivered_frames() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ("k1", Script::FramesThenFail(vec!["AAAA"])),
            ("k2", Script::Frames(vec!["BBBB"])),
        ]));
        let client = client(backend, &["k1", "k2"]);

        let mut received = Vec::new();
        let report = client
            .request_speech("Hello.", &CancellationToken::new(), |f| received.push(f))
            .await;

        assert_eq!(report.status, RequestStatus::Completed);
        assert_eq!(report.frames, 2);
        assert_eq!(received[0].payload(), "AAAA");
        assert_eq!(received[1].payload(), "BBBB");
    }

    #[tokio::test]
    async fn test_cancellation_does_not_rotate() {
        let backend = Arc::new(ScriptedBackend::new(vec![("k1", Script::Hang)]));
        let client = client(backend, &["k1", "k2"]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            trigger.cancel();
        });

        let report = client.request_speech("Hello.", &cancel, |_| {}).await;
        assert_eq!(report.status, RequestStatus::Cancelled);
        assert_eq!(client.pool().position(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_times_out_and_rotates() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ("k1", Script::Hang),
            ("k2", Script::Frames(vec!["AAAA"])),
        ]));
        let client = client(backend, &["k1", "k2"]);

        let report = client
            .request_speech("Hello.", &CancellationToken::new(), |_| {})
            .await;

        assert_eq!(report.status, RequestStatus::Completed);
        assert_eq!(report.rotations, 1);
        assert_eq!(report.frames, 1);
    }
}
