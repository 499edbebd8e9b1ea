//! Drives one utterance: prepare, segment, request chunk by chunk, schedule

use std::sync::Arc;
use tracing::{info, warn};

use crate::audio::AudioFrame;
use crate::config::SpeechConfig;
use crate::playback::{schedule_chunk, PlaybackSession, SpeechRequest, SpeechTicket};
use crate::synthesis::{RequestStatus, SpeechClient};
use crate::text::{prepare_for_speech, segment, SpeechTextOptions};

/// How a call to [`ChunkOrchestrator::speak`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// Every chunk was requested; playback settles on its own.
    Finished,
    /// The session was speaking, so the call stopped it.
    Stopped,
    /// The session was still loading; nothing happened.
    Ignored,
    /// The session was stopped while this utterance was running.
    Cancelled,
}

/// Speaks text through a [`SpeechClient`] into a [`PlaybackSession`].
pub struct ChunkOrchestrator {
    client: SpeechClient,
    text_options: SpeechTextOptions,
    max_chunk_chars: usize,
}

impl ChunkOrchestrator {
    pub fn new(client: SpeechClient, config: &SpeechConfig) -> Self {
        Self {
            client,
            text_options: SpeechTextOptions {
                url_placeholder: config.url_placeholder.clone(),
                max_chars: config.max_text_chars,
            },
            max_chunk_chars: config.max_chunk_chars,
        }
    }

    pub fn client(&self) -> &SpeechClient {
        &self.client
    }

    /// Speak `text`, or toggle the session off if it is already speaking.
    ///
    /// Chunks are requested one at a time, in order. The first frame moves
    /// the session to `speaking`; the session goes back to `idle` once the
    /// last scheduled frame has played or [`PlaybackSession::stop`] is called.
    pub async fn speak(&self, text: &str, session: &Arc<PlaybackSession>) -> SpeakOutcome {
        match session.request_speech() {
            SpeechRequest::Begin(ticket) => self.feed(text, session, ticket).await,
            SpeechRequest::Stopped => SpeakOutcome::Stopped,
            SpeechRequest::Ignored => SpeakOutcome::Ignored,
        }
    }

    /// Run an activation already started with [`PlaybackSession::request_speech`].
    pub async fn feed(
        &self,
        text: &str,
        session: &Arc<PlaybackSession>,
        ticket: SpeechTicket,
    ) -> SpeakOutcome {
        let prepared = prepare_for_speech(text, &self.text_options);
        let chunks = segment(&prepared, self.max_chunk_chars);
        info!(
            generation = ticket.generation(),
            chars = prepared.chars().count(),
            chunks = chunks.len(),
            "Speaking"
        );

        for chunk in &chunks {
            if ticket.is_cancelled() {
                break;
            }

            let report = self
                .client
                .request_speech(chunk.text(), ticket.cancel_token(), |frame| {
                    deliver(session, &ticket, frame)
                })
                .await;

            match report.status {
                RequestStatus::Completed => {}
                RequestStatus::Cancelled => break,
                RequestStatus::PoolExhausted => {
                    warn!(
                        chunk = chunk.index,
                        remaining = chunks.len() - chunk.index - 1,
                        "Credential pool exhausted, ending utterance"
                    );
                    break;
                }
                RequestStatus::RetriesExhausted => {
                    warn!(chunk = chunk.index, "Giving up on chunk, moving on");
                }
            }
        }

        let cancelled = ticket.is_cancelled();
        session.finish_feeding(&ticket);

        if cancelled {
            info!(generation = ticket.generation(), "Utterance cancelled");
            SpeakOutcome::Cancelled
        } else {
            SpeakOutcome::Finished
        }
    }
}

fn deliver(session: &Arc<PlaybackSession>, ticket: &SpeechTicket, frame: AudioFrame) {
    if ticket.is_cancelled() {
        return;
    }
    session.mark_speaking(ticket);
    schedule_chunk(session, ticket, &frame);
}
