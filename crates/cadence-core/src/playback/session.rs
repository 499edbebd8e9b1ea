//! Playback session state machine
//!
//! A session moves `Idle -> Loading -> Speaking -> Idle`. Each activation
//! gets a fresh generation number and cancellation token, bundled into a
//! [`SpeechTicket`]. Anything carrying an old ticket (late frames, completion
//! callbacks of stopped voices, a fallback timer) is ignored once the session
//! has moved on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::scheduler;
use super::timeline::{is_session_complete, PlaybackTimeline};
use crate::audio::{AudioOutput, PcmFormat, VoiceId};

/// Default wait past the timeline end before a session is forced idle
pub const DEFAULT_COMPLETION_GRACE: Duration = Duration::from_millis(1500);

/// High-level session state, as published to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Loading,
    Speaking,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Loading => write!(f, "loading"),
            SessionState::Speaking => write!(f, "speaking"),
        }
    }
}

/// Identity of one activation of a session
#[derive(Debug, Clone)]
pub struct SpeechTicket {
    generation: u64,
    cancel: CancellationToken,
}

impl SpeechTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// One decoded frame placed on the timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackHandle {
    id: u64,
    voice: VoiceId,
    start: f64,
    duration: f64,
}

impl PlaybackHandle {
    pub(crate) fn new(id: u64, voice: VoiceId, start: f64, duration: f64) -> Self {
        Self {
            id,
            voice,
            start,
            duration,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn voice(&self) -> VoiceId {
        self.voice
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Result of asking a session to start speaking
#[derive(Debug)]
pub enum SpeechRequest {
    /// A new activation began in `Loading`.
    Begin(SpeechTicket),
    /// The session was speaking; the request toggled it off.
    Stopped,
    /// The session is still loading; nothing changed.
    Ignored,
}

pub(crate) struct SessionInner {
    pub(crate) state: SessionState,
    pub(crate) timeline: PlaybackTimeline,
    pub(crate) handles: Vec<PlaybackHandle>,
    pub(crate) generation: u64,
    pub(crate) next_handle_id: u64,
    cancel: CancellationToken,
    feeding: bool,
}

impl SessionInner {
    pub(crate) fn is_current(&self, ticket: &SpeechTicket) -> bool {
        ticket.generation == self.generation && !ticket.cancel.is_cancelled()
    }
}

/// Playback state of one speaker: timeline, active handles and the
/// `idle`/`loading`/`speaking` machine.
pub struct PlaybackSession {
    output: Arc<dyn AudioOutput>,
    format: PcmFormat,
    completion_grace: Duration,
    inner: Mutex<SessionInner>,
    events: watch::Sender<SessionState>,
}

impl PlaybackSession {
    pub fn new(output: Arc<dyn AudioOutput>, format: PcmFormat) -> Self {
        let (events, _) = watch::channel(SessionState::Idle);
        let cancel = CancellationToken::new();
        cancel.cancel();

        Self {
            output,
            format,
            completion_grace: DEFAULT_COMPLETION_GRACE,
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                timeline: PlaybackTimeline::new(),
                handles: Vec::new(),
                generation: 0,
                next_handle_id: 0,
                cancel,
                feeding: false,
            }),
            events,
        }
    }

    pub fn with_completion_grace(mut self, grace: Duration) -> Self {
        self.completion_grace = grace;
        self
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.events.subscribe()
    }

    pub fn output(&self) -> &Arc<dyn AudioOutput> {
        &self.output
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Handles scheduled and not yet finished
    pub fn handles(&self) -> Vec<PlaybackHandle> {
        self.lock().handles.clone()
    }

    pub fn timeline(&self) -> PlaybackTimeline {
        self.lock().timeline
    }

    /// Start a new activation, or toggle/ignore depending on the current state.
    pub fn request_speech(&self) -> SpeechRequest {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Speaking => {
                info!("Speak requested while speaking, stopping");
                self.settle_idle(&mut inner);
                SpeechRequest::Stopped
            }
            SessionState::Loading => {
                debug!("Speak requested while loading, ignored");
                SpeechRequest::Ignored
            }
            SessionState::Idle => {
                inner.generation += 1;
                inner.cancel = CancellationToken::new();
                inner.feeding = true;
                self.set_state(&mut inner, SessionState::Loading);

                SpeechRequest::Begin(SpeechTicket {
                    generation: inner.generation,
                    cancel: inner.cancel.clone(),
                })
            }
        }
    }

    /// Stop playback now.
    ///
    /// Cancels further frame delivery, stops every active handle, resets the
    /// timeline and publishes `idle`, all before returning.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if inner.state != SessionState::Idle || !inner.handles.is_empty() {
            info!(handles = inner.handles.len(), "Stopping playback session");
        }
        self.settle_idle(&mut inner);
    }

    /// Record that the first frame of `ticket` has arrived.
    pub fn mark_speaking(&self, ticket: &SpeechTicket) -> bool {
        let mut inner = self.lock();
        if !inner.is_current(ticket) || inner.state != SessionState::Loading {
            return false;
        }
        self.set_state(&mut inner, SessionState::Speaking);
        true
    }

    /// Record that no more frames will be scheduled for `ticket`.
    ///
    /// From here on the session goes idle as soon as playback drains. If
    /// nothing is queued that happens immediately; otherwise a fallback timer
    /// guarantees it even if an output never reports completion.
    pub fn finish_feeding(self: &Arc<Self>, ticket: &SpeechTicket) {
        let mut inner = self.lock();
        if !inner.is_current(ticket) {
            return;
        }
        inner.feeding = false;

        let now = self.output.current_time();
        if is_session_complete(&inner.handles, &inner.timeline, now) {
            debug!("Nothing left to play, session complete");
            self.settle_idle(&mut inner);
            return;
        }

        let delay = Duration::from_secs_f64(inner.timeline.remaining(now)) + self.completion_grace;
        drop(inner);
        scheduler::arm_completion_fallback(self, ticket.generation, delay);
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Completion of one handle reported by the output.
    pub(crate) fn on_handle_ended(&self, generation: u64, handle_id: u64) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        inner.handles.retain(|h| h.id != handle_id);

        if inner.feeding || inner.state == SessionState::Idle {
            return;
        }
        let now = self.output.current_time();
        if is_session_complete(&inner.handles, &inner.timeline, now) {
            debug!("Playback drained, session complete");
            self.settle_idle(&mut inner);
        }
    }

    /// Force the session idle if `generation` is still playing.
    pub(crate) fn expire(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation || inner.feeding || inner.state == SessionState::Idle {
            return;
        }
        warn!(
            handles = inner.handles.len(),
            "Playback did not report completion in time, forcing idle"
        );
        self.settle_idle(&mut inner);
    }

    fn settle_idle(&self, inner: &mut SessionInner) {
        inner.cancel.cancel();
        for handle in inner.handles.drain(..) {
            self.output.stop(handle.voice);
        }
        inner.timeline.reset();
        inner.feeding = false;
        self.set_state(inner, SessionState::Idle);
    }

    fn set_state(&self, inner: &mut SessionInner, state: SessionState) {
        if inner.state == state {
            return;
        }
        debug!(from = %inner.state, to = %state, generation = inner.generation, "Session state");
        inner.state = state;
        self.events.send_replace(state);
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());
        inner.cancel.cancel();
        for handle in inner.handles.drain(..) {
            self.output.stop(handle.voice);
        }
    }
}

impl fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("PlaybackSession")
            .field("state", &inner.state)
            .field("generation", &inner.generation)
            .field("handles", &inner.handles.len())
            .finish()
    }
}
