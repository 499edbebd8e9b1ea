//! Gapless scheduling of decoded frames onto a session timeline

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use super::session::{PlaybackHandle, PlaybackSession, SpeechTicket};
use crate::audio::{decode_frame, AudioFrame};
use crate::error::{Error, Result};

/// Decode `frame` and queue it right after everything already scheduled.
///
/// Frames that fail to decode, or that belong to a stopped activation, are
/// logged and skipped; later frames are unaffected.
pub fn schedule_chunk(
    session: &Arc<PlaybackSession>,
    ticket: &SpeechTicket,
    frame: &AudioFrame,
) -> Option<PlaybackHandle> {
    match try_schedule_chunk(session, ticket, frame) {
        Ok(handle) => Some(handle),
        Err(Error::CancellationRace) => {
            trace!(generation = ticket.generation(), "Dropping frame for stopped session");
            None
        }
        Err(e) => {
            warn!("Skipping audio frame: {}", e);
            None
        }
    }
}

/// [`schedule_chunk`] with the reason a frame was not scheduled.
pub fn try_schedule_chunk(
    session: &Arc<PlaybackSession>,
    ticket: &SpeechTicket,
    frame: &AudioFrame,
) -> Result<PlaybackHandle> {
    if ticket.is_cancelled() {
        return Err(Error::CancellationRace);
    }

    // Decoding happens outside the session lock.
    let buffer = decode_frame(frame, session.format())?;
    let duration = buffer.duration();

    let mut inner = session.lock();
    if !inner.is_current(ticket) {
        return Err(Error::CancellationRace);
    }

    let output = session.output();
    let previous = inner.timeline;
    let start = inner.timeline.reserve(output.current_time(), duration);

    inner.next_handle_id += 1;
    let id = inner.next_handle_id;
    let generation = ticket.generation();
    let weak: Weak<PlaybackSession> = Arc::downgrade(session);

    let voice = match output.schedule(
        buffer,
        start,
        Box::new(move || {
            if let Some(session) = weak.upgrade() {
                session.on_handle_ended(generation, id);
            }
        }),
    ) {
        Ok(voice) => voice,
        Err(e) => {
            inner.timeline = previous;
            return Err(e);
        }
    };

    let handle = PlaybackHandle::new(id, voice, start, duration);
    inner.handles.push(handle);

    debug!(
        %voice,
        start,
        duration,
        queued = inner.handles.len(),
        "Scheduled audio frame"
    );
    Ok(handle)
}

/// Force the session idle after `delay` unless it got there on its own.
pub(crate) fn arm_completion_fallback(
    session: &Arc<PlaybackSession>,
    generation: u64,
    delay: Duration,
) {
    let runtime = match Handle::try_current() {
        Ok(runtime) => runtime,
        Err(_) => {
            debug!("No runtime for completion fallback, relying on output callbacks");
            return;
        }
    };

    let weak = Arc::downgrade(session);
    runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(session) = weak.upgrade() {
            session.expire(generation);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ManualOutput, PcmFormat};
    use crate::playback::{SessionState, SpeechRequest};

    /// Output that keeps time but never reports completion
    struct SilentOutput;

    impl crate::audio::AudioOutput for SilentOutput {
        fn current_time(&self) -> f64 {
            0.0
        }

        fn schedule(
            &self,
            _buffer: crate::audio::PcmBuffer,
            _start_at: f64,
            _on_ended: crate::audio::EndedCallback,
        ) -> Result<crate::audio::VoiceId> {
            Ok(crate::audio::VoiceId(1))
        }

        fn stop(&self, _voice: crate::audio::VoiceId) {}
    }

    fn begin(session: &PlaybackSession) -> SpeechTicket {
        match session.request_speech() {
            SpeechRequest::Begin(ticket) => ticket,
            other => panic!("expected a new activation, got {other:?}"),
        }
    }

    fn frame(seconds: f64) -> AudioFrame {
        AudioFrame::from_samples(&vec![0.2; (seconds * 24000.0) as usize])
    }

    #[test]
    fn test_frames_are_gapless() {
        let output = Arc::new(ManualOutput::new());
        let session = Arc::new(PlaybackSession::new(output.clone(), PcmFormat::default()));
        let ticket = begin(&session);

        schedule_chunk(&session, &ticket, &frame(0.5)).unwrap();
        output.advance(0.1);
        schedule_chunk(&session, &ticket, &frame(0.25)).unwrap();
        output.advance(0.1);
        schedule_chunk(&session, &ticket, &frame(0.5)).unwrap();

        let history = output.history();
        assert_eq!(history.len(), 3);
        for pair in history.windows(2) {
            assert!(pair[1].start >= pair[0].end() - 1e-9);
        }
        for span in &history {
            assert!(span.start >= span.scheduled_at);
        }
        assert!((history[2].start - 0.75).abs() < 1e-9);
        assert!((session.timeline().next_start_time() - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_late_frame_starts_at_clock() {
        let output = Arc::new(ManualOutput::new());
        let session = Arc::new(PlaybackSession::new(output.clone(), PcmFormat::default()));
        let ticket = begin(&session);

        schedule_chunk(&session, &ticket, &frame(0.25)).unwrap();
        output.advance(1.0);
        let handle = schedule_chunk(&session, &ticket, &frame(0.25)).unwrap();
        assert_eq!(handle.start(), 1.0);
    }

    #[test]
    fn test_malformed_frame_is_isolated() {
        let output = Arc::new(ManualOutput::new());
        let session = Arc::new(PlaybackSession::new(output.clone(), PcmFormat::default()));
        let ticket = begin(&session);

        assert!(matches!(
            try_schedule_chunk(&session, &ticket, &AudioFrame::from_base64("%%%")),
            Err(Error::DecodeFailure(_))
        ));
        assert!(schedule_chunk(&session, &ticket, &AudioFrame::from_pcm_bytes(&[0])).is_none());
        assert!(schedule_chunk(&session, &ticket, &frame(0.25)).is_some());
        assert_eq!(session.handles().len(), 1);
        assert_eq!(session.timeline().next_start_time(), 0.25);
    }

    #[test]
    fn test_stale_ticket_is_a_cancellation_race() {
        let output = Arc::new(ManualOutput::new());
        let session = Arc::new(PlaybackSession::new(output.clone(), PcmFormat::default()));
        let ticket = begin(&session);
        session.stop();

        assert!(matches!(
            try_schedule_chunk(&session, &ticket, &frame(0.25)),
            Err(Error::CancellationRace)
        ));
        assert!(output.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_forces_idle_when_output_never_completes() {
        let session = Arc::new(
            PlaybackSession::new(Arc::new(SilentOutput), PcmFormat::default())
                .with_completion_grace(Duration::from_millis(500)),
        );
        let ticket = begin(&session);
        session.mark_speaking(&ticket);
        schedule_chunk(&session, &ticket, &frame(1.0)).unwrap();
        session.finish_feeding(&ticket);
        assert_eq!(session.state(), SessionState::Speaking);

        tokio::time::sleep(Duration::from_millis(1400)).await;
        assert_eq!(session.state(), SessionState::Speaking);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.handles().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_ignores_newer_activation() {
        let session = Arc::new(
            PlaybackSession::new(Arc::new(SilentOutput), PcmFormat::default())
                .with_completion_grace(Duration::from_millis(100)),
        );
        let first = begin(&session);
        schedule_chunk(&session, &first, &frame(0.5)).unwrap();
        session.finish_feeding(&first);

        session.stop();
        let _second = begin(&session);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(session.state(), SessionState::Loading);
    }
}
