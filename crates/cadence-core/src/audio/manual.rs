//! Manually advanced output clock
//!
//! Nothing is rendered; time only moves when [`ManualOutput::advance`] is
//! called. Voices whose end falls at or before the new time complete in end
//! order. Used for deterministic simulation of playback.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::frame::PcmBuffer;
use super::output::{AudioOutput, EndedCallback, VoiceId};
use crate::error::Result;

/// Record of one `schedule` call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSpan {
    pub voice: VoiceId,
    pub start: f64,
    pub duration: f64,
    /// Clock time when the buffer was handed to the output
    pub scheduled_at: f64,
}

impl ScheduledSpan {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

struct ManualVoice {
    end: f64,
    on_ended: EndedCallback,
}

#[derive(Default)]
struct ManualState {
    now: f64,
    next_id: u64,
    voices: BTreeMap<VoiceId, ManualVoice>,
    history: Vec<ScheduledSpan>,
    stopped: Vec<VoiceId>,
}

/// Output whose clock is driven by the caller
#[derive(Default)]
pub struct ManualOutput {
    state: Mutex<ManualState>,
}

impl ManualOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward and complete every voice that has ended.
    pub fn advance(&self, seconds: f64) {
        let target = self.lock().now + seconds.max(0.0);
        self.advance_to(target);
    }

    /// Move the clock to `time` (never backwards).
    pub fn advance_to(&self, time: f64) {
        let finished = {
            let mut state = self.lock();
            state.now = state.now.max(time);
            let now = state.now;

            let mut ended: Vec<VoiceId> = state
                .voices
                .iter()
                .filter(|(_, v)| v.end <= now)
                .map(|(id, _)| *id)
                .collect();
            ended.sort_by(|a, b| {
                let end_a = state.voices[a].end;
                let end_b = state.voices[b].end;
                end_a.total_cmp(&end_b).then(a.cmp(b))
            });

            ended
                .into_iter()
                .filter_map(|id| state.voices.remove(&id))
                .map(|v| v.on_ended)
                .collect::<Vec<_>>()
        };

        for on_ended in finished {
            on_ended();
        }
    }

    /// Every buffer ever scheduled, in scheduling order
    pub fn history(&self) -> Vec<ScheduledSpan> {
        self.lock().history.clone()
    }

    /// Voices stopped before they finished
    pub fn stopped(&self) -> Vec<VoiceId> {
        self.lock().stopped.clone()
    }

    /// Voices scheduled and not yet finished or stopped
    pub fn active_voices(&self) -> usize {
        self.lock().voices.len()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AudioOutput for ManualOutput {
    fn current_time(&self) -> f64 {
        self.lock().now
    }

    fn schedule(
        &self,
        buffer: PcmBuffer,
        start_at: f64,
        on_ended: EndedCallback,
    ) -> Result<VoiceId> {
        let mut state = self.lock();
        state.next_id += 1;
        let voice = VoiceId(state.next_id);
        let duration = buffer.duration();
        let scheduled_at = state.now;

        state.history.push(ScheduledSpan {
            voice,
            start: start_at,
            duration,
            scheduled_at,
        });
        state.voices.insert(
            voice,
            ManualVoice {
                end: start_at + duration,
                on_ended,
            },
        );
        Ok(voice)
    }

    fn stop(&self, voice: VoiceId) {
        let mut state = self.lock();
        if state.voices.remove(&voice).is_some() {
            state.stopped.push(voice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn buffer(seconds: f64) -> PcmBuffer {
        PcmBuffer::new(vec![0.0; (seconds * 24000.0) as usize], 24000)
    }

    #[test]
    fn test_voices_complete_when_clock_passes_end() {
        let output = ManualOutput::new();
        let ended = Arc::new(AtomicUsize::new(0));

        let counter = ended.clone();
        output
            .schedule(
                buffer(0.5),
                0.0,
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        output.advance(0.25);
        assert_eq!(ended.load(Ordering::SeqCst), 0);
        output.advance(0.25);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
        assert_eq!(output.active_voices(), 0);
    }

    #[test]
    fn test_stopped_voice_never_completes() {
        let output = ManualOutput::new();
        let ended = Arc::new(AtomicUsize::new(0));

        let counter = ended.clone();
        let voice = output
            .schedule(
                buffer(0.5),
                0.0,
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        output.stop(voice);
        output.advance(1.0);
        assert_eq!(ended.load(Ordering::SeqCst), 0);
        assert_eq!(output.stopped(), vec![voice]);
    }
}
