//! Wall-clock output without a device
//!
//! Keeps real-time semantics (clock advances with wall time, voices end when
//! their span has elapsed) but renders nothing. Useful on headless hosts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use super::frame::PcmBuffer;
use super::output::{AudioOutput, EndedCallback, VoiceId};
use crate::error::{Error, Result};

#[derive(Default)]
struct ClockState {
    next_id: u64,
    timers: HashMap<VoiceId, AbortHandle>,
}

/// Silent output driven by the tokio timer
pub struct ClockOutput {
    epoch: Instant,
    state: Arc<Mutex<ClockState>>,
}

impl ClockOutput {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            state: Arc::new(Mutex::new(ClockState::default())),
        }
    }

    fn lock(state: &Mutex<ClockState>) -> MutexGuard<'_, ClockState> {
        state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ClockOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for ClockOutput {
    fn current_time(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn schedule(
        &self,
        buffer: PcmBuffer,
        start_at: f64,
        on_ended: EndedCallback,
    ) -> Result<VoiceId> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Audio(format!("clock output needs a tokio runtime: {}", e)))?;

        let end = start_at + buffer.duration();
        let wait = Duration::from_secs_f64((end - self.current_time()).max(0.0));

        let mut state = Self::lock(&self.state);
        state.next_id += 1;
        let voice = VoiceId(state.next_id);

        let timers = Arc::clone(&self.state);
        let task = runtime.spawn(async move {
            tokio::time::sleep(wait).await;
            // Stopped voices were already removed from the map and aborted.
            let still_active = Self::lock(&timers).timers.remove(&voice).is_some();
            if still_active {
                on_ended();
            }
        });
        state.timers.insert(voice, task.abort_handle());

        debug!(%voice, start_at, end, "Scheduled silent voice");
        Ok(voice)
    }

    fn stop(&self, voice: VoiceId) {
        if let Some(timer) = Self::lock(&self.state).timers.remove(&voice) {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_voice_ends_after_its_duration() {
        let output = ClockOutput::new();
        let ended = Arc::new(AtomicBool::new(false));
        let flag = ended.clone();

        let start = output.current_time();
        output
            .schedule(
                PcmBuffer::new(vec![0.0; 2400], 24000),
                start,
                Box::new(move || flag.store(true, Ordering::SeqCst)),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!ended.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(ended.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_voice_does_not_end() {
        let output = ClockOutput::new();
        let ended = Arc::new(AtomicBool::new(false));
        let flag = ended.clone();

        let voice = output
            .schedule(
                PcmBuffer::new(vec![0.0; 2400], 24000),
                output.current_time(),
                Box::new(move || flag.store(true, Ordering::SeqCst)),
            )
            .unwrap();
        output.stop(voice);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!ended.load(Ordering::SeqCst));
    }
}
