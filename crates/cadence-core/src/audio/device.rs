//! Playback on the default output device via cpal.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms, so the stream is created,
//! played and dropped on a dedicated owner thread. The same thread runs
//! completion callbacks, which keeps them off the real-time audio callback.
//!
//! Voices are mixed at the speech sample rate, at their absolute start frame,
//! and the mixed signal is resampled to the device rate by one long-lived
//! resampler. Buffers scheduled back to back therefore stay back to back on
//! the device. The output clock counts mixed frames, so it runs ahead of the
//! speaker by the resampler's small backlog.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tracing::{error, info, warn};

use super::frame::PcmBuffer;
use super::output::{AudioOutput, EndedCallback, VoiceId};
use crate::error::{Error, Result};

/// Mixed frames per resampler call (20 ms at 24 kHz)
const RESAMPLE_CHUNK: usize = 480;

enum DeviceCommand {
    Ended(EndedCallback),
    Shutdown,
}

struct MixVoice {
    id: VoiceId,
    start_frame: u64,
    samples: Vec<f32>,
    on_ended: Option<EndedCallback>,
}

impl MixVoice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// State shared between the audio callback and the scheduling side
struct Mixer {
    voices: Mutex<Vec<MixVoice>>,
    /// Frames mixed so far, at `rate`
    rendered: AtomicU64,
    rate: u32,
    commands: Sender<DeviceCommand>,
}

impl Mixer {
    fn new(rate: u32, commands: Sender<DeviceCommand>) -> Self {
        Self {
            voices: Mutex::new(Vec::new()),
            rendered: AtomicU64::new(0),
            rate,
            commands,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MixVoice>> {
        self.voices.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_time(&self) -> f64 {
        self.rendered.load(Ordering::Acquire) as f64 / self.rate as f64
    }

    /// Queue `samples` to start at `start_at` seconds on the mix clock.
    fn place(&self, id: VoiceId, start_at: f64, samples: Vec<f32>, on_ended: EndedCallback) {
        let start_frame = (start_at.max(0.0) * self.rate as f64).round() as u64;
        self.lock().push(MixVoice {
            id,
            start_frame,
            samples,
            on_ended: Some(on_ended),
        });
    }

    /// Mix the next `frames` mono frames into `out` and advance the clock.
    fn render(&self, frames: usize, out: &mut Vec<f32>) {
        out.clear();
        out.resize(frames, 0.0);

        let base = self.rendered.load(Ordering::Acquire);
        let mut voices = self.lock();

        for voice in voices.iter() {
            let end = voice.end_frame();
            let from = voice.start_frame.max(base);
            let to = end.min(base + frames as u64);
            for pos in from..to {
                out[(pos - base) as usize] += voice.samples[(pos - voice.start_frame) as usize];
            }
        }
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        let now = base + frames as u64;
        self.rendered.store(now, Ordering::Release);

        let mut i = 0;
        while i < voices.len() {
            if voices[i].end_frame() <= now {
                let mut voice = voices.swap_remove(i);
                if let Some(on_ended) = voice.on_ended.take() {
                    // Owner thread gone means shutdown, nothing left to notify.
                    let _ = self.commands.send(DeviceCommand::Ended(on_ended));
                }
            } else {
                i += 1;
            }
        }
    }
}

/// Resamples the mixed timeline to the device rate as one continuous stream.
///
/// Mixed audio is pulled in fixed `chunk_size` blocks; device frames the
/// callback did not ask for yet wait in `pending` for the next call.
struct StreamConverter {
    /// `None` when the mix rate is the device rate
    resampler: Option<FastFixedIn<f32>>,
    chunk_size: usize,
    mixed: Vec<f32>,
    output_buf: Vec<Vec<f32>>,
    pending: VecDeque<f32>,
}

impl StreamConverter {
    fn new(mix_rate: u32, device_rate: u32, chunk_size: usize) -> Result<Self> {
        if mix_rate == device_rate {
            return Ok(Self {
                resampler: None,
                chunk_size,
                mixed: Vec::new(),
                output_buf: Vec::new(),
                pending: VecDeque::new(),
            });
        }

        let ratio = device_rate as f64 / mix_rate as f64;
        let resampler =
            FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
                .map_err(|e| Error::Audio(format!("resampler init: {e}")))?;
        let max_out = resampler.output_frames_max();

        info!(mix_rate, device_rate, chunk_size, "resampling mixed output");

        Ok(Self {
            resampler: Some(resampler),
            chunk_size,
            mixed: Vec::with_capacity(chunk_size),
            output_buf: vec![vec![0f32; max_out]; 1],
            pending: VecDeque::with_capacity(max_out * 2),
        })
    }

    /// Write exactly `frames` device frames into `out`.
    fn fill(&mut self, mixer: &Mixer, frames: usize, out: &mut Vec<f32>) {
        let Some(resampler) = self.resampler.as_mut() else {
            mixer.render(frames, out);
            return;
        };

        while self.pending.len() < frames {
            mixer.render(self.chunk_size, &mut self.mixed);
            match resampler.process_into_buffer(&[&self.mixed[..]], &mut self.output_buf, None) {
                Ok((_, produced)) if produced > 0 => {
                    self.pending.extend(&self.output_buf[0][..produced]);
                }
                Ok(_) => break,
                Err(e) => {
                    error!("resampler process error: {e}");
                    break;
                }
            }
        }

        out.clear();
        let ready = frames.min(self.pending.len());
        out.extend(self.pending.drain(..ready));
        out.resize(frames, 0.0);
    }
}

/// Output on the system's default playback device
pub struct DeviceOutput {
    mixer: Arc<Mixer>,
    mix_rate: u32,
    device_rate: u32,
    next_id: AtomicU64,
    commands: Sender<DeviceCommand>,
    owner: Option<JoinHandle<()>>,
}

impl DeviceOutput {
    /// Open the default output device and start rendering silence.
    ///
    /// `mix_rate` is the sample rate of every buffer that will be scheduled.
    pub fn open_default(mix_rate: u32) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<DeviceCommand>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(Arc<Mixer>, u32)>>(1);
        let mixer_commands = command_tx.clone();

        let owner = std::thread::Builder::new()
            .name("cadence-audio".to_string())
            .spawn(move || {
                let opened = open_stream(mix_rate, mixer_commands);
                let stream = match opened {
                    Ok((stream, mixer, rate)) => {
                        let _ = ready_tx.send(Ok((mixer, rate)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DeviceCommand::Ended(on_ended) => on_ended(),
                        DeviceCommand::Shutdown => break,
                    }
                }

                drop(stream);
                info!("Audio output closed");
            })
            .map_err(|e| Error::Audio(format!("failed to spawn audio thread: {}", e)))?;

        let (mixer, device_rate) = ready_rx
            .recv()
            .map_err(|_| Error::Audio("audio thread exited during startup".to_string()))??;

        Ok(Self {
            mixer,
            mix_rate,
            device_rate,
            next_id: AtomicU64::new(0),
            commands: command_tx,
            owner: Some(owner),
        })
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

impl AudioOutput for DeviceOutput {
    fn current_time(&self) -> f64 {
        self.mixer.current_time()
    }

    fn schedule(
        &self,
        buffer: PcmBuffer,
        start_at: f64,
        on_ended: EndedCallback,
    ) -> Result<VoiceId> {
        if buffer.sample_rate() != self.mix_rate {
            return Err(Error::Audio(format!(
                "buffer at {} Hz, output mixes at {} Hz",
                buffer.sample_rate(),
                self.mix_rate
            )));
        }
        let id = VoiceId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.mixer
            .place(id, start_at, buffer.samples().to_vec(), on_ended);
        Ok(id)
    }

    fn stop(&self, voice: VoiceId) {
        self.mixer.lock().retain(|v| v.id != voice);
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        let _ = self.commands.send(DeviceCommand::Shutdown);
        if let Some(owner) = self.owner.take() {
            if owner.join().is_err() {
                warn!("audio owner thread panicked");
            }
        }
    }
}

fn open_stream(
    mix_rate: u32,
    commands: Sender<DeviceCommand>,
) -> Result<(cpal::Stream, Arc<Mixer>, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no default output device".to_string()))?;

    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening output device"
    );

    let supported = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config: StreamConfig = supported.config();

    info!(sample_rate, channels, "output config selected");

    let mixer = Arc::new(Mixer::new(mix_rate, commands));
    let mut converter = StreamConverter::new(mix_rate, sample_rate, RESAMPLE_CHUNK)?;

    let stream = match supported.sample_format() {
        SampleFormat::F32 => {
            let mixer = Arc::clone(&mixer);
            let mut mono: Vec<f32> = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _info| {
                    converter.fill(&mixer, data.len() / channels, &mut mono);
                    for (frame, sample) in data.chunks_mut(channels).zip(mono.iter()) {
                        frame.fill(*sample);
                    }
                },
                |err| error!("audio output error: {err}"),
                None,
            )
        }
        SampleFormat::I16 => {
            let mixer = Arc::clone(&mixer);
            let mut mono: Vec<f32> = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _info| {
                    converter.fill(&mixer, data.len() / channels, &mut mono);
                    for (frame, sample) in data.chunks_mut(channels).zip(mono.iter()) {
                        frame.fill((*sample * 32767.0) as i16);
                    }
                },
                |err| error!("audio output error: {err}"),
                None,
            )
        }
        fmt => {
            return Err(Error::Audio(format!(
                "unsupported output sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    Ok((stream, mixer, sample_rate))
}
