//! Audio frames as delivered by the network and their decoded PCM form

use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};

/// Configuration of the PCM carried inside frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    /// Sample rate (default: 24000 Hz)
    pub sample_rate: u32,
    /// Number of channels (default: 1 for mono)
    pub channels: u16,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            channels: 1,
        }
    }
}

impl PcmFormat {
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }
}

/// One network-delivered unit of encoded audio.
///
/// The payload is kept in its transport encoding (base64 of 16-bit signed
/// little-endian PCM) until the scheduler decodes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    payload: String,
}

impl AudioFrame {
    pub fn from_base64(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Wrap raw little-endian i16 bytes
    pub fn from_pcm_bytes(bytes: &[u8]) -> Self {
        Self::from_base64(general_purpose::STANDARD.encode(bytes))
    }

    /// Encode f32 samples in [-1.0, 1.0] as a frame
    pub fn from_samples(samples: &[f32]) -> Self {
        Self::from_pcm_bytes(&encode_pcm16(samples))
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn encoded_len(&self) -> usize {
        self.payload.len()
    }
}

/// Decoded mono audio ready to be placed on the timeline
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback length in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode a frame into normalized mono samples.
///
/// Fails on invalid base64, on an odd byte count and on empty payloads.
pub fn decode_frame(frame: &AudioFrame, format: PcmFormat) -> Result<PcmBuffer> {
    let bytes = general_purpose::STANDARD
        .decode(frame.payload().trim())
        .map_err(|e| Error::DecodeFailure(format!("invalid base64: {}", e)))?;

    if bytes.is_empty() {
        return Err(Error::DecodeFailure("empty audio payload".to_string()));
    }
    if bytes.len() % 2 != 0 {
        return Err(Error::DecodeFailure(format!(
            "odd PCM byte count: {}",
            bytes.len()
        )));
    }

    let interleaved = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0);

    let samples: Vec<f32> = if format.channels > 1 {
        let interleaved: Vec<f32> = interleaved.collect();
        let channels = format.channels as usize;
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    } else {
        interleaved.collect()
    };

    debug!(
        "Decoded frame: {} bytes -> {} samples",
        bytes.len(),
        samples.len()
    );

    Ok(PcmBuffer::new(samples, format.sample_rate))
}

/// Encode f32 samples as 16-bit little-endian PCM
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let sample_i16 = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        bytes.extend_from_slice(&sample_i16.to_le_bytes());
    }
    bytes
}
