//! Packaging of a finalized VAD turn into a transport-ready answer payload.
//!
//! The payload is a 16-bit PCM WAV file at the engine's declared sample rate
//! and channel count, base64-encoded so it can travel inside a JSON control
//! message.

use crate::error::AudioError;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;

/// MIME type declared for every answer the engine emits.
pub const ANSWER_FORMAT: &str = "audio/wav";

/// One finalized answer as it travels from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerPayload {
    /// Base64-encoded audio container.
    pub audio: String,
    /// MIME type of the decoded `audio` bytes.
    #[serde(default = "default_format")]
    pub format: String,
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    /// Estimated duration of the captured audio.
    #[serde(default)]
    pub duration_ms: u64,
}

fn default_format() -> String {
    ANSWER_FORMAT.to_string()
}

fn default_channels() -> u16 {
    1
}

impl AnswerPayload {
    /// Encodes mono or interleaved `samples` into a WAV payload.
    pub fn from_samples(samples: &[f32], sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        let wav = encode_wav(samples, sample_rate, channels)?;
        Ok(Self {
            audio: base64::engine::general_purpose::STANDARD.encode(&wav),
            format: ANSWER_FORMAT.to_string(),
            sample_rate,
            channels,
            duration_ms: samples_duration(samples.len(), sample_rate, channels).as_millis() as u64,
        })
    }

    /// Returns the raw container bytes.
    pub fn decode(&self) -> Result<Vec<u8>, AudioError> {
        Ok(base64::engine::general_purpose::STANDARD.decode(&self.audio)?)
    }
}

/// Writes `samples` as a 16-bit integer PCM WAV file held in memory.
pub fn encode_wav(samples: &[f32], sample_rate: u32, channels: u16) -> Result<Vec<u8>, AudioError> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for sample in convert_f32_to_i16(samples) {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Reads the duration declared by a WAV header, if `bytes` is a WAV file.
pub fn wav_duration(bytes: &[u8]) -> Option<Duration> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).ok()?;
    let spec = reader.spec();
    let frames = reader.duration();
    if spec.sample_rate == 0 {
        return None;
    }
    Some(Duration::from_secs_f64(frames as f64 / spec.sample_rate as f64))
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts little-endian PCM16 bytes to normalized f32 samples.
pub fn pcm16_le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32768.0)
        .collect()
}

/// Exact duration of `samples` interleaved samples, in whole nanoseconds.
pub(crate) fn samples_duration(samples: usize, sample_rate: u32, channels: u16) -> Duration {
    if sample_rate == 0 || channels == 0 {
        return Duration::ZERO;
    }
    let frames = (samples / channels as usize) as u128;
    Duration::from_nanos((frames * 1_000_000_000 / sample_rate as u128) as u64)
}
