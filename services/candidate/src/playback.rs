//! Speech playback to the system speakers via cpal.
//!
//! Incoming PCM frames are appended to a ring buffer that the output
//! callback drains. The buffer is only ever appended to (on a chunk) or
//! cleared (on a new question) from the session loop. Clearing is done by
//! position: the callback discards exactly the samples written before the
//! clear, never speech that arrives after it.

use crate::audio_utils::{BlockResampler, PcmDecoder};
use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info, warn};

/// Seconds of audio the playback buffer can hold.
const BUFFER_SECS: usize = 120;

/// Sample counters shared with the output callback.
#[derive(Default)]
struct Position {
    /// Samples consumed by the callback, played or discarded.
    consumed: AtomicU64,
    /// Everything before this sample index is discarded unplayed.
    discard_until: AtomicU64,
}

pub struct Playback {
    _stream: cpal::Stream,
    producer: HeapProd<f32>,
    /// Samples pushed so far.
    written: u64,
    position: Arc<Position>,
    decoder: PcmDecoder,
    resampler: Option<BlockResampler>,
}

impl Playback {
    /// Opens the default output device for speech arriving at `speech_rate`.
    pub fn start(speech_rate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .context("no default output device")?;
        let device_name = device.name().unwrap_or_else(|_| "<unknown>".into());

        let default_config = device
            .default_output_config()
            .context("no default output config")?;
        let device_rate = default_config.sample_rate().0;
        let channels = default_config.channels();
        info!(device = %device_name, device_rate, channels, speech_rate, "Using output device");

        let ring = HeapRb::<f32>::new(device_rate as usize * BUFFER_SECS);
        let (producer, consumer) = ring.split();
        let position = Arc::new(Position::default());

        let config = default_config.config();
        let shared = Arc::clone(&position);
        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, consumer, shared),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, consumer, shared),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, consumer, shared),
            other => Err(anyhow!("unsupported output sample format {other:?}")),
        }?;
        stream.play().context("failed to start output stream")?;

        let resampler = if speech_rate != device_rate {
            Some(BlockResampler::new(
                speech_rate,
                device_rate,
                (speech_rate as usize / 100).max(1),
            )?)
        } else {
            None
        };

        Ok(Self {
            _stream: stream,
            producer,
            written: 0,
            position,
            decoder: PcmDecoder::default(),
            resampler,
        })
    }

    /// Queues one frame of 16-bit little-endian speech.
    pub fn append(&mut self, frame: &[u8]) {
        let samples = self.decoder.decode(frame);
        let samples = match self.resampler.as_mut() {
            Some(resampler) => match resampler.process(&samples) {
                Ok(samples) => samples,
                Err(e) => {
                    warn!(error = %e, "Dropping speech that failed to resample");
                    return;
                }
            },
            None => samples,
        };
        let pushed = self.producer.push_slice(&samples);
        self.written += pushed as u64;
        if pushed < samples.len() {
            warn!(dropped = samples.len() - pushed, "Playback buffer full");
        }
    }

    /// Discards everything queued and not yet played.
    pub fn clear(&mut self) {
        self.decoder.reset();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
        self.position
            .discard_until
            .store(self.written, Ordering::Release);
    }

    /// True once every queued sample has been handed to the device.
    pub fn is_drained(&self) -> bool {
        self.position.consumed.load(Ordering::Acquire) >= self.written
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: HeapCons<f32>,
    position: Arc<Position>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
            let target = position.discard_until.load(Ordering::Acquire);
            let mut consumed = position.consumed.load(Ordering::Relaxed);
            if consumed < target {
                consumed += consumer.skip((target - consumed) as usize) as u64;
            }
            for frame in data.chunks_mut(channels) {
                let sample = match consumer.try_pop() {
                    Some(sample) => {
                        consumed += 1;
                        sample
                    }
                    None => 0.0,
                };
                frame.fill(T::from_sample_(sample));
            }
            position.consumed.store(consumed, Ordering::Release);
        },
        move |err| {
            error!("audio output stream error: {err}");
        },
        None,
    )?;
    Ok(stream)
}
