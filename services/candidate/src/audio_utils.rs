use interview_core::audio::pcm16_le_to_f32;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::warn;

/// Creates a mono resampler converting between two sample rates.
pub fn create_resampler(
    in_sampling_rate: u32,
    out_sampling_rate: u32,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate as f64 / in_sampling_rate as f64,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Feeds arbitrarily sized input through a fixed-chunk resampler, holding
/// back any remainder until the next call.
pub struct BlockResampler {
    inner: FastFixedIn<f32>,
    chunk_size: usize,
    pending: Vec<f32>,
}

impl BlockResampler {
    pub fn new(in_rate: u32, out_rate: u32, chunk_size: usize) -> anyhow::Result<Self> {
        Ok(Self {
            inner: create_resampler(in_rate, out_rate, chunk_size)?,
            chunk_size,
            pending: Vec::with_capacity(chunk_size * 2),
        })
    }

    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>, rubato::ResampleError> {
        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        while self.pending.len() >= self.chunk_size {
            let chunk: Vec<f32> = self.pending.drain(..self.chunk_size).collect();
            let mut resampled = self.inner.process(&[chunk], None)?;
            if let Some(channel) = resampled.first_mut() {
                out.append(channel);
            }
        }
        Ok(out)
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.inner.reset();
    }
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
pub fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Turns raw device callbacks into fixed-size mono blocks at the engine's
/// sample rate.
pub struct CapturePipeline {
    channels: u16,
    resampler: Option<BlockResampler>,
    block_len: usize,
    pending: Vec<f32>,
}

impl CapturePipeline {
    pub fn new(
        channels: u16,
        native_rate: u32,
        target_rate: u32,
        block_len: usize,
    ) -> anyhow::Result<Self> {
        let resampler = if native_rate != target_rate {
            // 10 ms of native audio per resampler chunk.
            Some(BlockResampler::new(
                native_rate,
                target_rate,
                (native_rate as usize / 100).max(1),
            )?)
        } else {
            None
        };
        Ok(Self {
            channels,
            resampler,
            block_len,
            pending: Vec::with_capacity(block_len * 2),
        })
    }

    /// Returns every complete block the new samples finish.
    pub fn process(&mut self, interleaved: &[f32]) -> Vec<Vec<f32>> {
        let mono = to_mono(interleaved, self.channels);
        let samples = match self.resampler.as_mut() {
            Some(resampler) => match resampler.process(&mono) {
                Ok(samples) => samples,
                Err(e) => {
                    warn!(error = %e, "Dropping microphone audio that failed to resample");
                    return Vec::new();
                }
            },
            None => mono,
        };
        self.pending.extend_from_slice(&samples);

        let mut blocks = Vec::new();
        while self.pending.len() >= self.block_len {
            blocks.push(self.pending.drain(..self.block_len).collect());
        }
        blocks
    }
}

/// Decodes raw 16-bit little-endian speech frames whose boundaries may split
/// a sample.
#[derive(Debug, Default)]
pub struct PcmDecoder {
    carry: Option<u8>,
}

impl PcmDecoder {
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<f32> {
        let mut joined = Vec::with_capacity(bytes.len() + 1);
        joined.extend(self.carry.take());
        joined.extend_from_slice(bytes);
        if joined.len() % 2 == 1 {
            self.carry = joined.pop();
        }
        pcm16_le_to_f32(&joined)
    }

    pub fn reset(&mut self) {
        self.carry = None;
    }
}
