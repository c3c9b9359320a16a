//! Microphone capture via cpal.
//!
//! Captures at the device's native rate and channel count and delivers
//! fixed-size mono blocks at the VAD engine's sample rate.

use crate::audio_utils::CapturePipeline;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use interview_core::error::CaptureError;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// What the capture callback reports to the session loop.
#[derive(Debug)]
pub enum MicEvent {
    Block(Vec<f32>),
    /// The stream failed and delivers no more blocks.
    Failed(CaptureError),
}

/// Keeps the input stream alive; capture stops when this is dropped.
pub struct MicCapture {
    _stream: cpal::Stream,
}

impl MicCapture {
    pub fn start(
        target_rate: u32,
        block_len: usize,
        tx: mpsc::Sender<MicEvent>,
    ) -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(CaptureError::NoInputDevice)?;
        let device_name = device.name().unwrap_or_else(|_| "<unknown>".into());

        let default_config = device
            .default_input_config()
            .map_err(config_error)?;
        let native_rate = default_config.sample_rate().0;
        let channels = default_config.channels();
        info!(
            device = %device_name,
            native_rate,
            channels,
            target_rate,
            "Using input device"
        );

        let pipeline = CapturePipeline::new(channels, native_rate, target_rate, block_len)
            .map_err(|e| CaptureError::Stream(e.to_string()))?;
        let config = default_config.config();
        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, pipeline, tx),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, pipeline, tx),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, pipeline, tx),
            other => Err(CaptureError::Stream(format!(
                "unsupported input sample format {other:?}"
            ))),
        }?;
        stream
            .play()
            .map_err(|e| CaptureError::Stream(format!("failed to start input stream: {e}")))?;

        Ok(Self { _stream: stream })
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut pipeline: CapturePipeline,
    tx: mpsc::Sender<MicEvent>,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let err_tx = tx.clone();
    device
        .build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|s| s.to_sample::<f32>()).collect();
                for block in pipeline.process(&samples) {
                    // Never block the audio thread.
                    if tx.try_send(MicEvent::Block(block)).is_err() {
                        debug!("microphone channel full, dropping block");
                    }
                }
            },
            move |err| {
                error!("audio input stream error: {err}");
                let _ = err_tx.try_send(MicEvent::Failed(stream_error(err)));
            },
            None,
        )
        .map_err(build_error)
}

fn mentions_permission(description: &str) -> bool {
    let lower = description.to_lowercase();
    lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
}

fn backend_error(err: cpal::BackendSpecificError) -> CaptureError {
    if mentions_permission(&err.description) {
        CaptureError::PermissionDenied(err.description)
    } else {
        CaptureError::Stream(err.description)
    }
}

fn config_error(err: cpal::DefaultStreamConfigError) -> CaptureError {
    match err {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => {
            CaptureError::DeviceLost("input device not available".to_string())
        }
        cpal::DefaultStreamConfigError::BackendSpecific { err } => backend_error(err),
        other => CaptureError::Stream(other.to_string()),
    }
}

fn build_error(err: cpal::BuildStreamError) -> CaptureError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            CaptureError::DeviceLost("input device not available".to_string())
        }
        cpal::BuildStreamError::BackendSpecific { err } => backend_error(err),
        other => CaptureError::Stream(other.to_string()),
    }
}

fn stream_error(err: cpal::StreamError) -> CaptureError {
    match err {
        cpal::StreamError::DeviceNotAvailable => {
            CaptureError::DeviceLost("input device disconnected".to_string())
        }
        cpal::StreamError::BackendSpecific { err } => backend_error(err),
    }
}
