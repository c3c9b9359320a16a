//! REST Models
//!
//! Response bodies of the REST surface, documented with `utoipa`.

use interview_core::vad::VadConfig;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// The canonical voice-activity-detection parameters. Durations are in
/// milliseconds.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct VadConfigResponse {
    #[schema(example = 16000)]
    pub sample_rate: u32,
    pub channels: u16,
    #[schema(example = 0.02)]
    pub detection_threshold: f32,
    #[schema(example = 0.15)]
    pub sustained_fraction: f32,
    pub arm_delay_ms: u64,
    pub pre_roll_ms: u64,
    pub min_pause_ms: u64,
    pub pause_history: usize,
    #[schema(example = 1.5)]
    pub buffer_factor: f32,
    #[schema(example = 1800)]
    pub silence_floor_ms: u64,
    pub min_silence_ms: u64,
    pub max_silence_ms: u64,
    pub voiced_floor_ms: u64,
    pub min_answer_ms: u64,
    pub max_turn_ms: u64,
}

impl From<&VadConfig> for VadConfigResponse {
    fn from(config: &VadConfig) -> Self {
        let ms = |d: std::time::Duration| d.as_millis() as u64;
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            detection_threshold: config.detection_threshold,
            sustained_fraction: config.sustained_fraction,
            arm_delay_ms: ms(config.arm_delay),
            pre_roll_ms: ms(config.pre_roll),
            min_pause_ms: ms(config.min_pause),
            pause_history: config.pause_history,
            buffer_factor: config.buffer_factor,
            silence_floor_ms: ms(config.silence_floor),
            min_silence_ms: ms(config.min_silence),
            max_silence_ms: ms(config.max_silence),
            voiced_floor_ms: ms(config.voiced_floor),
            min_answer_ms: ms(config.min_answer),
            max_turn_ms: ms(config.max_turn),
        }
    }
}
