//! Adaptive voice activity detection.
//!
//! The engine consumes fixed-rate blocks of microphone samples and turns them
//! into at most one finalized answer per conversational turn. Time is derived
//! from sample counts rather than the wall clock, so a given sequence of
//! blocks always produces the same events.
//!
//! A block is *voiced* when the fraction of its samples above the detection
//! threshold exceeds `sustained_fraction`; single loud peaks (clicks, taps) do
//! not count. The silence required to finalize is learned per turn from the
//! candidate's own pauses:
//!
//! ```text
//! threshold = clamp(max(silence_floor, longest_recent_pause * buffer_factor),
//!                   min_silence, max_silence)
//! ```

use crate::audio::{AnswerPayload, samples_duration};
use crate::error::AudioError;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Tunable parameters of the engine. `Default` holds the canonical values.
#[derive(Debug, Clone, PartialEq)]
pub struct VadConfig {
    /// Sample rate of the blocks fed to the engine and of the emitted WAV.
    pub sample_rate: u32,
    pub channels: u16,
    /// Absolute amplitude a sample must exceed to count as loud.
    pub detection_threshold: f32,
    /// Fraction of loud samples above which a block is voiced.
    pub sustained_fraction: f32,
    /// Blocks arriving this soon after arming are dropped (speaker tail).
    pub arm_delay: Duration,
    /// Audio kept from before the first voiced block so onsets are not clipped.
    pub pre_roll: Duration,
    /// Gaps shorter than this are not learned as pauses.
    pub min_pause: Duration,
    /// Number of recent pauses considered when adapting the threshold.
    pub pause_history: usize,
    /// Multiplier applied to the longest recent pause.
    pub buffer_factor: f32,
    /// Baseline silence-to-finalize threshold.
    pub silence_floor: Duration,
    /// Hard lower bound of the adaptive threshold.
    pub min_silence: Duration,
    /// Hard upper bound of the adaptive threshold.
    pub max_silence: Duration,
    /// Voiced time required before a turn may finalize.
    pub voiced_floor: Duration,
    /// Finalized buffers shorter than this are discarded.
    pub min_answer: Duration,
    /// Safety ceiling on a single turn's length.
    pub max_turn: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            detection_threshold: 0.02,
            sustained_fraction: 0.15,
            arm_delay: Duration::from_millis(300),
            pre_roll: Duration::from_millis(500),
            min_pause: Duration::from_millis(250),
            pause_history: 5,
            buffer_factor: 1.5,
            silence_floor: Duration::from_millis(1_800),
            min_silence: Duration::from_millis(1_300),
            max_silence: Duration::from_millis(4_000),
            voiced_floor: Duration::from_millis(400),
            min_answer: Duration::from_millis(1_000),
            max_turn: Duration::from_secs(300),
        }
    }
}

/// Where the engine is in the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Not capturing; blocks are ignored.
    Idle,
    /// Mic open, waiting out `arm_delay` before analyzing.
    Armed,
    /// Analyzing, no voice yet.
    Listening,
    /// Voice detected, accumulating.
    Recording,
    /// A turn was handed out; blocks are ignored until `rearm`.
    Finalizing,
}

impl CaptureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Armed => "armed",
            CaptureState::Listening => "listening",
            CaptureState::Recording => "recording",
            CaptureState::Finalizing => "finalizing",
        }
    }
}

/// Why a turn closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeTrigger {
    /// Trailing silence crossed the adaptive threshold.
    Silence,
    /// The turn reached `max_turn`.
    SafetyCeiling,
}

/// Why a buffer was dropped without emitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Sound never reached the voiced floor before the silence threshold.
    NoVoice,
    /// The buffer was shorter than `min_answer`.
    TooShort(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub enum VadEvent {
    SpeechStarted,
    Finalized(CapturedTurn),
    Discarded(DiscardReason),
}

/// The audio of one finalized turn, ready to be packaged.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedTurn {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration: Duration,
    pub voiced: Duration,
    pub trigger: FinalizeTrigger,
    pub silence_threshold: Duration,
}

impl CapturedTurn {
    /// Encodes the turn as a WAV answer payload.
    pub fn into_payload(self) -> Result<AnswerPayload, AudioError> {
        AnswerPayload::from_samples(&self.samples, self.sample_rate, self.channels)
    }
}

/// The adaptive VAD state machine for one capture stream.
pub struct VadEngine {
    config: VadConfig,
    state: CaptureState,
    frames: VecDeque<Vec<f32>>,
    buffered_samples: usize,
    /// Time since the engine was last armed.
    clock: Duration,
    turn_start: Duration,
    last_voice_end: Duration,
    voiced: Duration,
    pauses: VecDeque<Duration>,
    silence_threshold: Duration,
}

impl VadEngine {
    pub fn new(config: VadConfig) -> Self {
        let silence_threshold = config.silence_floor.max(config.min_silence);
        Self {
            config,
            state: CaptureState::Idle,
            frames: VecDeque::new(),
            buffered_samples: 0,
            clock: Duration::ZERO,
            turn_start: Duration::ZERO,
            last_voice_end: Duration::ZERO,
            voiced: Duration::ZERO,
            pauses: VecDeque::new(),
            silence_threshold,
        }
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// The silence currently required to finalize.
    pub fn silence_threshold(&self) -> Duration {
        self.silence_threshold
    }

    pub fn recent_pauses(&self) -> impl Iterator<Item = &Duration> {
        self.pauses.iter()
    }

    /// Duration of audio currently held for the turn.
    pub fn buffered_duration(&self) -> Duration {
        samples_duration(self.buffered_samples, self.config.sample_rate, self.config.channels)
    }

    /// Opens a capture window. No-op unless idle.
    pub fn arm(&mut self) {
        if self.state == CaptureState::Idle {
            self.rearm();
        }
    }

    /// Clears any turn in progress and opens a fresh capture window.
    pub fn rearm(&mut self) {
        self.clear_turn();
        self.state = CaptureState::Armed;
    }

    /// Discards everything and stops capturing.
    pub fn reset(&mut self) {
        self.clear_turn();
        self.state = CaptureState::Idle;
    }

    /// Feeds one block of samples.
    pub fn process_block(&mut self, block: &[f32]) -> Option<VadEvent> {
        if block.is_empty() {
            return None;
        }
        let start = self.clock;
        self.clock += samples_duration(block.len(), self.config.sample_rate, self.config.channels);

        match self.state {
            CaptureState::Idle | CaptureState::Finalizing => None,
            CaptureState::Armed => {
                if start < self.config.arm_delay {
                    return None;
                }
                self.state = CaptureState::Listening;
                self.listen(block, start)
            }
            CaptureState::Listening => self.listen(block, start),
            CaptureState::Recording => self.record(block, start),
        }
    }

    fn listen(&mut self, block: &[f32], start: Duration) -> Option<VadEvent> {
        let voiced = self.is_voiced(block);
        self.push_frame(block);
        if !voiced {
            self.trim_pre_roll();
            return None;
        }
        self.state = CaptureState::Recording;
        self.turn_start = start;
        self.last_voice_end = self.clock;
        self.voiced = self.clock - start;
        self.pauses.clear();
        self.silence_threshold = self.adaptive_threshold();
        debug!(at_ms = start.as_millis() as u64, "speech started");
        Some(VadEvent::SpeechStarted)
    }

    fn record(&mut self, block: &[f32], start: Duration) -> Option<VadEvent> {
        self.push_frame(block);
        if self.is_voiced(block) {
            let gap = start.saturating_sub(self.last_voice_end);
            if gap >= self.config.min_pause {
                self.learn_pause(gap);
            }
            self.last_voice_end = self.clock;
            self.voiced += self.clock - start;
        }

        let silence = self.clock - self.last_voice_end;
        let elapsed = self.clock - self.turn_start;
        let genuine = self.voiced >= self.config.voiced_floor;

        if genuine && elapsed >= self.config.voiced_floor && silence >= self.silence_threshold {
            return Some(self.finalize(FinalizeTrigger::Silence));
        }
        if genuine && elapsed >= self.config.max_turn {
            return Some(self.finalize(FinalizeTrigger::SafetyCeiling));
        }
        if !genuine && silence >= self.silence_threshold {
            debug!(voiced_ms = self.voiced.as_millis() as u64, "discarding turn without voice");
            self.rearm();
            return Some(VadEvent::Discarded(DiscardReason::NoVoice));
        }
        None
    }

    fn finalize(&mut self, trigger: FinalizeTrigger) -> VadEvent {
        self.state = CaptureState::Finalizing;
        let duration = self.buffered_duration();
        if duration < self.config.min_answer {
            debug!(duration_ms = duration.as_millis() as u64, "discarding short turn");
            self.rearm();
            return VadEvent::Discarded(DiscardReason::TooShort(duration));
        }

        let mut samples = Vec::with_capacity(self.buffered_samples);
        for frame in self.frames.drain(..) {
            samples.extend_from_slice(&frame);
        }
        self.buffered_samples = 0;

        debug!(
            duration_ms = duration.as_millis() as u64,
            voiced_ms = self.voiced.as_millis() as u64,
            threshold_ms = self.silence_threshold.as_millis() as u64,
            ?trigger,
            "turn finalized"
        );
        VadEvent::Finalized(CapturedTurn {
            samples,
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            duration,
            voiced: self.voiced,
            trigger,
            silence_threshold: self.silence_threshold,
        })
    }

    fn is_voiced(&self, block: &[f32]) -> bool {
        let loud = block
            .iter()
            .filter(|s| s.abs() > self.config.detection_threshold)
            .count();
        loud as f32 / block.len() as f32 > self.config.sustained_fraction
    }

    fn learn_pause(&mut self, gap: Duration) {
        if self.config.pause_history == 0 {
            return;
        }
        while self.pauses.len() >= self.config.pause_history {
            self.pauses.pop_front();
        }
        self.pauses.push_back(gap);
        self.silence_threshold = self.adaptive_threshold();
        debug!(
            pause_ms = gap.as_millis() as u64,
            threshold_ms = self.silence_threshold.as_millis() as u64,
            "pause learned"
        );
    }

    fn adaptive_threshold(&self) -> Duration {
        let learned = self
            .pauses
            .iter()
            .max()
            .map(|longest| longest.mul_f64(self.config.buffer_factor as f64))
            .unwrap_or(Duration::ZERO);
        let upper = self.config.max_silence.max(self.config.min_silence);
        learned
            .max(self.config.silence_floor)
            .max(self.config.min_silence)
            .min(upper)
    }

    fn push_frame(&mut self, block: &[f32]) {
        self.buffered_samples += block.len();
        self.frames.push_back(block.to_vec());
    }

    fn trim_pre_roll(&mut self) {
        let keep = self.config.pre_roll;
        while let Some(front) = self.frames.front() {
            let without_front = self.buffered_samples - front.len();
            if samples_duration(without_front, self.config.sample_rate, self.config.channels) < keep {
                break;
            }
            self.buffered_samples = without_front;
            self.frames.pop_front();
        }
    }

    fn clear_turn(&mut self) {
        self.frames.clear();
        self.buffered_samples = 0;
        self.clock = Duration::ZERO;
        self.turn_start = Duration::ZERO;
        self.last_voice_end = Duration::ZERO;
        self.voiced = Duration::ZERO;
        self.pauses.clear();
        self.silence_threshold = self.adaptive_threshold();
    }
}
