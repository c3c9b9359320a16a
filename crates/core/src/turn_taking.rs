//! Client-side turn-taking.
//!
//! [`TurnTaker`] tracks whose turn it is on the candidate's side of the
//! channel as one enumerated phase, and gates the VAD engine on it: the
//! microphone is analyzed only after the AI's speech has finished playing,
//! so the AI's own voice is never captured as an answer.
//!
//! ```text
//! Idle -> AiSpeaking -> AwaitingPlaybackComplete -> Listening -> Submitting
//!            ^                                                      |
//!            +------------------- question_text --------------------+
//! ```

use crate::audio::AnswerPayload;
use crate::error::AudioError;
use crate::vad::{CaptureState, CapturedTurn, VadConfig, VadEngine, VadEvent};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default wait after the last speech chunk before assuming the stream ended.
pub const DEFAULT_QUIESCENCE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    /// No question received yet.
    Idle,
    /// Speech for the current question is arriving.
    AiSpeaking,
    /// All speech has arrived; waiting for the playback buffer to drain.
    AwaitingPlaybackComplete,
    /// The VAD engine is armed and analyzing the microphone.
    Listening,
    /// An answer was sent; waiting for the next question or the end.
    Submitting,
    Closed,
}

impl ClientPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientPhase::Idle => "idle",
            ClientPhase::AiSpeaking => "ai_speaking",
            ClientPhase::AwaitingPlaybackComplete => "awaiting_playback_complete",
            ClientPhase::Listening => "listening",
            ClientPhase::Submitting => "submitting",
            ClientPhase::Closed => "closed",
        }
    }
}

pub struct TurnTaker {
    phase: ClientPhase,
    engine: VadEngine,
    quiescence: Duration,
    last_chunk_at: Option<Instant>,
}

impl TurnTaker {
    pub fn new(config: VadConfig, quiescence: Duration) -> Self {
        Self {
            phase: ClientPhase::Idle,
            engine: VadEngine::new(config),
            quiescence,
            last_chunk_at: None,
        }
    }

    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    pub fn capture_state(&self) -> CaptureState {
        self.engine.state()
    }

    pub fn engine(&self) -> &VadEngine {
        &self.engine
    }

    /// A new question arrived. Always discards any capture in progress; the
    /// caller must clear its playback buffer.
    pub fn on_question(&mut self, now: Instant) {
        if self.phase == ClientPhase::Closed {
            return;
        }
        if self.engine.buffered_duration() > Duration::ZERO {
            debug!(
                buffered_ms = self.engine.buffered_duration().as_millis() as u64,
                "dropping stale capture"
            );
        }
        self.engine.reset();
        self.last_chunk_at = Some(now);
        self.phase = ClientPhase::AiSpeaking;
    }

    /// A chunk of synthesized speech arrived. Returns whether it belongs to
    /// the current question and should be queued for playback.
    pub fn on_speech_chunk(&mut self, now: Instant) -> bool {
        if self.phase != ClientPhase::AiSpeaking {
            debug!(phase = self.phase.as_str(), "ignoring late speech chunk");
            return false;
        }
        self.last_chunk_at = Some(now);
        true
    }

    /// The server finished streaming speech for the current question.
    pub fn on_speech_done(&mut self) {
        if self.phase == ClientPhase::AiSpeaking {
            self.phase = ClientPhase::AwaitingPlaybackComplete;
        }
    }

    /// Ends a stalled speech stream once no chunk has arrived for the
    /// quiescence window. Returns true if it fired.
    pub fn check_quiescence(&mut self, now: Instant) -> bool {
        if self.phase != ClientPhase::AiSpeaking {
            return false;
        }
        let Some(last) = self.last_chunk_at else {
            return false;
        };
        if now.saturating_duration_since(last) < self.quiescence {
            return false;
        }
        warn!(
            quiet_ms = now.saturating_duration_since(last).as_millis() as u64,
            "speech stream went quiet; proceeding without completion signal"
        );
        self.phase = ClientPhase::AwaitingPlaybackComplete;
        true
    }

    /// Playback of the question finished. Arms the capture and returns true
    /// if the machine was waiting for it.
    pub fn on_playback_drained(&mut self) -> bool {
        if self.phase != ClientPhase::AwaitingPlaybackComplete {
            return false;
        }
        self.engine.arm();
        self.phase = ClientPhase::Listening;
        info!("listening for answer");
        true
    }

    /// Feeds one block of microphone samples. Returns the answer to submit
    /// when a turn finalizes.
    pub fn on_block(&mut self, block: &[f32]) -> Result<Option<AnswerPayload>, AudioError> {
        if self.phase != ClientPhase::Listening {
            return Ok(None);
        }
        match self.engine.process_block(block) {
            Some(VadEvent::SpeechStarted) => {
                debug!("speech detected");
                Ok(None)
            }
            Some(VadEvent::Discarded(reason)) => {
                debug!(?reason, "capture discarded; still listening");
                Ok(None)
            }
            Some(VadEvent::Finalized(turn)) => {
                info!(
                    duration_ms = turn.duration.as_millis() as u64,
                    trigger = ?turn.trigger,
                    "answer captured"
                );
                self.submit(turn).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Packages a finalized turn. A turn that cannot be encoded is dropped
    /// and capture starts over, so the candidate can answer again.
    fn submit(&mut self, turn: CapturedTurn) -> Result<AnswerPayload, AudioError> {
        match turn.into_payload() {
            Ok(payload) => {
                self.engine.reset();
                self.phase = ClientPhase::Submitting;
                Ok(payload)
            }
            Err(e) => {
                warn!(error = %e, "captured answer could not be encoded; listening again");
                self.engine.rearm();
                Err(e)
            }
        }
    }

    /// The channel closed; stops all capture.
    pub fn on_close(&mut self) {
        self.engine.reset();
        self.last_chunk_at = None;
        self.phase = ClientPhase::Closed;
    }
}
