//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the collaborators
//! and tunables every interview session is built from.

use crate::ws::speech::SpeechSynthesizer;
use interview_core::{
    collaborator::{InterviewEvaluator, Transcriber},
    interview::InterviewConfig,
    vad::VadConfig,
};
use std::sync::Arc;
use std::time::Duration;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub transcriber: Arc<dyn Transcriber>,
    pub evaluator: Arc<dyn InterviewEvaluator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub interview_config: InterviewConfig,
    /// Published to clients so every client captures with the same parameters.
    pub vad_config: VadConfig,
    /// How long to wait for an answer once `ready_to_listen` went out.
    pub answer_timeout: Duration,
    /// Longest gap between speech chunks before a stream counts as stalled.
    pub speech_quiescence: Duration,
}
