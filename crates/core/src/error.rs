//! Error taxonomy for capture, collaborators, transport and the dialogue machine.
//!
//! VAD-level rejections (too short, no voice) are not errors at all; they are
//! handled locally by the engine and never reach these types.

use thiserror::Error;

/// Failures of the microphone capture path. Fatal to the session's capture
/// capability: reported upward and never retried automatically.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("no input device available")]
    NoInputDevice,
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("audio device lost: {0}")]
    DeviceLost(String),
    #[error("audio stream error: {0}")]
    Stream(String),
}

/// Failures of a transcription or scoring call.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("transcription failed: {0}")]
    Transcription(String),
    #[error("evaluation failed: {0}")]
    Evaluation(String),
    #[error("collaborator timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("invalid collaborator response: {0}")]
    InvalidResponse(String),
}

impl From<async_openai::error::OpenAIError> for CollaboratorError {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        CollaboratorError::Evaluation(err.to_string())
    }
}

impl From<serde_json::Error> for CollaboratorError {
    fn from(err: serde_json::Error) -> Self {
        CollaboratorError::InvalidResponse(err.to_string())
    }
}

/// Failures of the bidirectional channel between client and server.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel closed")]
    Closed,
    #[error("failed to send message: {0}")]
    Send(String),
    #[error("failed to decode message: {0}")]
    Decode(String),
}

/// Errors surfaced by the interview state machine.
#[derive(Debug, Error)]
pub enum InterviewError {
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error("audio encoding failed: {0}")]
    Encoding(String),
}

/// Errors produced while packaging a finalized turn for transport.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("wav encoding failed: {0}")]
    Wav(#[from] hound::Error),
    #[error("base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl From<AudioError> for InterviewError {
    fn from(err: AudioError) -> Self {
        InterviewError::Encoding(err.to_string())
    }
}
