//! JSON control messages exchanged over the interview WebSocket.
//!
//! Text frames carry these messages; binary frames carry synthesized speech
//! from the server, concatenable in arrival order into one audio stream.

use crate::audio::AnswerPayload;
use crate::report::{FinalReport, TurnResult};
use crate::session::{QuestionCategory, ResumeContext, SessionStatus};
use serde::{Deserialize, Serialize};

/// Encoding of the synthesized speech frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeechFormat {
    #[default]
    #[serde(rename = "mp3_44100_128")]
    Mp3,
    /// Raw 16-bit little-endian mono PCM at 16 kHz.
    #[serde(rename = "pcm_16000")]
    Pcm16k,
    /// Raw 16-bit little-endian mono PCM at 24 kHz.
    #[serde(rename = "pcm_24000")]
    Pcm24k,
}

impl SpeechFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeechFormat::Mp3 => "mp3_44100_128",
            SpeechFormat::Pcm16k => "pcm_16000",
            SpeechFormat::Pcm24k => "pcm_24000",
        }
    }

    /// Sample rate of raw PCM formats.
    pub fn pcm_sample_rate(&self) -> Option<u32> {
        match self {
            SpeechFormat::Mp3 => None,
            SpeechFormat::Pcm16k => Some(16_000),
            SpeechFormat::Pcm24k => Some(24_000),
        }
    }
}

/// Messages sent from the client to the server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens the interview. Must be the first message.
    Start {
        role: String,
        level: String,
        #[serde(default)]
        candidate_name: Option<String>,
        #[serde(default)]
        resume: Option<ResumeContext>,
        /// The candidate already agreed to be interviewed.
        #[serde(default)]
        consent: bool,
        #[serde(default)]
        speech_format: SpeechFormat,
    },
    /// One finalized answer.
    Answer(AnswerPayload),
}

/// Messages sent from the server to the client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A question (or the consent prompt, with no category) is being asked.
    /// Its speech follows as binary frames.
    QuestionText {
        text: String,
        category: Option<QuestionCategory>,
        question_number: u32,
    },
    /// All speech for the current question has been sent.
    ReadyToListen,
    TurnResult(TurnResult),
    Summary { text: String },
    JsonReport { report: Box<FinalReport> },
    /// Last message before the server closes the channel.
    Done { status: SessionStatus },
    Error { message: String },
}
