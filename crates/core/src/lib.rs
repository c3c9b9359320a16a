//! Turn-taking engine for spoken interviews.
//!
//! The client half ([`vad`], [`turn_taking`]) turns a microphone stream into
//! discrete answer payloads; the server half ([`interview`], [`policy`])
//! sequences question, answer and score turns and decides when to stop.

pub mod audio;
pub mod collaborator;
pub mod error;
pub mod interview;
pub mod llm_client;
pub mod mock;
pub mod policy;
pub mod protocol;
pub mod report;
pub mod session;
pub mod turn_taking;
pub mod vad;

use crate::report::{FinalReport, TurnResult};
use crate::session::QuestionCategory;

/// Commands the interview state machine issues to its runtime.
///
/// The state machine never performs I/O itself; the runtime executes each
/// command in order and reports back (e.g. with `speech_delivered`).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Display `text` and speak `speech`. The runtime must call
    /// `Interview::speech_delivered` once the audio is fully streamed.
    Ask {
        text: String,
        speech: String,
        /// `None` for the consent prompt.
        category: Option<QuestionCategory>,
        question_number: u32,
    },
    /// Speech delivery is complete; the client may arm its capture.
    ReadyToListen,
    /// An answer was scored.
    TurnResult(TurnResult),
    /// The interview is over; deliver the report and close the channel.
    Conclude(Box<FinalReport>),
    /// A non-fatal problem the client should be told about.
    Error(String),
}
