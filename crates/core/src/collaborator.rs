//! The two external services the interview depends on: a transcriber and a
//! question/scoring evaluator.
//!
//! Both are consumed through traits so the state machine can be driven by
//! the OpenAI-backed implementations in [`crate::llm_client`] or by the
//! scripted doubles in [`crate::mock`].

use crate::error::CollaboratorError;
use crate::policy::SignalQuality;
use crate::session::{Question, QuestionCategory, SessionContext, Turn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Answer audio shorter than this many bytes is treated as a silent clip.
pub const MIN_TRANSCRIBABLE_BYTES: usize = 1000;

/// Audio handed to the transcriber for one answer.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionRequest {
    /// Raw container bytes (e.g. a WAV file).
    pub audio: Vec<u8>,
    /// MIME type of `audio`.
    pub format: String,
    /// The question being answered; improves recognition of domain terms.
    pub context_hint: Option<String>,
}

/// Converts answer audio to text.
///
/// Implementations return an empty string for short or silent clips rather
/// than failing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, request: &TranscriptionRequest) -> Result<String, CollaboratorError>;
}

/// The greeting and first question of an interview.
#[derive(Debug, Clone, PartialEq)]
pub struct Opening {
    pub greeting: String,
    pub question: Question,
}

/// The candidate's reply to the consent prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consent {
    Granted,
    Denied,
    Unclear,
}

impl Consent {
    /// Recognizes unambiguous short replies without asking a collaborator.
    pub fn from_keywords(transcript: &str) -> Option<Consent> {
        let normalized: String = transcript
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
            .collect();
        let words: Vec<&str> = normalized.split_whitespace().collect();
        let first = *words.first()?;

        const GRANTED_PHRASES: [&str; 6] = [
            "no problem",
            "let's start",
            "lets start",
            "go ahead",
            "i'm ready",
            "im ready",
        ];
        if GRANTED_PHRASES.iter().any(|p| normalized.contains(p)) {
            return Some(Consent::Granted);
        }
        if words.len() > 4 {
            return None;
        }
        match first {
            "yes" | "yeah" | "yep" | "sure" | "okay" | "ok" | "absolutely" | "ready" => {
                Some(Consent::Granted)
            }
            "no" | "nope" | "nah" => Some(Consent::Denied),
            _ => None,
        }
    }
}

/// Running score statistics forwarded to the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreStats {
    pub average: f64,
    pub high_count: u32,
    pub low_count: u32,
    pub low_score_streak: u32,
    pub signal: SignalQuality,
}

/// Which resume topics have come up so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopicCoverage {
    /// Labelled topics such as `"skills: Rust"`.
    pub covered: Vec<String>,
    pub uncovered: Vec<String>,
    pub dimensions: CoveredDimensions,
}

/// Whether at least one topic of each resume kind has been discussed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoveredDimensions {
    pub skills: bool,
    pub projects: bool,
    pub roles: bool,
    pub tools: bool,
}

impl TopicCoverage {
    pub fn new(covered: Vec<String>, uncovered: Vec<String>) -> Self {
        let any = |kind: &str| covered.iter().any(|t| t.starts_with(kind));
        let dimensions = CoveredDimensions {
            skills: any("skills: "),
            projects: any("projects: "),
            roles: any("roles: "),
            tools: any("tools: "),
        };
        Self {
            covered,
            uncovered,
            dimensions,
        }
    }
}

/// Everything the evaluator needs to judge the latest answer.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestAnswer {
    pub context: SessionContext,
    pub question: Question,
    pub transcript: String,
    /// Questions answered before this one.
    pub question_count: u32,
    pub followup_count: u32,
    /// The follow-up budget is spent; the next question must change topic.
    pub force_new_topic: bool,
    pub intro_asked: bool,
    pub behavioral_asked: bool,
    pub stats: ScoreStats,
    pub coverage: TopicCoverage,
    /// Time since the interview started.
    pub elapsed: Duration,
}

/// The evaluator's verdict on one answer, as returned (unsanitized).
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Expected within 1..=5; clamped by the state machine otherwise.
    pub score: i64,
    pub rationale: String,
    pub flags: Vec<String>,
    pub next_question: String,
    pub next_category: Option<QuestionCategory>,
    pub end_recommended: bool,
}

/// Per-dimension rubric scores, each within 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RubricScores {
    pub communication: u8,
    pub technical: u8,
    pub problem_solving: u8,
    pub culture_fit: u8,
}

impl RubricScores {
    pub fn clamped(self) -> Self {
        Self {
            communication: self.communication.clamp(1, 5),
            technical: self.technical.clamp(1, 5),
            problem_solving: self.problem_solving.clamp(1, 5),
            culture_fit: self.culture_fit.clamp(1, 5),
        }
    }

    /// The same score on every dimension.
    pub fn uniform(score: u8) -> Self {
        Self {
            communication: score,
            technical: score,
            problem_solving: score,
            culture_fit: score,
        }
        .clamped()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    MoveForward,
    Hold,
    Reject,
}

impl Recommendation {
    /// Recommendation implied by an average answer score.
    pub fn from_average(average: f64) -> Self {
        if average >= 3.5 {
            Recommendation::MoveForward
        } else if average >= 2.5 {
            Recommendation::Hold
        } else {
            Recommendation::Reject
        }
    }
}

/// The closing evaluation of a whole interview.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalEvaluation {
    /// Two to four sentences for humans.
    pub summary: String,
    pub resume_summary: String,
    pub rubric: RubricScores,
    pub recommendation: Recommendation,
}

/// Produces questions, scores answers and writes the final evaluation.
#[async_trait]
pub trait InterviewEvaluator: Send + Sync {
    /// Greeting plus the opening question.
    async fn opening(&self, context: &SessionContext) -> Result<Opening, CollaboratorError>;

    /// Interprets a reply to the consent prompt.
    async fn interpret_consent(
        &self,
        transcript: &str,
        prompt: &str,
    ) -> Result<Consent, CollaboratorError>;

    /// Scores the latest answer and proposes the next question.
    async fn evaluate(
        &self,
        history: &[Turn],
        latest: &LatestAnswer,
    ) -> Result<Evaluation, CollaboratorError>;

    /// Produces the rubric scores and recommendation over the full history.
    async fn final_evaluate(
        &self,
        context: &SessionContext,
        history: &[Turn],
    ) -> Result<FinalEvaluation, CollaboratorError>;
}
