//! Deterministic collaborators for offline runs and tests.
//!
//! These produce predictable output with no network access, so an interview
//! can be driven end to end without API keys or costs.

use crate::collaborator::{
    Consent, Evaluation, FinalEvaluation, InterviewEvaluator, LatestAnswer,
    MIN_TRANSCRIBABLE_BYTES, Opening, Recommendation, RubricScores, Transcriber,
    TranscriptionRequest,
};
use crate::error::CollaboratorError;
use crate::session::{Question, QuestionCategory, SessionContext, Turn};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

const QUESTION_BANK: [(&str, QuestionCategory); 6] = [
    (
        "Walk me through a system you designed recently and the trade-offs you made.",
        QuestionCategory::Technical,
    ),
    (
        "Tell me about a time you disagreed with a teammate and how you resolved it.",
        QuestionCategory::Behavioral,
    ),
    (
        "How would you find the cause of a latency regression in production?",
        QuestionCategory::Technical,
    ),
    (
        "What would you do differently if you built that project again?",
        QuestionCategory::Followup,
    ),
    (
        "Describe a deadline you missed and what you learned from it.",
        QuestionCategory::Behavioral,
    ),
    (
        "How do you decide what to test in a new codebase?",
        QuestionCategory::Technical,
    ),
];

/// Returns the same transcript for every non-silent clip.
pub struct FixedTranscriber {
    text: String,
}

impl FixedTranscriber {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Default for FixedTranscriber {
    fn default() -> Self {
        Self::new("I have been building backend services in Rust for several years, mostly around data pipelines and APIs.")
    }
}

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, request: &TranscriptionRequest) -> Result<String, CollaboratorError> {
        if request.audio.len() < MIN_TRANSCRIBABLE_BYTES {
            return Ok(String::new());
        }
        Ok(self.text.clone())
    }
}

fn default_opening() -> Opening {
    Opening {
        greeting: "Hi, thanks for joining. I'll ask you a few questions about your experience."
            .to_string(),
        question: Question::new("Tell me about yourself", QuestionCategory::Intro),
    }
}

fn default_final_evaluation() -> FinalEvaluation {
    FinalEvaluation {
        summary: "The candidate answered clearly and with relevant detail.".to_string(),
        resume_summary: String::new(),
        rubric: RubricScores::uniform(3),
        recommendation: Recommendation::Hold,
    }
}

/// Next question from the fixed bank, with the answer scored by length.
fn bank_evaluation(latest: &LatestAnswer) -> Evaluation {
    let (text, category) = QUESTION_BANK[latest.question_count as usize % QUESTION_BANK.len()];
    let category = if latest.force_new_topic && category.is_followup() {
        QuestionCategory::Technical
    } else {
        category
    };
    Evaluation {
        score: score_by_length(&latest.transcript),
        rationale: "Scored on answer length.".to_string(),
        flags: vec![],
        next_question: text.to_string(),
        next_category: Some(category),
        end_recommended: false,
    }
}

/// A stateless evaluator that walks the fixed question bank. Safe to share
/// across any number of sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct BankEvaluator;

#[async_trait]
impl InterviewEvaluator for BankEvaluator {
    async fn opening(&self, _context: &SessionContext) -> Result<Opening, CollaboratorError> {
        Ok(default_opening())
    }

    async fn interpret_consent(
        &self,
        _transcript: &str,
        _prompt: &str,
    ) -> Result<Consent, CollaboratorError> {
        Ok(Consent::Unclear)
    }

    async fn evaluate(
        &self,
        _history: &[Turn],
        latest: &LatestAnswer,
    ) -> Result<Evaluation, CollaboratorError> {
        Ok(bank_evaluation(latest))
    }

    async fn final_evaluate(
        &self,
        _context: &SessionContext,
        _history: &[Turn],
    ) -> Result<FinalEvaluation, CollaboratorError> {
        Ok(default_final_evaluation())
    }
}

/// An evaluator that replays a script of results, then falls back to a
/// fixed question bank scored by answer length. Records every answer it
/// sees, so it is meant for a single test rather than a long-lived server.
pub struct ScriptedEvaluator {
    opening: Opening,
    evaluations: Mutex<VecDeque<Result<Evaluation, String>>>,
    consent: Mutex<VecDeque<Consent>>,
    final_evaluation: Option<FinalEvaluation>,
    answers: Mutex<Vec<LatestAnswer>>,
    final_calls: AtomicUsize,
}

impl Default for ScriptedEvaluator {
    fn default() -> Self {
        Self {
            opening: default_opening(),
            evaluations: Mutex::new(VecDeque::new()),
            consent: Mutex::new(VecDeque::new()),
            final_evaluation: Some(default_final_evaluation()),
            answers: Mutex::new(Vec::new()),
            final_calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues results returned by successive `evaluate` calls. `Err` entries
    /// fail the call with the given message.
    pub fn with_evaluations(self, script: Vec<Result<Evaluation, String>>) -> Self {
        *lock(&self.evaluations) = script.into();
        self
    }

    /// Queues answers for successive consent prompts; `Unclear` once exhausted.
    pub fn with_consent(self, replies: Vec<Consent>) -> Self {
        *lock(&self.consent) = replies.into();
        self
    }

    pub fn with_final_evaluation(mut self, evaluation: Option<FinalEvaluation>) -> Self {
        self.final_evaluation = evaluation;
        self
    }

    /// Every answer passed to `evaluate`, in order.
    pub fn answers(&self) -> Vec<LatestAnswer> {
        lock(&self.answers).clone()
    }

    pub fn final_calls(&self) -> usize {
        self.final_calls.load(Ordering::SeqCst)
    }
}

/// Builds an evaluation with the given score and next question.
pub fn evaluation(score: i64, next: &str, category: QuestionCategory) -> Evaluation {
    Evaluation {
        score,
        rationale: format!("Scored {score}."),
        flags: vec![],
        next_question: next.to_string(),
        next_category: Some(category),
        end_recommended: false,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn score_by_length(transcript: &str) -> i64 {
    match transcript.split_whitespace().count() {
        0 => 1,
        1..=9 => 2,
        10..=29 => 3,
        30..=79 => 4,
        _ => 5,
    }
}

#[async_trait]
impl InterviewEvaluator for ScriptedEvaluator {
    async fn opening(&self, _context: &SessionContext) -> Result<Opening, CollaboratorError> {
        Ok(self.opening.clone())
    }

    async fn interpret_consent(
        &self,
        _transcript: &str,
        _prompt: &str,
    ) -> Result<Consent, CollaboratorError> {
        Ok(lock(&self.consent).pop_front().unwrap_or(Consent::Unclear))
    }

    async fn evaluate(
        &self,
        _history: &[Turn],
        latest: &LatestAnswer,
    ) -> Result<Evaluation, CollaboratorError> {
        lock(&self.answers).push(latest.clone());
        if let Some(scripted) = lock(&self.evaluations).pop_front() {
            return scripted.map_err(CollaboratorError::Evaluation);
        }
        Ok(bank_evaluation(latest))
    }

    async fn final_evaluate(
        &self,
        _context: &SessionContext,
        _history: &[Turn],
    ) -> Result<FinalEvaluation, CollaboratorError> {
        self.final_calls.fetch_add(1, Ordering::SeqCst);
        self.final_evaluation
            .clone()
            .ok_or_else(|| CollaboratorError::Evaluation("final evaluation unavailable".to_string()))
    }
}
