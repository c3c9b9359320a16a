//! Records emitted by the interview for each scored turn and at its end.

use crate::collaborator::{FinalEvaluation, Recommendation, RubricScores};
use crate::policy::{EndReason, ScoreLedger};
use crate::session::{QuestionCategory, Session, SessionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The outcome of scoring one answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub question_number: u32,
    pub category: QuestionCategory,
    pub score: u8,
    pub rationale: String,
    pub flags: Vec<String>,
}

/// One question and the transcript of its answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub q: String,
    pub a: String,
    pub category: QuestionCategory,
    pub score: u8,
}

/// Rubric scores plus the hiring recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEvaluation {
    #[serde(flatten)]
    pub rubric: RubricScores,
    pub recommendation: Recommendation,
}

/// The structured report delivered when an interview ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub end_reason: EndReason,
    pub role: String,
    pub level: String,
    #[serde(rename = "candidate")]
    pub candidate_name: Option<String>,
    /// Human-readable closing summary.
    pub summary: String,
    pub resume_summary: String,
    pub questions: Vec<ReportEntry>,
    /// Absent when the candidate declined before any question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<ReportEvaluation>,
    pub question_count: u32,
    pub average_score: f64,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

impl FinalReport {
    pub fn build(
        session: &Session,
        ledger: &ScoreLedger,
        end_reason: EndReason,
        evaluation: Option<FinalEvaluation>,
    ) -> Self {
        let questions = session
            .turns()
            .iter()
            .map(|turn| ReportEntry {
                q: turn.question.clone(),
                a: turn.transcript.clone(),
                category: turn.category,
                score: turn.score,
            })
            .collect();

        let (summary, resume_summary, evaluation) = match evaluation {
            Some(eval) => (
                eval.summary,
                eval.resume_summary,
                Some(ReportEvaluation {
                    rubric: eval.rubric.clamped(),
                    recommendation: eval.recommendation,
                }),
            ),
            None => (
                closing_line(session.status, end_reason),
                session
                    .context
                    .resume
                    .as_ref()
                    .map(|r| r.summary.clone())
                    .unwrap_or_default(),
                None,
            ),
        };

        Self {
            session_id: session.id,
            status: session.status,
            end_reason,
            role: session.context.role.clone(),
            level: session.context.level.clone(),
            candidate_name: session.context.candidate_name.clone(),
            summary,
            resume_summary,
            questions,
            evaluation,
            question_count: session.question_count(),
            average_score: ledger.average(),
            started_at: session.started_at,
            duration_secs: (Utc::now() - session.started_at).num_milliseconds().max(0) as f64
                / 1000.0,
        }
    }
}

/// Local stand-in for the final evaluation, derived from the recorded scores.
pub fn fallback_evaluation(session: &Session, ledger: &ScoreLedger) -> FinalEvaluation {
    let average = ledger.average();
    let summary = if ledger.count() == 0 {
        format!(
            "The {} interview for the {} level ended before any answer could be scored.",
            session.context.role, session.context.level
        )
    } else {
        format!(
            "The {} interview for the {} level covered {} questions with an average score of {:.1} out of 5.",
            session.context.role,
            session.context.level,
            session.question_count(),
            average
        )
    };
    FinalEvaluation {
        summary,
        resume_summary: session
            .context
            .resume
            .as_ref()
            .map(|r| r.summary.clone())
            .unwrap_or_default(),
        rubric: RubricScores::uniform(average.round() as u8),
        recommendation: Recommendation::from_average(average),
    }
}

fn closing_line(status: SessionStatus, reason: EndReason) -> String {
    match (status, reason) {
        (SessionStatus::Declined, _) => {
            "The candidate did not consent to the interview.".to_string()
        }
        (SessionStatus::Canceled, _) => {
            "The interview was interrupted before any answer was scored.".to_string()
        }
        _ => "The interview ended without a final evaluation.".to_string(),
    }
}
