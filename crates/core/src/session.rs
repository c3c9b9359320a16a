//! Interview session data model.
//!
//! A [`Session`] lives exactly as long as its connection. It is mutated only
//! by the interview state machine, and its turn list is append-only.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Kind of question asked in a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuestionCategory {
    Intro,
    Technical,
    Behavioral,
    Followup,
    /// Re-ask after a non-informative or inconsistent answer.
    Clarification,
}

impl QuestionCategory {
    /// Lenient parse of the category labels collaborators produce.
    pub fn parse_lenient(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "intro" | "introduction" => Some(Self::Intro),
            "technical" => Some(Self::Technical),
            "behavioral" | "behavioural" => Some(Self::Behavioral),
            "followup" | "follow-up" | "follow_up" => Some(Self::Followup),
            "clarification" => Some(Self::Clarification),
            _ => None,
        }
    }

    /// Whether this question digs further into the current topic.
    pub fn is_followup(&self) -> bool {
        matches!(self, Self::Followup | Self::Clarification)
    }
}

impl fmt::Display for QuestionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QuestionCategory::Intro => "intro",
            QuestionCategory::Technical => "technical",
            QuestionCategory::Behavioral => "behavioral",
            QuestionCategory::Followup => "followup",
            QuestionCategory::Clarification => "clarification",
        };
        f.write_str(label)
    }
}

/// A question to be spoken to the candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    pub category: QuestionCategory,
}

impl Question {
    pub fn new(text: impl Into<String>, category: QuestionCategory) -> Self {
        Self {
            text: text.into(),
            category,
        }
    }
}

/// One completed, scored question/answer exchange. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub category: QuestionCategory,
    pub transcript: String,
    /// Always within 1..=5.
    pub score: u8,
    pub rationale: String,
    pub flags: Vec<String>,
}

/// Structured facts extracted from the candidate's resume. Opaque to the
/// state machine; only forwarded to the evaluator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeContext {
    pub name: Option<String>,
    pub summary: String,
    pub roles: Vec<String>,
    pub skills: Vec<String>,
    pub tools: Vec<String>,
    pub projects: Vec<String>,
    pub education: Vec<String>,
    pub certifications: Vec<String>,
    pub achievements: Vec<String>,
    pub claims: Vec<String>,
    pub experience_years: Option<f32>,
}

impl ResumeContext {
    /// Renders the resume as plain text for prompts.
    pub fn render(&self) -> String {
        format!(
            "Name: {}\nSummary: {}\nRoles: {}\nSkills: {}\nTools: {}\nProjects: {}\nEducation: {}\nCertifications: {}\nAchievements: {}\nClaims: {}\nExperience years: {}",
            self.name.as_deref().unwrap_or("Not provided"),
            self.summary,
            self.roles.join(", "),
            self.skills.join(", "),
            self.tools.join(", "),
            self.projects.join(", "),
            self.education.join(", "),
            self.certifications.join(", "),
            self.achievements.join(", "),
            self.claims.join(", "),
            self.experience_years
                .map(|y| y.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        )
    }

    /// Resume topics worth steering questions toward, labelled by kind
    /// (e.g. `"skills: Rust"`).
    pub fn topics(&self) -> Vec<String> {
        [
            ("skills", &self.skills),
            ("projects", &self.projects),
            ("roles", &self.roles),
            ("tools", &self.tools),
        ]
        .into_iter()
        .flat_map(|(kind, items)| {
            items
                .iter()
                .filter(|item| !item.trim().is_empty())
                .map(move |item| format!("{kind}: {}", item.trim()))
        })
        .collect()
    }
}

/// Lowercases and pads text so topics can be matched on word boundaries.
fn normalize_words(text: &str) -> String {
    let words: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '+' || c == '#' { c } else { ' ' })
        .collect();
    format!(" {} ", words.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Final status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    /// The channel closed before a natural conclusion.
    Canceled,
    /// The candidate did not consent to the interview.
    Declined,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Canceled => "canceled",
            SessionStatus::Declined => "declined",
        };
        f.write_str(label)
    }
}

/// Who is being interviewed, for what.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub role: String,
    pub level: String,
    pub candidate_name: Option<String>,
    pub resume: Option<ResumeContext>,
}

/// One interview instance.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub context: SessionContext,
    turns: Vec<Turn>,
    question_count: u32,
    pub intro_asked: bool,
    pub behavioral_asked: bool,
    /// Consecutive answers scored at or below the low-score line.
    pub low_score_streak: u32,
    /// Consecutive follow-up or clarification questions.
    pub followup_count: u32,
    pub consent: bool,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    /// Resume topics mentioned so far, in the order they came up.
    covered_topics: Vec<String>,
}

impl Session {
    pub fn new(context: SessionContext, consent: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            context,
            turns: Vec::new(),
            question_count: 0,
            intro_asked: false,
            behavioral_asked: false,
            low_score_streak: 0,
            followup_count: 0,
            consent,
            status: SessionStatus::Active,
            started_at: Utc::now(),
            covered_topics: Vec::new(),
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of questions answered so far, including skipped turns.
    pub fn question_count(&self) -> u32 {
        self.question_count
    }

    /// Appends a scored turn and advances the question count.
    pub(crate) fn record_turn(&mut self, turn: Turn) {
        self.low_score_streak = if turn.score <= 2 {
            self.low_score_streak + 1
        } else {
            0
        };
        self.turns.push(turn);
        self.question_count += 1;
    }

    /// Advances the question count for an answer that could not be scored.
    pub(crate) fn record_skipped(&mut self) {
        self.question_count += 1;
    }

    /// Updates the per-category flags for a question about to be asked.
    pub(crate) fn note_question(&mut self, category: QuestionCategory) {
        match category {
            QuestionCategory::Intro => self.intro_asked = true,
            QuestionCategory::Behavioral => self.behavioral_asked = true,
            _ => {}
        }
        if category.is_followup() {
            self.followup_count += 1;
        } else {
            self.followup_count = 0;
        }
    }

    pub fn scores(&self) -> impl Iterator<Item = u8> + '_ {
        self.turns.iter().map(|t| t.score)
    }

    pub fn covered_topics(&self) -> &[String] {
        &self.covered_topics
    }

    /// Resume topics not yet mentioned by either side.
    pub fn uncovered_topics(&self) -> Vec<String> {
        self.resume_topics()
            .into_iter()
            .filter(|topic| !self.covered_topics.contains(topic))
            .collect()
    }

    /// Marks every resume topic named in `text` as covered.
    pub(crate) fn note_coverage(&mut self, text: &str) {
        let haystack = normalize_words(text);
        for topic in self.resume_topics() {
            if self.covered_topics.contains(&topic) {
                continue;
            }
            let name = topic.split_once(": ").map_or(topic.as_str(), |(_, name)| name);
            let needle = normalize_words(name);
            if needle.trim().is_empty() {
                continue;
            }
            if haystack.contains(&needle) {
                self.covered_topics.push(topic);
            }
        }
    }

    /// Wall-clock time since the session started.
    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }

    fn resume_topics(&self) -> Vec<String> {
        self.context
            .resume
            .as_ref()
            .map(ResumeContext::topics)
            .unwrap_or_default()
    }
}
