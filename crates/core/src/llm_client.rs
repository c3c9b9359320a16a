//! OpenAI-compatible implementations of the interview collaborators.
//!
//! Transcription goes through the audio transcription endpoint; every
//! evaluator operation is one chat completion in JSON mode whose expected
//! shape is described to the model with a JSON Schema derived from the reply
//! type. Replies are parsed leniently: missing fields take defaults and the
//! state machine sanitizes the rest.

use crate::collaborator::{
    Consent, Evaluation, FinalEvaluation, InterviewEvaluator, LatestAnswer,
    MIN_TRANSCRIBABLE_BYTES, Opening, Recommendation, RubricScores, Transcriber,
    TranscriptionRequest,
};
use crate::error::CollaboratorError;
use crate::session::{Question, QuestionCategory, SessionContext, Turn};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        AudioInput, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateTranscriptionRequestArgs, ResponseFormat,
    },
};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::de::{DeserializeOwned, Deserializer};
use serde_json::{Value, json};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SCORE: i64 = 3;

/// Target interview length, in minutes.
const MIN_INTERVIEW_MINUTES: f64 = 15.0;
const MAX_INTERVIEW_MINUTES: f64 = 20.0;

const TRANSCRIPTION_PROMPT: &str = "A candidate answering a spoken job interview question. \
Expect software engineering vocabulary such as API, SQL, Kubernetes, microservices, CI/CD, \
latency and throughput.";

const EVALUATOR_PROMPT: &str = "You are a professional technical interviewer running a spoken \
interview. Ask one question at a time, grounded in the candidate's resume and the target role. \
Start broad, then go deeper on topics where the candidate shows real experience. Ask at least \
one behavioral question during the interview. When an answer is empty, off-topic or \
contradicts the resume, ask a short clarification instead of moving on. When told to change \
topic, pick a resume topic that has not been covered yet. Score every answer from 1 (no \
substance) to 5 (specific, correct and well reasoned). Keep questions short enough to be \
spoken aloud.";

/// Transcribes answers with an OpenAI-compatible speech-to-text model.
pub struct OpenAITranscriber {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAITranscriber {
    /// Creates a new transcriber.
    ///
    /// # Arguments
    ///
    /// * `config` - API key and base URL.
    /// * `model` - Transcription model identifier (e.g., "whisper-1").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn transcription_prompt(hint: Option<&str>) -> String {
    match hint {
        Some(question) if !question.trim().is_empty() => {
            format!("{TRANSCRIPTION_PROMPT} The question was: {}", question.trim())
        }
        _ => TRANSCRIPTION_PROMPT.to_string(),
    }
}

fn file_name_for(format: &str) -> &'static str {
    match format {
        "audio/mpeg" | "audio/mp3" => "answer.mp3",
        "audio/webm" => "answer.webm",
        "audio/ogg" => "answer.ogg",
        _ => "answer.wav",
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, CollaboratorError>>,
) -> Result<T, CollaboratorError> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| CollaboratorError::Timeout(timeout))?
}

#[async_trait]
impl Transcriber for OpenAITranscriber {
    async fn transcribe(&self, request: &TranscriptionRequest) -> Result<String, CollaboratorError> {
        if request.audio.len() < MIN_TRANSCRIBABLE_BYTES {
            debug!(bytes = request.audio.len(), "audio too short to transcribe");
            return Ok(String::new());
        }

        let body = CreateTranscriptionRequestArgs::default()
            .file(AudioInput::from_vec_u8(
                file_name_for(&request.format).to_string(),
                request.audio.clone(),
            ))
            .model(&self.model)
            .language("en")
            .prompt(transcription_prompt(request.context_hint.as_deref()))
            .build()
            .map_err(|e| CollaboratorError::Transcription(e.to_string()))?;

        let response = with_timeout(self.timeout, async {
            self.client
                .audio()
                .transcribe(body)
                .await
                .map_err(|e| CollaboratorError::Transcription(e.to_string()))
        })
        .await?;
        Ok(response.text.trim().to_string())
    }
}

/// Generates questions and scores answers with an OpenAI-compatible chat model.
pub struct OpenAIEvaluator {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAIEvaluator {
    /// Creates a new evaluator.
    ///
    /// # Arguments
    ///
    /// * `config` - API key and base URL.
    /// * `model` - Chat model identifier (e.g., "gpt-4o-mini").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// One JSON-mode completion, parsed into `T`.
    async fn complete_json<T>(&self, instructions: &str, payload: Value) -> Result<T, CollaboratorError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let schema = serde_json::to_string(&schemars::schema_for!(T))?;
        let system = format!(
            "{EVALUATOR_PROMPT}\n\n{instructions}\n\nRespond with a single JSON object matching this JSON Schema:\n{schema}"
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(0.3)
            .response_format(ResponseFormat::JsonObject)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(payload.to_string())
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = with_timeout(self.timeout, async {
            Ok(self.client.chat().create(request).await?)
        })
        .await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .ok_or_else(|| CollaboratorError::InvalidResponse("no content in completion".to_string()))?;
        parse_reply(content)
    }
}

fn parse_reply<T: DeserializeOwned>(content: &str) -> Result<T, CollaboratorError> {
    let trimmed = content.trim();
    // Some models wrap JSON mode output in a code fence anyway.
    let json = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed);
    Ok(serde_json::from_str(json.trim())?)
}

fn render_history(history: &[Turn]) -> Value {
    Value::Array(
        history
            .iter()
            .map(|turn| {
                json!({
                    "question": turn.question,
                    "category": turn.category,
                    "answer": turn.transcript,
                    "score": turn.score,
                })
            })
            .collect(),
    )
}

fn render_context(context: &SessionContext) -> Value {
    json!({
        "role": context.role,
        "level": context.level,
        "candidate_name": context.candidate_name,
        "resume": context.resume.as_ref().map(|r| r.render()),
    })
}

fn evaluation_instructions(latest: &LatestAnswer) -> String {
    let mut instructions = String::from(
        "Score the latest answer and propose the next question. Aim for an interview of \
         15 to 20 minutes: only recommend ending once the minimum has passed and the signal \
         is clear.",
    );
    if latest.force_new_topic {
        instructions.push_str(
            " The follow-up budget for the current topic is spent: the next question must move \
             to a new resume topic.",
        );
        if !latest.coverage.uncovered.is_empty() {
            instructions.push_str(" Pick one of these uncovered topics: ");
            instructions.push_str(&latest.coverage.uncovered.join("; "));
            instructions.push('.');
        }
    }
    instructions
}

fn render_duration(elapsed: Duration) -> Value {
    let minutes = elapsed.as_secs_f64() / 60.0;
    let round = |m: f64| (m * 10.0).round() / 10.0;
    json!({
        "elapsed_minutes": round(minutes),
        "target_minutes": [MIN_INTERVIEW_MINUTES, MAX_INTERVIEW_MINUTES],
        "min_remaining_minutes": round((MIN_INTERVIEW_MINUTES - minutes).max(0.0)),
        "max_remaining_minutes": round((MAX_INTERVIEW_MINUTES - minutes).max(0.0)),
    })
}

fn evaluation_payload(history: &[Turn], latest: &LatestAnswer) -> Value {
    json!({
        "context": render_context(&latest.context),
        "history": render_history(history),
        "current_question": latest.question.text,
        "current_category": latest.question.category,
        "answer": latest.transcript,
        "question_count": latest.question_count,
        "followup_count": latest.followup_count,
        "force_new_topic": latest.force_new_topic,
        "intro_asked": latest.intro_asked,
        "behavioral_asked": latest.behavioral_asked,
        "stats": latest.stats,
        "coverage": latest.coverage,
        "duration": render_duration(latest.elapsed),
    })
}

/// Accepts integers, floats and numeric strings; anything else is `None`.
fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
struct OpeningReply {
    /// One or two friendly sentences introducing the interviewer and the format.
    greeting: String,
    /// The first question, asking the candidate to introduce themselves.
    question: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ConsentReply {
    /// One of "granted", "denied" or "unclear".
    consent: String,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(default)]
struct EvaluationReply {
    /// Integer score of the latest answer, 1 to 5.
    #[serde(deserialize_with = "lenient_int")]
    #[schemars(with = "i64")]
    answer_score: Option<i64>,
    /// One or two sentences justifying the score.
    rationale: String,
    /// Concerns worth a human reviewer's attention.
    red_flags: Vec<String>,
    /// The next question to ask.
    next_question: String,
    /// One of "intro", "technical", "behavioral", "followup", "clarification".
    question_type: String,
    /// Whether enough signal has been gathered to end the interview.
    end_interview: bool,
}

impl From<EvaluationReply> for Evaluation {
    fn from(reply: EvaluationReply) -> Self {
        Evaluation {
            score: reply.answer_score.unwrap_or(DEFAULT_SCORE),
            rationale: reply.rationale,
            flags: reply
                .red_flags
                .into_iter()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect(),
            next_question: reply.next_question,
            next_category: QuestionCategory::parse_lenient(&reply.question_type),
            end_recommended: reply.end_interview,
        }
    }
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(default)]
struct FinalReply {
    /// Two to four sentences summarizing the interview for a hiring manager.
    summary: String,
    /// One sentence summarizing the candidate's resume.
    resume_summary: String,
    #[serde(deserialize_with = "lenient_int")]
    #[schemars(with = "i64")]
    communication: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    #[schemars(with = "i64")]
    technical: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    #[schemars(with = "i64")]
    problem_solving: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    #[schemars(with = "i64")]
    culture_fit: Option<i64>,
    /// One of "move_forward", "hold" or "reject".
    recommendation: String,
}

impl FinalReply {
    fn into_evaluation(self, history: &[Turn]) -> FinalEvaluation {
        let average = if history.is_empty() {
            0.0
        } else {
            history.iter().map(|t| t.score as f64).sum::<f64>() / history.len() as f64
        };
        let fallback = average.round() as i64;
        let dimension = |v: Option<i64>| v.unwrap_or(fallback).clamp(1, 5) as u8;
        let recommendation = match self.recommendation.trim().to_lowercase().as_str() {
            "move_forward" | "move forward" | "hire" => Recommendation::MoveForward,
            "hold" => Recommendation::Hold,
            "reject" | "no_hire" => Recommendation::Reject,
            _ => Recommendation::from_average(average),
        };
        FinalEvaluation {
            summary: self.summary.trim().to_string(),
            resume_summary: self.resume_summary.trim().to_string(),
            rubric: RubricScores {
                communication: dimension(self.communication),
                technical: dimension(self.technical),
                problem_solving: dimension(self.problem_solving),
                culture_fit: dimension(self.culture_fit),
            },
            recommendation,
        }
    }
}

#[async_trait]
impl InterviewEvaluator for OpenAIEvaluator {
    async fn opening(&self, context: &SessionContext) -> Result<Opening, CollaboratorError> {
        let reply: OpeningReply = self
            .complete_json(
                "Write the greeting that opens the interview and the first question. The greeting \
                 introduces you as the interviewer and says you will ask questions based on the \
                 candidate's profile. Do not ask the question inside the greeting.",
                json!({ "context": render_context(context) }),
            )
            .await?;
        Ok(Opening {
            greeting: reply.greeting.trim().to_string(),
            question: Question::new(reply.question.trim(), QuestionCategory::Intro),
        })
    }

    async fn interpret_consent(
        &self,
        transcript: &str,
        prompt: &str,
    ) -> Result<Consent, CollaboratorError> {
        let reply: ConsentReply = self
            .complete_json(
                "Decide whether the candidate agreed to start the interview.",
                json!({ "prompt": prompt, "reply": transcript }),
            )
            .await?;
        Ok(match reply.consent.trim().to_lowercase().as_str() {
            "granted" | "yes" => Consent::Granted,
            "denied" | "no" => Consent::Denied,
            _ => Consent::Unclear,
        })
    }

    async fn evaluate(
        &self,
        history: &[Turn],
        latest: &LatestAnswer,
    ) -> Result<Evaluation, CollaboratorError> {
        let reply: EvaluationReply = self
            .complete_json(
                &evaluation_instructions(latest),
                evaluation_payload(history, latest),
            )
            .await?;
        Ok(reply.into())
    }

    async fn final_evaluate(
        &self,
        context: &SessionContext,
        history: &[Turn],
    ) -> Result<FinalEvaluation, CollaboratorError> {
        let reply: FinalReply = self
            .complete_json(
                "The interview is over. Rate the candidate from 1 to 5 on communication, \
                 technical depth, problem solving and culture fit, and give a recommendation.",
                json!({
                    "context": render_context(context),
                    "history": render_history(history),
                }),
            )
            .await?;
        Ok(reply.into_evaluation(history))
    }
}
