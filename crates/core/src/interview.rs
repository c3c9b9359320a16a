//! Interview dialogue state machine.
//!
//! One [`Interview`] owns one session from greeting to termination. It calls
//! the transcription and evaluation collaborators, applies the continuation
//! policy, and returns [`Command`]s for its runtime to execute. It performs
//! no transport I/O itself, so every transition can be driven directly from
//! tests.

use crate::Command;
use crate::audio::AnswerPayload;
use crate::collaborator::{
    Consent, InterviewEvaluator, LatestAnswer, Opening, ScoreStats, TopicCoverage, Transcriber,
    TranscriptionRequest,
};
use crate::error::{CollaboratorError, InterviewError};
use crate::policy::{Decision, EndReason, PolicyConfig, ScoreLedger, decide};
use crate::report::{FinalReport, TurnResult, fallback_evaluation};
use crate::session::{Question, QuestionCategory, Session, SessionContext, SessionStatus, Turn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Dialogue states of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueState {
    AwaitingStart,
    GreetingSent,
    AwaitingAnswer,
    Scoring,
    QuestionSent,
    Concluding,
    Closed,
}

impl DialogueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogueState::AwaitingStart => "awaiting_start",
            DialogueState::GreetingSent => "greeting_sent",
            DialogueState::AwaitingAnswer => "awaiting_answer",
            DialogueState::Scoring => "scoring",
            DialogueState::QuestionSent => "question_sent",
            DialogueState::Concluding => "concluding",
            DialogueState::Closed => "closed",
        }
    }
}

/// Tunables of the dialogue state machine.
#[derive(Debug, Clone)]
pub struct InterviewConfig {
    pub policy: PolicyConfig,
    /// Wait before the single retry of a failed collaborator call.
    pub retry_backoff: Duration,
    /// How often an unclear consent reply is re-asked before giving up.
    pub consent_reasks: u32,
    pub max_followups_per_topic: u32,
    /// Consecutive timed-out answers that end the interview.
    pub max_abandoned_turns: u32,
    pub consent_prompt: String,
    /// Asked when the evaluator cannot propose a next question.
    pub fallback_question: String,
    /// Stands in for a transcript the transcriber could not produce.
    pub placeholder_transcript: String,
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            retry_backoff: Duration::from_millis(500),
            consent_reasks: 2,
            max_followups_per_topic: 4,
            max_abandoned_turns: 2,
            consent_prompt: "Shall we start?".to_string(),
            fallback_question: "Please share more about your recent work.".to_string(),
            placeholder_transcript: "[inaudible]".to_string(),
        }
    }
}

pub struct Interview {
    config: InterviewConfig,
    transcriber: Arc<dyn Transcriber>,
    evaluator: Arc<dyn InterviewEvaluator>,
    state: DialogueState,
    session: Session,
    ledger: ScoreLedger,
    /// The question awaiting an answer; `None` while the consent prompt is out.
    current: Option<Question>,
    /// Opening question held back until consent is granted.
    deferred_opening: Option<Question>,
    consent_attempts: u32,
    abandoned_streak: u32,
}

impl Interview {
    pub fn new(
        config: InterviewConfig,
        context: SessionContext,
        consent: bool,
        transcriber: Arc<dyn Transcriber>,
        evaluator: Arc<dyn InterviewEvaluator>,
    ) -> Self {
        Self {
            config,
            transcriber,
            evaluator,
            state: DialogueState::AwaitingStart,
            session: Session::new(context, consent),
            ledger: ScoreLedger::default(),
            current: None,
            deferred_opening: None,
            consent_attempts: 0,
            abandoned_streak: 0,
        }
    }

    pub fn state(&self) -> DialogueState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn ledger(&self) -> &ScoreLedger {
        &self.ledger
    }

    /// Greets the candidate and asks either the opening question or, without
    /// prior consent, the consent prompt.
    pub async fn start(&mut self) -> Result<Vec<Command>, InterviewError> {
        self.expect_state(DialogueState::AwaitingStart, "start")?;
        info!(
            session_id = %self.session.id,
            role = %self.session.context.role,
            level = %self.session.context.level,
            consent = self.session.consent,
            "Interview starting"
        );

        let evaluator = Arc::clone(&self.evaluator);
        let context = &self.session.context;
        let opening = match with_retry(self.config.retry_backoff, "opening", || {
            evaluator.opening(context)
        })
        .await
        {
            Ok(opening) if !opening.question.text.trim().is_empty() => opening,
            Ok(_) => {
                warn!("Evaluator returned an empty opening question; using default");
                default_opening(context)
            }
            Err(e) => {
                warn!(error = %e, "Opening generation failed; using default");
                default_opening(context)
            }
        };

        let command = if self.session.consent {
            self.ask(opening.question, Some(&opening.greeting))
        } else {
            self.deferred_opening = Some(opening.question);
            let speech = format!("{} {}", opening.greeting.trim(), self.config.consent_prompt);
            self.consent_prompt(speech)
        };
        self.state = DialogueState::GreetingSent;
        Ok(vec![command])
    }

    /// Confirms that the speech for the last question was fully delivered.
    pub fn speech_delivered(&mut self) -> Result<Vec<Command>, InterviewError> {
        match self.state {
            DialogueState::GreetingSent | DialogueState::QuestionSent => {
                self.state = DialogueState::AwaitingAnswer;
                Ok(vec![Command::ReadyToListen])
            }
            state => Err(invalid("deliver speech", state)),
        }
    }

    /// Transcribes and scores one answer, then asks the next question or
    /// concludes.
    pub async fn submit_answer(
        &mut self,
        payload: &AnswerPayload,
    ) -> Result<Vec<Command>, InterviewError> {
        self.expect_state(DialogueState::AwaitingAnswer, "accept an answer")?;
        self.state = DialogueState::Scoring;
        self.abandoned_streak = 0;

        let mut commands = Vec::new();
        let transcript = match payload.decode() {
            Ok(audio) => match self.transcribe(audio, &payload.format).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Transcription failed after retry; using placeholder");
                    commands.push(Command::Error(format!("answer could not be transcribed: {e}")));
                    self.config.placeholder_transcript.clone()
                }
            },
            Err(e) => {
                warn!(error = %e, "Answer audio could not be decoded");
                commands.push(Command::Error(format!("answer audio could not be decoded: {e}")));
                self.config.placeholder_transcript.clone()
            }
        };
        debug!(chars = transcript.len(), "Transcript ready");
        commands.extend(self.handle_transcript(transcript).await);
        Ok(commands)
    }

    /// Abandons the current turn after no answer arrived in time.
    pub async fn answer_timed_out(&mut self) -> Result<Vec<Command>, InterviewError> {
        self.expect_state(DialogueState::AwaitingAnswer, "abandon a turn")?;
        self.abandoned_streak += 1;
        warn!(streak = self.abandoned_streak, "No answer arrived before the timeout");
        if !self.session.consent {
            // Silence is not consent.
            return Ok(self.conclude(EndReason::ConsentDeclined).await);
        }
        if self.abandoned_streak >= self.config.max_abandoned_turns {
            return Ok(self.conclude(EndReason::Abandoned).await);
        }
        self.state = DialogueState::Scoring;
        Ok(self.handle_transcript(String::new()).await)
    }

    /// Ends the interview early because the channel closed. Returns `None` if
    /// it had already concluded.
    pub async fn cancel(&mut self) -> Option<FinalReport> {
        if self.state == DialogueState::Closed {
            return None;
        }
        info!(state = self.state.as_str(), "Interview canceled");
        self.state = DialogueState::Concluding;
        self.session.status = SessionStatus::Canceled;
        let report = self.final_report(EndReason::Disconnected).await;
        self.state = DialogueState::Closed;
        Some(report)
    }

    async fn transcribe(&self, audio: Vec<u8>, format: &str) -> Result<String, CollaboratorError> {
        let request = TranscriptionRequest {
            audio,
            format: format.to_string(),
            context_hint: self.current.as_ref().map(|q| q.text.clone()),
        };
        let transcriber = Arc::clone(&self.transcriber);
        let text = with_retry(self.config.retry_backoff, "transcription", || {
            transcriber.transcribe(&request)
        })
        .await?;
        Ok(text.trim().to_string())
    }

    async fn handle_transcript(&mut self, transcript: String) -> Vec<Command> {
        if self.session.consent {
            self.score_answer(transcript).await
        } else {
            self.handle_consent(transcript).await
        }
    }

    async fn handle_consent(&mut self, transcript: String) -> Vec<Command> {
        let consent = if transcript.trim().is_empty() {
            Consent::Unclear
        } else if let Some(consent) = Consent::from_keywords(&transcript) {
            consent
        } else {
            match self
                .evaluator
                .interpret_consent(&transcript, &self.config.consent_prompt)
                .await
            {
                Ok(consent) => consent,
                Err(e) => {
                    warn!(error = %e, "Consent interpretation failed");
                    Consent::Unclear
                }
            }
        };
        info!(?consent, "Consent reply interpreted");

        match consent {
            Consent::Granted => {
                self.session.consent = true;
                let question = self
                    .deferred_opening
                    .take()
                    .unwrap_or_else(|| default_opening(&self.session.context).question);
                vec![self.ask(question, Some("Great, let's begin."))]
            }
            Consent::Denied => self.conclude(EndReason::ConsentDeclined).await,
            Consent::Unclear => {
                self.consent_attempts += 1;
                if self.consent_attempts > self.config.consent_reasks {
                    return self.conclude(EndReason::ConsentDeclined).await;
                }
                let speech = format!("Sorry, I didn't catch that. {}", self.config.consent_prompt);
                let command = self.consent_prompt(speech);
                self.state = DialogueState::QuestionSent;
                vec![command]
            }
        }
    }

    async fn score_answer(&mut self, transcript: String) -> Vec<Command> {
        let question = self.current.clone().unwrap_or_else(|| {
            Question::new(self.config.fallback_question.clone(), QuestionCategory::Followup)
        });
        let force_new_topic = self.session.followup_count >= self.config.max_followups_per_topic;
        self.session.note_coverage(&question.text);
        self.session.note_coverage(&transcript);
        let latest = LatestAnswer {
            context: self.session.context.clone(),
            question: question.clone(),
            transcript: transcript.clone(),
            question_count: self.session.question_count(),
            followup_count: self.session.followup_count,
            force_new_topic,
            intro_asked: self.session.intro_asked,
            behavioral_asked: self.session.behavioral_asked,
            stats: ScoreStats {
                average: self.ledger.average(),
                high_count: self.ledger.high_count(),
                low_count: self.ledger.low_count(),
                low_score_streak: self.session.low_score_streak,
                signal: self.ledger.signal(),
            },
            coverage: TopicCoverage::new(
                self.session.covered_topics().to_vec(),
                self.session.uncovered_topics(),
            ),
            elapsed: self.session.elapsed(),
        };

        let evaluator = Arc::clone(&self.evaluator);
        let history = self.session.turns();
        let result = with_retry(self.config.retry_backoff, "evaluation", || {
            evaluator.evaluate(history, &latest)
        })
        .await;

        let question_number = self.session.question_count() + 1;
        let mut commands = Vec::new();
        let (decision, next) = match result {
            Ok(evaluation) => {
                let score = sanitize_score(evaluation.score);
                let turn = Turn {
                    question: question.text,
                    category: question.category,
                    transcript,
                    score,
                    rationale: evaluation.rationale.trim().to_string(),
                    flags: evaluation.flags,
                };
                info!(question_number, score, category = %turn.category, "Answer scored");
                commands.push(Command::TurnResult(TurnResult {
                    question_number,
                    category: turn.category,
                    score,
                    rationale: turn.rationale.clone(),
                    flags: turn.flags.clone(),
                }));
                self.session.record_turn(turn);
                self.ledger.push(score, &self.config.policy);

                let decision = decide(
                    &self.config.policy,
                    self.session.question_count(),
                    &self.ledger,
                    evaluation.end_recommended,
                );
                if evaluation.end_recommended && !decision.is_end() {
                    debug!("End recommendation ignored before the first answer");
                }
                (
                    decision,
                    self.next_question(
                        &evaluation.next_question,
                        evaluation.next_category,
                        force_new_topic,
                    ),
                )
            }
            Err(e) => {
                warn!(error = %e, question_number, "Evaluation failed after retry; skipping turn");
                commands.push(Command::Error(format!("answer could not be scored: {e}")));
                self.session.record_skipped();
                let decision = decide(
                    &self.config.policy,
                    self.session.question_count(),
                    &self.ledger,
                    false,
                );
                let fallback = Question::new(
                    self.config.fallback_question.clone(),
                    QuestionCategory::Clarification,
                );
                (decision, fallback)
            }
        };

        match decision {
            Decision::End(reason) => {
                info!(
                    ?reason,
                    question_count = self.session.question_count(),
                    average = self.ledger.average(),
                    "Continuation policy ended the interview"
                );
                commands.extend(self.conclude(reason).await);
            }
            Decision::Continue => commands.push(self.ask(next, None)),
        }
        commands
    }

    fn next_question(
        &self,
        text: &str,
        category: Option<QuestionCategory>,
        force_new_topic: bool,
    ) -> Question {
        let text = text.trim();
        if text.is_empty() {
            warn!("Evaluator proposed no next question; using fallback");
            return Question::new(self.config.fallback_question.clone(), QuestionCategory::Followup);
        }
        let category = match category.unwrap_or(QuestionCategory::Followup) {
            c if force_new_topic && c.is_followup() => {
                debug!(category = %c, "Follow-up budget spent; relabeling as technical");
                QuestionCategory::Technical
            }
            c => c,
        };
        Question::new(text, category)
    }

    fn ask(&mut self, question: Question, preamble: Option<&str>) -> Command {
        self.session.note_question(question.category);
        let question_number = self.session.question_count() + 1;
        let speech = match preamble.map(str::trim) {
            Some(p) if !p.is_empty() => format!("{p} {}", question.text),
            _ => question.text.clone(),
        };
        let command = Command::Ask {
            text: question.text.clone(),
            speech,
            category: Some(question.category),
            question_number,
        };
        self.current = Some(question);
        self.state = DialogueState::QuestionSent;
        command
    }

    fn consent_prompt(&mut self, speech: String) -> Command {
        self.current = None;
        Command::Ask {
            text: self.config.consent_prompt.clone(),
            speech,
            category: None,
            question_number: 0,
        }
    }

    async fn conclude(&mut self, reason: EndReason) -> Vec<Command> {
        self.state = DialogueState::Concluding;
        self.session.status = match reason {
            EndReason::ConsentDeclined => SessionStatus::Declined,
            EndReason::Disconnected => SessionStatus::Canceled,
            _ => SessionStatus::Completed,
        };
        let report = self.final_report(reason).await;
        self.state = DialogueState::Closed;
        vec![Command::Conclude(Box::new(report))]
    }

    async fn final_report(&self, reason: EndReason) -> FinalReport {
        let evaluation = if self.session.status == SessionStatus::Declined {
            None
        } else {
            let evaluator = Arc::clone(&self.evaluator);
            let session = &self.session;
            match with_retry(self.config.retry_backoff, "final evaluation", || {
                evaluator.final_evaluate(&session.context, session.turns())
            })
            .await
            {
                Ok(evaluation) => Some(evaluation),
                Err(e) => {
                    warn!(error = %e, "Final evaluation failed after retry; using local fallback");
                    Some(fallback_evaluation(&self.session, &self.ledger))
                }
            }
        };
        let report = FinalReport::build(&self.session, &self.ledger, reason, evaluation);
        info!(
            session_id = %report.session_id,
            status = %report.status,
            question_count = report.question_count,
            average = report.average_score,
            "Interview concluded"
        );
        report
    }

    fn expect_state(
        &self,
        expected: DialogueState,
        action: &'static str,
    ) -> Result<(), InterviewError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(invalid(action, self.state))
        }
    }
}

fn invalid(action: &'static str, state: DialogueState) -> InterviewError {
    InterviewError::InvalidTransition {
        action,
        state: state.as_str(),
    }
}

fn default_opening(context: &SessionContext) -> Opening {
    let name = context.candidate_name.as_deref().unwrap_or("there");
    Opening {
        greeting: format!(
            "Hi {name}, thanks for joining this {} interview. I will ask you some questions based on your profile.",
            context.role
        ),
        question: Question::new(
            "Please introduce yourself and walk me through your recent experience.",
            QuestionCategory::Intro,
        ),
    }
}

/// Clamps a collaborator score into 1..=5.
fn sanitize_score(raw: i64) -> u8 {
    let clamped = raw.clamp(1, 5);
    if clamped != raw {
        warn!(raw, clamped, "Evaluator score out of range; clamped");
    }
    clamped as u8
}

/// Runs `call`, retrying once after `backoff` if it fails.
async fn with_retry<T, F, Fut>(
    backoff: Duration,
    operation: &'static str,
    mut call: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    match call().await {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(error = %e, operation, "Collaborator call failed; retrying once");
            tokio::time::sleep(backoff).await;
            call().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::MockTranscriber;
    use crate::mock::{FixedTranscriber, ScriptedEvaluator, evaluation};
    use crate::policy::SignalQuality;
    use approx::assert_abs_diff_eq;

    fn config() -> InterviewConfig {
        InterviewConfig {
            retry_backoff: Duration::ZERO,
            ..Default::default()
        }
    }

    fn context() -> SessionContext {
        SessionContext {
            role: "Backend Engineer".to_string(),
            level: "senior".to_string(),
            candidate_name: Some("Sam".to_string()),
            resume: None,
        }
    }

    /// Three seconds of steady voice at 16 kHz.
    fn voiced_answer() -> AnswerPayload {
        AnswerPayload::from_samples(&vec![0.3; 48_000], 16_000, 1).unwrap()
    }

    fn interview_with(
        evaluator: Arc<ScriptedEvaluator>,
        transcriber: Arc<dyn Transcriber>,
        consent: bool,
    ) -> Interview {
        Interview::new(config(), context(), consent, transcriber, evaluator)
    }

    fn transcriber() -> Arc<dyn Transcriber> {
        Arc::new(FixedTranscriber::new(
            "I led the migration of our billing system to an event driven design.",
        ))
    }

    async fn started(interview: &mut Interview) {
        interview.start().await.unwrap();
        interview.speech_delivered().unwrap();
    }

    fn asked(commands: &[Command]) -> Option<(&str, Option<QuestionCategory>, u32)> {
        commands.iter().find_map(|c| match c {
            Command::Ask {
                text,
                category,
                question_number,
                ..
            } => Some((text.as_str(), *category, *question_number)),
            _ => None,
        })
    }

    fn concluded(commands: &[Command]) -> Option<&FinalReport> {
        commands.iter().find_map(|c| match c {
            Command::Conclude(report) => Some(report.as_ref()),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_end_to_end_strong_candidate() {
        let evaluator = Arc::new(ScriptedEvaluator::new().with_evaluations(vec![
            Ok(evaluation(4, "Describe a hard bug you fixed.", QuestionCategory::Technical)),
            Ok(evaluation(4, "How did you find the root cause?", QuestionCategory::Followup)),
            Ok(evaluation(5, "Tell me about a conflict at work.", QuestionCategory::Behavioral)),
            Ok(evaluation(4, "How do you design APIs?", QuestionCategory::Technical)),
        ]));
        let mut interview = interview_with(evaluator.clone(), transcriber(), true);

        let commands = interview.start().await.unwrap();
        assert_eq!(
            asked(&commands),
            Some(("Tell me about yourself", Some(QuestionCategory::Intro), 1))
        );
        match &commands[0] {
            Command::Ask { speech, .. } => {
                assert!(speech.starts_with("Hi, thanks for joining"));
                assert!(speech.ends_with("Tell me about yourself"));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(interview.state(), DialogueState::GreetingSent);

        assert_eq!(
            interview.speech_delivered().unwrap(),
            vec![Command::ReadyToListen]
        );
        assert_eq!(interview.state(), DialogueState::AwaitingAnswer);

        let commands = interview.submit_answer(&voiced_answer()).await.unwrap();
        match &commands[0] {
            Command::TurnResult(result) => {
                assert_eq!(result.question_number, 1);
                assert_eq!(result.score, 4);
                assert_eq!(result.category, QuestionCategory::Intro);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(
            asked(&commands),
            Some((
                "Describe a hard bug you fixed.",
                Some(QuestionCategory::Technical),
                2
            ))
        );
        assert_eq!(interview.state(), DialogueState::QuestionSent);

        for _ in 0..2 {
            interview.speech_delivered().unwrap();
            let commands = interview.submit_answer(&voiced_answer()).await.unwrap();
            assert!(concluded(&commands).is_none());
        }

        interview.speech_delivered().unwrap();
        let commands = interview.submit_answer(&voiced_answer()).await.unwrap();
        let report = concluded(&commands).expect("interview should conclude");
        assert_eq!(report.status, SessionStatus::Completed);
        assert_eq!(report.end_reason, EndReason::StrongSignal);
        assert_eq!(report.question_count, 4);
        assert_eq!(report.questions.len(), 4);
        assert_eq!(report.questions[0].q, "Tell me about yourself");
        assert!(report.evaluation.is_some());
        assert!(asked(&commands).is_none());

        assert_eq!(interview.state(), DialogueState::Closed);
        assert_eq!(evaluator.answers().len(), 4);
        assert_eq!(evaluator.final_calls(), 1);
        assert_eq!(evaluator.answers()[0].question.text, "Tell me about yourself");
        assert_eq!(evaluator.answers()[3].question_count, 3);
    }

    #[tokio::test]
    async fn test_answer_rejected_outside_awaiting_answer() {
        let evaluator = Arc::new(ScriptedEvaluator::new());
        let mut interview = interview_with(evaluator.clone(), transcriber(), true);

        let err = interview.submit_answer(&voiced_answer()).await.unwrap_err();
        assert!(matches!(
            err,
            InterviewError::InvalidTransition {
                state: "awaiting_start",
                ..
            }
        ));

        interview.start().await.unwrap();
        // Speech not yet delivered: capture must not have been armed.
        let err = interview.submit_answer(&voiced_answer()).await.unwrap_err();
        assert_eq!(err.to_string(), "cannot accept an answer while greeting_sent");
        assert_eq!(interview.state(), DialogueState::GreetingSent);
        assert!(evaluator.answers().is_empty());

        assert!(interview.speech_delivered().is_ok());
        assert!(interview.speech_delivered().is_err());
    }

    #[tokio::test]
    async fn test_cancel_while_awaiting_answer() {
        let evaluator = Arc::new(ScriptedEvaluator::new().with_evaluations(vec![Ok(
            evaluation(3, "What is your favorite database?", QuestionCategory::Technical),
        )]));
        let mut interview = interview_with(evaluator.clone(), transcriber(), true);
        started(&mut interview).await;
        interview.submit_answer(&voiced_answer()).await.unwrap();
        interview.speech_delivered().unwrap();
        assert_eq!(interview.state(), DialogueState::AwaitingAnswer);

        let report = interview.cancel().await.expect("report for partial history");
        assert_eq!(report.status, SessionStatus::Canceled);
        assert_eq!(report.end_reason, EndReason::Disconnected);
        assert_eq!(report.questions.len(), 1);
        assert_eq!(evaluator.final_calls(), 1);
        assert_eq!(interview.state(), DialogueState::Closed);

        assert!(interview.cancel().await.is_none());
    }

    #[tokio::test]
    async fn test_final_evaluation_falls_back_after_two_failures() {
        let evaluator = Arc::new(
            ScriptedEvaluator::new()
                .with_evaluations(vec![Ok(evaluation(2, "Next?", QuestionCategory::Technical))])
                .with_final_evaluation(None),
        );
        let mut interview = interview_with(evaluator.clone(), transcriber(), true);
        started(&mut interview).await;
        interview.submit_answer(&voiced_answer()).await.unwrap();

        let report = interview.cancel().await.unwrap();
        assert_eq!(evaluator.final_calls(), 2);
        let evaluation = report.evaluation.expect("fallback evaluation");
        assert_eq!(evaluation.rubric.technical, 2);
        assert_eq!(
            evaluation.recommendation,
            crate::collaborator::Recommendation::Reject
        );
    }

    #[tokio::test]
    async fn test_transcription_retried_once_then_succeeds() {
        let mut mock = MockTranscriber::new();
        let mut calls = 0;
        mock.expect_transcribe().times(2).returning(move |request| {
            calls += 1;
            assert_eq!(request.context_hint.as_deref(), Some("Tell me about yourself"));
            if calls == 1 {
                Err(CollaboratorError::Transcription("connection reset".to_string()))
            } else {
                Ok("  I build compilers.  ".to_string())
            }
        });
        let evaluator = Arc::new(ScriptedEvaluator::new());
        let mut interview = interview_with(evaluator.clone(), Arc::new(mock), true);
        started(&mut interview).await;

        interview.submit_answer(&voiced_answer()).await.unwrap();
        assert_eq!(evaluator.answers()[0].transcript, "I build compilers.");
    }

    #[tokio::test]
    async fn test_transcription_failure_uses_placeholder() {
        let mut mock = MockTranscriber::new();
        mock.expect_transcribe()
            .times(2)
            .returning(|_| Err(CollaboratorError::Timeout(Duration::from_secs(30))));
        let evaluator = Arc::new(ScriptedEvaluator::new());
        let mut interview = interview_with(evaluator.clone(), Arc::new(mock), true);
        started(&mut interview).await;

        let commands = interview.submit_answer(&voiced_answer()).await.unwrap();
        assert_eq!(evaluator.answers()[0].transcript, "[inaudible]");
        match &commands[0] {
            Command::Error(message) => assert!(message.contains("could not be transcribed")),
            other => panic!("unexpected command {other:?}"),
        }
        assert!(matches!(commands[1], Command::TurnResult(_)));
        assert!(asked(&commands).is_some());
        assert_eq!(interview.session().question_count(), 1);
    }

    #[tokio::test]
    async fn test_evaluation_failure_skips_turn() {
        let evaluator = Arc::new(ScriptedEvaluator::new().with_evaluations(vec![
            Err("rate limited".to_string()),
            Err("rate limited".to_string()),
        ]));
        let mut interview = interview_with(evaluator.clone(), transcriber(), true);
        started(&mut interview).await;

        let commands = interview.submit_answer(&voiced_answer()).await.unwrap();
        assert!(!commands.iter().any(|c| matches!(c, Command::TurnResult(_))));
        match &commands[0] {
            Command::Error(message) => {
                assert!(message.contains("could not be scored"));
                assert!(message.contains("rate limited"));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(
            asked(&commands),
            Some((
                "Please share more about your recent work.",
                Some(QuestionCategory::Clarification),
                2
            ))
        );
        assert_eq!(interview.session().question_count(), 1);
        assert!(interview.session().turns().is_empty());
        assert_eq!(interview.state(), DialogueState::QuestionSent);
    }

    #[tokio::test]
    async fn test_out_of_range_scores_are_clamped() {
        let evaluator = Arc::new(ScriptedEvaluator::new().with_evaluations(vec![
            Ok(evaluation(9, "Next one.", QuestionCategory::Technical)),
            Ok(evaluation(-3, "And another.", QuestionCategory::Technical)),
        ]));
        let mut interview = interview_with(evaluator, transcriber(), true);
        started(&mut interview).await;

        interview.submit_answer(&voiced_answer()).await.unwrap();
        interview.speech_delivered().unwrap();
        interview.submit_answer(&voiced_answer()).await.unwrap();

        let scores: Vec<u8> = interview.session().scores().collect();
        assert_eq!(scores, vec![5, 1]);
    }

    #[tokio::test]
    async fn test_end_recommendation_honored() {
        let mut last = evaluation(3, "Unused", QuestionCategory::Technical);
        last.end_recommended = true;
        let evaluator = Arc::new(ScriptedEvaluator::new().with_evaluations(vec![
            Ok(evaluation(3, "Second question", QuestionCategory::Technical)),
            Ok(last),
        ]));
        let mut interview = interview_with(evaluator, transcriber(), true);
        started(&mut interview).await;

        interview.submit_answer(&voiced_answer()).await.unwrap();
        interview.speech_delivered().unwrap();
        let commands = interview.submit_answer(&voiced_answer()).await.unwrap();
        let report = concluded(&commands).unwrap();
        assert_eq!(report.end_reason, EndReason::Recommended);
        assert_eq!(report.question_count, 2);
    }

    #[tokio::test]
    async fn test_hard_cap_ends_interview() {
        let mut config = config();
        config.policy.max_questions = 3;
        let evaluator = Arc::new(ScriptedEvaluator::new());
        let mut interview = Interview::new(config, context(), true, transcriber(), evaluator);
        started(&mut interview).await;

        for _ in 0..2 {
            let commands = interview.submit_answer(&voiced_answer()).await.unwrap();
            assert!(concluded(&commands).is_none());
            interview.speech_delivered().unwrap();
        }
        let commands = interview.submit_answer(&voiced_answer()).await.unwrap();
        assert_eq!(
            concluded(&commands).map(|r| r.end_reason),
            Some(EndReason::QuestionCap)
        );
    }

    #[tokio::test]
    async fn test_followup_budget_forces_new_topic() {
        let evaluator = Arc::new(ScriptedEvaluator::new().with_evaluations(vec![
            Ok(evaluation(3, "Why?", QuestionCategory::Followup)),
            Ok(evaluation(3, "And then?", QuestionCategory::Followup)),
            Ok(evaluation(3, "Can you clarify?", QuestionCategory::Clarification)),
            Ok(evaluation(3, "What else?", QuestionCategory::Followup)),
            Ok(evaluation(3, "Still more?", QuestionCategory::Followup)),
        ]));
        let mut interview = interview_with(evaluator.clone(), transcriber(), true);
        started(&mut interview).await;

        for _ in 0..4 {
            interview.submit_answer(&voiced_answer()).await.unwrap();
            interview.speech_delivered().unwrap();
        }
        let last = interview.submit_answer(&voiced_answer()).await.unwrap();

        let answers = evaluator.answers();
        assert_eq!(answers[3].followup_count, 3);
        assert!(!answers[3].force_new_topic);
        assert_eq!(answers[4].followup_count, 4);
        assert!(answers[4].force_new_topic);
        assert_eq!(
            asked(&last),
            Some(("Still more?", Some(QuestionCategory::Technical), 6))
        );
        assert_eq!(answers[4].stats.signal, SignalQuality::Moderate);
    }

    #[tokio::test]
    async fn test_consent_granted_asks_opening_question() {
        let evaluator = Arc::new(ScriptedEvaluator::new());
        let mut interview = interview_with(evaluator, Arc::new(FixedTranscriber::new("Yes, sure.")), false);

        let commands = interview.start().await.unwrap();
        match &commands[0] {
            Command::Ask {
                text,
                speech,
                category,
                question_number,
            } => {
                assert_eq!(text, "Shall we start?");
                assert!(speech.ends_with("Shall we start?"));
                assert_eq!(*category, None);
                assert_eq!(*question_number, 0);
            }
            other => panic!("unexpected command {other:?}"),
        }
        interview.speech_delivered().unwrap();

        let commands = interview.submit_answer(&voiced_answer()).await.unwrap();
        assert_eq!(
            asked(&commands),
            Some(("Tell me about yourself", Some(QuestionCategory::Intro), 1))
        );
        assert!(interview.session().consent);
        assert_eq!(interview.session().question_count(), 0);
    }

    #[tokio::test]
    async fn test_consent_denied_declines_without_evaluation() {
        let evaluator = Arc::new(ScriptedEvaluator::new());
        let mut interview = interview_with(
            evaluator.clone(),
            Arc::new(FixedTranscriber::new("No.")),
            false,
        );
        started(&mut interview).await;

        let commands = interview.submit_answer(&voiced_answer()).await.unwrap();
        let report = concluded(&commands).unwrap();
        assert_eq!(report.status, SessionStatus::Declined);
        assert_eq!(report.end_reason, EndReason::ConsentDeclined);
        assert!(report.evaluation.is_none());
        assert_eq!(evaluator.final_calls(), 0);
    }

    #[tokio::test]
    async fn test_unclear_consent_reasked_then_declined() {
        let evaluator = Arc::new(ScriptedEvaluator::new());
        let mut interview = interview_with(
            evaluator,
            Arc::new(FixedTranscriber::new("Hmm, what was the question again, sorry?")),
            false,
        );
        started(&mut interview).await;

        for _ in 0..2 {
            let commands = interview.submit_answer(&voiced_answer()).await.unwrap();
            assert_eq!(asked(&commands), Some(("Shall we start?", None, 0)));
            interview.speech_delivered().unwrap();
        }
        let commands = interview.submit_answer(&voiced_answer()).await.unwrap();
        assert_eq!(
            concluded(&commands).map(|r| r.status),
            Some(SessionStatus::Declined)
        );
    }

    #[tokio::test]
    async fn test_consent_uses_collaborator_for_long_replies() {
        let evaluator = Arc::new(ScriptedEvaluator::new().with_consent(vec![Consent::Granted]));
        let mut interview = interview_with(
            evaluator,
            Arc::new(FixedTranscriber::new("I think I am about as ready as I will ever be")),
            false,
        );
        started(&mut interview).await;

        let commands = interview.submit_answer(&voiced_answer()).await.unwrap();
        assert_eq!(asked(&commands).map(|a| a.2), Some(1));
    }

    #[tokio::test]
    async fn test_abandoned_turns_end_interview() {
        let evaluator = Arc::new(ScriptedEvaluator::new());
        let mut interview = interview_with(evaluator.clone(), transcriber(), true);
        started(&mut interview).await;

        let commands = interview.answer_timed_out().await.unwrap();
        assert!(asked(&commands).is_some());
        assert_eq!(evaluator.answers()[0].transcript, "");
        assert_eq!(interview.session().scores().collect::<Vec<_>>(), vec![1]);

        interview.speech_delivered().unwrap();
        let commands = interview.answer_timed_out().await.unwrap();
        let report = concluded(&commands).unwrap();
        assert_eq!(report.end_reason, EndReason::Abandoned);
        assert_eq!(report.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_silence_before_consent_declines() {
        let evaluator = Arc::new(ScriptedEvaluator::new());
        let mut interview = interview_with(evaluator.clone(), transcriber(), false);
        started(&mut interview).await;

        let commands = interview.answer_timed_out().await.unwrap();
        let report = concluded(&commands).unwrap();
        assert_eq!(report.status, SessionStatus::Declined);
        assert_eq!(report.end_reason, EndReason::ConsentDeclined);
        assert!(report.evaluation.is_none());
        assert_eq!(evaluator.final_calls(), 0);
        assert!(evaluator.answers().is_empty());
        assert_eq!(interview.state(), DialogueState::Closed);
    }

    #[tokio::test]
    async fn test_answer_resets_abandoned_streak() {
        let evaluator = Arc::new(ScriptedEvaluator::new());
        let mut interview = interview_with(evaluator, transcriber(), true);
        started(&mut interview).await;

        interview.answer_timed_out().await.unwrap();
        interview.speech_delivered().unwrap();
        interview.submit_answer(&voiced_answer()).await.unwrap();
        interview.speech_delivered().unwrap();
        let commands = interview.answer_timed_out().await.unwrap();
        assert!(concluded(&commands).is_none());
    }

    #[tokio::test]
    async fn test_undecodable_audio_reports_error_and_continues() {
        let evaluator = Arc::new(ScriptedEvaluator::new());
        let mut interview = interview_with(evaluator.clone(), transcriber(), true);
        started(&mut interview).await;

        let mut payload = voiced_answer();
        payload.audio = "not base64!".to_string();
        let commands = interview.submit_answer(&payload).await.unwrap();
        assert!(matches!(commands[0], Command::Error(_)));
        assert_eq!(evaluator.answers()[0].transcript, "[inaudible]");
        assert!(asked(&commands).is_some());
    }

    #[tokio::test]
    async fn test_evaluator_sees_topic_coverage_and_elapsed_time() {
        use crate::session::ResumeContext;

        let evaluator = Arc::new(ScriptedEvaluator::new().with_evaluations(vec![
            Ok(evaluation(4, "Which Kafka settings did you tune?", QuestionCategory::Followup)),
            Ok(evaluation(4, "Next.", QuestionCategory::Technical)),
        ]));
        let mut context = context();
        context.resume = Some(ResumeContext {
            skills: vec!["Kafka".to_string(), "Rust".to_string()],
            projects: vec!["Billing System".to_string()],
            ..ResumeContext::default()
        });
        let mut interview = Interview::new(config(), context, true, transcriber(), evaluator.clone());
        started(&mut interview).await;

        // The transcript mentions the billing system.
        interview.submit_answer(&voiced_answer()).await.unwrap();
        interview.speech_delivered().unwrap();
        // The question mentions Kafka.
        interview.submit_answer(&voiced_answer()).await.unwrap();

        let answers = evaluator.answers();
        assert_eq!(answers[0].coverage.covered, vec!["projects: Billing System"]);
        assert_eq!(
            answers[0].coverage.uncovered,
            vec!["skills: Kafka", "skills: Rust"]
        );
        assert!(answers[0].coverage.dimensions.projects);
        assert!(!answers[0].coverage.dimensions.skills);

        assert_eq!(
            answers[1].coverage.covered,
            vec!["projects: Billing System", "skills: Kafka"]
        );
        assert_eq!(answers[1].coverage.uncovered, vec!["skills: Rust"]);
        assert!(answers[1].elapsed >= answers[0].elapsed);
        assert!(answers[1].elapsed < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_replayed_history_matches_running_ledger() {
        let scores = [4, 2, 5, 2, 3];
        let script = scores
            .iter()
            .map(|s| Ok(evaluation(*s, "Go on.", QuestionCategory::Technical)))
            .collect();
        let evaluator = Arc::new(ScriptedEvaluator::new().with_evaluations(script));
        let mut interview = interview_with(evaluator, transcriber(), true);
        started(&mut interview).await;
        for _ in 0..scores.len() {
            interview.submit_answer(&voiced_answer()).await.unwrap();
            interview.speech_delivered().unwrap();
        }

        let policy = PolicyConfig::default();
        let replayed = ScoreLedger::from_scores(interview.session().scores(), &policy);
        assert_eq!(&replayed, interview.ledger());
        assert_abs_diff_eq!(replayed.average(), 16.0 / 5.0, epsilon = 1e-9);
        assert_eq!(
            decide(&policy, interview.session().question_count(), &replayed, false),
            Decision::Continue
        );
    }
}
