//! Drives full interviews over a real WebSocket against the axum router,
//! with offline collaborators.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt, stream};
use interview_api::{
    router::create_router,
    state::AppState,
    ws::speech::{SpeechError, SpeechStream, SpeechSynthesizer, TextOnly},
};
use interview_core::{
    audio::AnswerPayload,
    interview::InterviewConfig,
    mock::{FixedTranscriber, ScriptedEvaluator, evaluation},
    protocol::{ClientMessage, SpeechFormat},
    session::QuestionCategory,
    vad::VadConfig,
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug)]
enum Event {
    Text(Value),
    Audio(usize),
    Closed,
}

/// Emits two chunks per question, then stalls.
struct StallingSpeech;

#[async_trait]
impl SpeechSynthesizer for StallingSpeech {
    async fn synthesize(
        &self,
        _text: &str,
        format: SpeechFormat,
    ) -> Result<Option<SpeechStream>, SpeechError> {
        assert_eq!(format, SpeechFormat::Pcm16k);
        let chunks = vec![
            Ok(Bytes::from_static(&[1, 2, 3, 4])),
            Ok(Bytes::from_static(&[5, 6])),
        ];
        Ok(Some(Box::pin(stream::iter(chunks).chain(stream::pending()))))
    }
}

/// Streams 64 KiB of speech every 10 ms without end.
struct EndlessSpeech;

#[async_trait]
impl SpeechSynthesizer for EndlessSpeech {
    async fn synthesize(
        &self,
        _text: &str,
        _format: SpeechFormat,
    ) -> Result<Option<SpeechStream>, SpeechError> {
        let chunks = stream::unfold((), |()| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Some((Ok::<_, SpeechError>(Bytes::from(vec![0u8; 64 * 1024])), ()))
        });
        Ok(Some(Box::pin(chunks)))
    }
}

/// Always fails to synthesize.
struct BrokenSpeech;

#[async_trait]
impl SpeechSynthesizer for BrokenSpeech {
    async fn synthesize(
        &self,
        _text: &str,
        _format: SpeechFormat,
    ) -> Result<Option<SpeechStream>, SpeechError> {
        Err(SpeechError::Status {
            status: 401,
            body: "invalid api key".to_string(),
        })
    }
}

fn app_state(evaluator: ScriptedEvaluator, synthesizer: Arc<dyn SpeechSynthesizer>) -> AppState {
    shared_app_state(Arc::new(evaluator), synthesizer)
}

fn shared_app_state(
    evaluator: Arc<ScriptedEvaluator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
) -> AppState {
    AppState {
        transcriber: Arc::new(FixedTranscriber::default()),
        evaluator,
        synthesizer,
        interview_config: InterviewConfig {
            retry_backoff: Duration::from_millis(1),
            ..InterviewConfig::default()
        },
        vad_config: VadConfig::default(),
        answer_timeout: Duration::from_secs(30),
        speech_quiescence: Duration::from_millis(50),
    }
}

async fn serve(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(Arc::new(state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    client
}

async fn send(client: &mut Client, msg: Value) {
    client.send(Message::text(msg.to_string())).await.unwrap();
}

async fn answer(client: &mut Client) {
    let payload = AnswerPayload::from_samples(&vec![0.1; 16_000], 16_000, 1).unwrap();
    let msg = serde_json::to_string(&ClientMessage::Answer(payload)).unwrap();
    client.send(Message::text(msg)).await.unwrap();
}

async fn next_event(client: &mut Client) -> Event {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("server went quiet");
        match msg {
            Some(Ok(Message::Text(text))) => {
                return Event::Text(serde_json::from_str(text.as_str()).unwrap());
            }
            Some(Ok(Message::Binary(data))) => return Event::Audio(data.len()),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return Event::Closed,
            Some(Ok(_)) => continue,
        }
    }
}

async fn next_text(client: &mut Client) -> Value {
    match next_event(client).await {
        Event::Text(value) => value,
        other => panic!("expected a text message, got {other:?}"),
    }
}

/// Reads text messages until the channel closes, returning them in order.
async fn drain(client: &mut Client) -> Vec<Value> {
    let mut messages = Vec::new();
    loop {
        match next_event(client).await {
            Event::Text(value) => messages.push(value),
            Event::Audio(_) => {}
            Event::Closed => return messages,
        }
    }
}

#[tokio::test]
async fn test_interview_ends_early_on_strong_signal() {
    let evaluator = ScriptedEvaluator::new().with_evaluations(vec![
        Ok(evaluation(5, "Describe a system you scaled.", QuestionCategory::Technical)),
        Ok(evaluation(4, "How did you measure it?", QuestionCategory::Followup)),
        Ok(evaluation(5, "Tell me about a conflict.", QuestionCategory::Behavioral)),
        Ok(evaluation(4, "What would you change?", QuestionCategory::Followup)),
    ]);
    let addr = serve(app_state(evaluator, Arc::new(TextOnly))).await;
    let mut client = connect(addr).await;

    send(
        &mut client,
        json!({"type": "start", "role": "Backend Engineer", "level": "senior", "candidate_name": "Sam", "consent": true}),
    )
    .await;

    let first = next_text(&mut client).await;
    assert_eq!(first["type"], "question_text");
    assert_eq!(first["question_number"], 1);
    assert_eq!(first["category"], "intro");
    assert_eq!(next_text(&mut client).await["type"], "ready_to_listen");

    for number in 1..=3 {
        answer(&mut client).await;
        let result = next_text(&mut client).await;
        assert_eq!(result["type"], "turn_result");
        assert_eq!(result["question_number"], number);
        let question = next_text(&mut client).await;
        assert_eq!(question["type"], "question_text");
        assert_eq!(question["question_number"], number + 1);
        assert_eq!(next_text(&mut client).await["type"], "ready_to_listen");
    }

    answer(&mut client).await;
    let tail = drain(&mut client).await;
    let types: Vec<&str> = tail.iter().map(|m| m["type"].as_str().unwrap()).collect();
    assert_eq!(types, vec!["turn_result", "summary", "json_report", "done"]);

    let report = &tail[2]["report"];
    assert_eq!(report["status"], "completed");
    assert_eq!(report["end_reason"], "strong_signal");
    assert_eq!(report["candidate"], "Sam");
    assert_eq!(report["question_count"], 4);
    assert_eq!(report["average_score"], 4.5);
    assert_eq!(report["questions"].as_array().unwrap().len(), 4);
    assert!(report["evaluation"]["recommendation"].is_string());
    assert_eq!(tail[3]["status"], "completed");
}

#[tokio::test]
async fn test_speech_frames_precede_ready_to_listen() {
    let addr = serve(app_state(ScriptedEvaluator::new(), Arc::new(StallingSpeech))).await;
    let mut client = connect(addr).await;

    send(
        &mut client,
        json!({"type": "start", "role": "SRE", "level": "mid", "consent": true, "speech_format": "pcm_16000"}),
    )
    .await;

    assert!(matches!(next_event(&mut client).await, Event::Text(v) if v["type"] == "question_text"));
    assert!(matches!(next_event(&mut client).await, Event::Audio(4)));
    assert!(matches!(next_event(&mut client).await, Event::Audio(2)));
    // The stalled stream is abandoned after the quiescence window.
    assert_eq!(next_text(&mut client).await["type"], "ready_to_listen");
}

#[tokio::test]
async fn test_client_vanishing_mid_speech_still_gets_final_evaluation() {
    let evaluator = Arc::new(ScriptedEvaluator::new());
    let addr = serve(shared_app_state(evaluator.clone(), Arc::new(EndlessSpeech))).await;
    let mut client = connect(addr).await;

    send(
        &mut client,
        json!({"type": "start", "role": "SRE", "level": "mid", "consent": true}),
    )
    .await;
    assert!(matches!(next_event(&mut client).await, Event::Text(v) if v["type"] == "question_text"));
    for _ in 0..3 {
        assert!(matches!(next_event(&mut client).await, Event::Audio(65_536)));
    }

    // Gone without a close frame; the next speech frame fails to send.
    drop(client);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while evaluator.final_calls() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(evaluator.final_calls(), 1);
}

#[tokio::test]
async fn test_synthesis_failure_falls_back_to_text() {
    let addr = serve(app_state(ScriptedEvaluator::new(), Arc::new(BrokenSpeech))).await;
    let mut client = connect(addr).await;

    send(
        &mut client,
        json!({"type": "start", "role": "SRE", "level": "mid", "consent": true}),
    )
    .await;

    assert_eq!(next_text(&mut client).await["type"], "question_text");
    assert_eq!(next_text(&mut client).await["type"], "ready_to_listen");
}

#[tokio::test]
async fn test_declined_consent_ends_without_evaluation() {
    let addr = serve(app_state(ScriptedEvaluator::new(), Arc::new(TextOnly))).await;
    let mut client = connect(addr).await;

    send(
        &mut client,
        json!({"type": "start", "role": "SRE", "level": "junior"}),
    )
    .await;

    let prompt = next_text(&mut client).await;
    assert_eq!(prompt["type"], "question_text");
    assert_eq!(prompt["question_number"], 0);
    assert!(prompt["category"].is_null());
    assert_eq!(next_text(&mut client).await["type"], "ready_to_listen");

    // The fixed transcript is neither yes nor no, and the scripted evaluator
    // reads every reply as unclear, so the prompt is re-asked twice.
    for _ in 0..2 {
        answer(&mut client).await;
        let reask = next_text(&mut client).await;
        assert_eq!(reask["type"], "question_text");
        assert_eq!(reask["question_number"], 0);
        assert_eq!(next_text(&mut client).await["type"], "ready_to_listen");
    }
    answer(&mut client).await;

    let tail = drain(&mut client).await;
    let report = tail
        .iter()
        .find(|m| m["type"] == "json_report")
        .expect("report")["report"]
        .clone();
    assert_eq!(report["status"], "declined");
    assert!(report.get("evaluation").is_none());
    assert_eq!(tail.last().unwrap()["status"], "declined");
}

#[tokio::test]
async fn test_unanswered_questions_abandon_the_interview() {
    let mut state = app_state(ScriptedEvaluator::new(), Arc::new(TextOnly));
    state.answer_timeout = Duration::from_millis(100);
    let addr = serve(state).await;
    let mut client = connect(addr).await;

    send(
        &mut client,
        json!({"type": "start", "role": "SRE", "level": "mid", "consent": true}),
    )
    .await;

    let messages = drain(&mut client).await;
    let report = messages
        .iter()
        .find(|m| m["type"] == "json_report")
        .expect("report")["report"]
        .clone();
    assert_eq!(report["end_reason"], "abandoned");
    assert_eq!(report["status"], "completed");
    assert_eq!(messages.last().unwrap()["type"], "done");
}

#[tokio::test]
async fn test_first_message_must_be_start() {
    let addr = serve(app_state(ScriptedEvaluator::new(), Arc::new(TextOnly))).await;
    let mut client = connect(addr).await;

    answer(&mut client).await;
    let error = next_text(&mut client).await;
    assert_eq!(error["type"], "error");
    assert!(error["message"].as_str().unwrap().contains("start"));
    assert!(matches!(next_event(&mut client).await, Event::Closed));
}

#[tokio::test]
async fn test_malformed_message_is_reported_and_session_continues() {
    let addr = serve(app_state(ScriptedEvaluator::new(), Arc::new(TextOnly))).await;
    let mut client = connect(addr).await;

    send(
        &mut client,
        json!({"type": "start", "role": "SRE", "level": "mid", "consent": true}),
    )
    .await;
    assert_eq!(next_text(&mut client).await["type"], "question_text");
    assert_eq!(next_text(&mut client).await["type"], "ready_to_listen");

    client.send(Message::text("{\"type\":\"pause\"}")).await.unwrap();
    let error = next_text(&mut client).await;
    assert_eq!(error["type"], "error");

    answer(&mut client).await;
    assert_eq!(next_text(&mut client).await["type"], "turn_result");
}
