//! Manages the WebSocket connection lifecycle for one interview.
//!
//! The runtime here owns all I/O: it feeds client messages and timeouts into
//! the [`Interview`] state machine and executes the commands it returns.

use super::speech::relay_speech;
use crate::state::AppState;
use anyhow::{Context, Result, anyhow};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use interview_core::{
    Command,
    interview::{DialogueState, Interview},
    protocol::{ClientMessage, ServerMessage, SpeechFormat},
    report::FinalReport,
    session::SessionContext,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, instrument, warn};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// What the client asked for in its `start` message.
#[derive(Debug)]
struct StartRequest {
    context: SessionContext,
    consent: bool,
    speech_format: SpeechFormat,
}

/// Whether the runtime should keep reading client messages.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    /// `ready_to_listen` went out; the answer timeout starts now.
    Listening,
    Closed,
}

/// Main handler for an individual WebSocket connection.
///
/// Waits for the `start` message, then runs the interview to completion
/// inside an `interview` span.
#[instrument(name = "ws_session", skip_all, fields(connection_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id: u32 = rand::random();
    tracing::Span::current().record("connection_id", connection_id);
    info!("New WebSocket connection. Awaiting start...");

    let (mut socket_tx, mut socket_rx) = socket.split();

    // The first message from the client must be a `start` message.
    let start = match socket_rx.next().await {
        Some(Ok(Message::Text(text))) => parse_start(text.as_str()),
        Some(Ok(_)) => Err(anyhow!("First message was not a text `start` message.")),
        Some(Err(e)) => {
            warn!(error = %e, "Client connection failed before start.");
            return;
        }
        None => {
            info!("Client disconnected before sending start.");
            return;
        }
    };
    let start = match start {
        Ok(start) => start,
        Err(e) => {
            error!("Session start failed: {:?}", e);
            let _ = send_msg(
                &mut socket_tx,
                ServerMessage::Error {
                    message: format!("{e:#}"),
                },
            )
            .await;
            let _ = socket_tx.close().await;
            return;
        }
    };

    let mut interview = Interview::new(
        state.interview_config.clone(),
        start.context,
        start.consent,
        Arc::clone(&state.transcriber),
        Arc::clone(&state.evaluator),
    );
    let interview_span = tracing::info_span!(
        "interview",
        session_id = %interview.session().id,
        role = %interview.session().context.role,
    );
    async move {
        if let Err(e) = run_interview(
            &state,
            socket_tx,
            socket_rx,
            &mut interview,
            start.speech_format,
        )
        .await
        {
            error!(error = ?e, "Interview session terminated with error.");
            // Still owed a final evaluation unless the report already went out.
            cancel(&mut interview).await;
        }
        info!("Interview session finished.");
    }
    .instrument(interview_span)
    .await;
}

fn parse_start(text: &str) -> Result<StartRequest> {
    let msg: ClientMessage = serde_json::from_str(text).context("Invalid `start` message")?;
    let ClientMessage::Start {
        role,
        level,
        candidate_name,
        resume,
        consent,
        speech_format,
    } = msg
    else {
        return Err(anyhow!("First message must be `start`"));
    };
    if role.trim().is_empty() || level.trim().is_empty() {
        return Err(anyhow!("`role` and `level` must not be empty"));
    }
    Ok(StartRequest {
        context: SessionContext {
            role,
            level,
            candidate_name: candidate_name.filter(|name| !name.trim().is_empty()),
            resume,
        },
        consent,
        speech_format,
    })
}

/// Drives one interview from greeting to report.
async fn run_interview(
    state: &AppState,
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut socket_rx: SplitStream<WebSocket>,
    interview: &mut Interview,
    speech_format: SpeechFormat,
) -> Result<()> {
    let commands = interview.start().await?;
    let mut answer_deadline = match execute(state, &mut socket_tx, interview, commands, speech_format).await? {
        Flow::Closed => return Ok(()),
        Flow::Listening => Some(Instant::now() + state.answer_timeout),
        Flow::Continue => None,
    };

    loop {
        let awaiting = interview.state() == DialogueState::AwaitingAnswer;
        let deadline = answer_deadline.unwrap_or_else(|| Instant::now() + state.answer_timeout);

        let flow = tokio::select! {
            msg = socket_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(ClientMessage::Answer(payload)) => {
                            debug!(duration_ms = payload.duration_ms, "Answer received");
                            match interview.submit_answer(&payload).await {
                                Ok(commands) => {
                                    execute(state, &mut socket_tx, interview, commands, speech_format).await?
                                }
                                Err(e) => {
                                    warn!(error = %e, "Rejected answer");
                                    send_msg(&mut socket_tx, ServerMessage::Error { message: e.to_string() }).await?;
                                    Flow::Continue
                                }
                            }
                        }
                        Ok(ClientMessage::Start { .. }) => {
                            warn!("Ignoring repeated `start` message.");
                            send_msg(&mut socket_tx, ServerMessage::Error {
                                message: "interview already started".to_string(),
                            }).await?;
                            Flow::Continue
                        }
                        Err(e) => {
                            warn!(error = %e, "Unparseable client message");
                            send_msg(&mut socket_tx, ServerMessage::Error {
                                message: format!("invalid message: {e}"),
                            }).await?;
                            Flow::Continue
                        }
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!("Ignoring binary frame from client.");
                    Flow::Continue
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => Flow::Continue,
                Some(Ok(Message::Close(_))) | None => {
                    info!("Client closed the connection.");
                    cancel(interview).await;
                    Flow::Closed
                }
                Some(Err(e)) => {
                    error!("Error receiving from client WebSocket: {:?}", e);
                    cancel(interview).await;
                    Flow::Closed
                }
            },
            _ = tokio::time::sleep_until(deadline), if awaiting && answer_deadline.is_some() => {
                answer_deadline = None;
                let commands = interview.answer_timed_out().await?;
                execute(state, &mut socket_tx, interview, commands, speech_format).await?
            }
        };

        match flow {
            Flow::Closed => break,
            Flow::Listening => answer_deadline = Some(Instant::now() + state.answer_timeout),
            Flow::Continue => {}
        }
    }
    Ok(())
}

/// Ends an interview whose client went away. The partial report has nowhere
/// to go, so it is logged.
async fn cancel(interview: &mut Interview) {
    if let Some(report) = interview.cancel().await {
        match serde_json::to_string(&report) {
            Ok(json) => info!(report = %json, "Partial interview report"),
            Err(e) => warn!(error = %e, "Could not serialize partial report"),
        }
    }
}

/// Executes the state machine's commands in order.
async fn execute(
    state: &AppState,
    socket_tx: &mut SplitSink<WebSocket, Message>,
    interview: &mut Interview,
    commands: Vec<Command>,
    speech_format: SpeechFormat,
) -> Result<Flow> {
    let mut queue = VecDeque::from(commands);
    let mut flow = Flow::Continue;
    while let Some(command) = queue.pop_front() {
        match command {
            Command::Ask {
                text,
                speech,
                category,
                question_number,
            } => {
                info!(question_number, ?category, "Asking question");
                send_msg(
                    socket_tx,
                    ServerMessage::QuestionText {
                        text,
                        category,
                        question_number,
                    },
                )
                .await?;
                speak(state, socket_tx, &speech, speech_format).await?;
                queue.extend(interview.speech_delivered()?);
            }
            Command::ReadyToListen => {
                send_msg(socket_tx, ServerMessage::ReadyToListen).await?;
                flow = Flow::Listening;
            }
            Command::TurnResult(result) => {
                info!(
                    question_number = result.question_number,
                    score = result.score,
                    "Answer scored"
                );
                send_msg(socket_tx, ServerMessage::TurnResult(result)).await?;
            }
            Command::Conclude(report) => {
                deliver_report(socket_tx, report).await?;
                return Ok(Flow::Closed);
            }
            Command::Error(message) => {
                send_msg(socket_tx, ServerMessage::Error { message }).await?;
            }
        }
    }
    Ok(flow)
}

/// Streams the spoken form of a question. Synthesis problems leave the
/// question text-only.
async fn speak(
    state: &AppState,
    socket_tx: &mut SplitSink<WebSocket, Message>,
    speech: &str,
    format: SpeechFormat,
) -> Result<()> {
    match state.synthesizer.synthesize(speech, format).await {
        Ok(Some(stream)) => {
            let bytes = relay_speech(stream, socket_tx, state.speech_quiescence).await?;
            debug!(bytes, "Speech delivered");
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Speech synthesis failed; continuing text-only"),
    }
    Ok(())
}

async fn deliver_report(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    report: Box<FinalReport>,
) -> Result<()> {
    let status = report.status;
    info!(
        ?status,
        end_reason = ?report.end_reason,
        question_count = report.question_count,
        average_score = report.average_score,
        "Interview concluded"
    );
    send_msg(
        socket_tx,
        ServerMessage::Summary {
            text: report.summary.clone(),
        },
    )
    .await?;
    send_msg(socket_tx, ServerMessage::JsonReport { report }).await?;
    send_msg(socket_tx, ServerMessage::Done { status }).await?;
    socket_tx.close().await?;
    Ok(())
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
