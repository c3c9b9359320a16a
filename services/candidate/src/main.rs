//! Candidate-side client: plays each question, listens for the answer with
//! the VAD engine and submits it once the candidate stops talking.

mod audio_utils;
mod capture;
mod playback;

use anyhow::{Context, Result};
use capture::{MicCapture, MicEvent};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use interview_core::error::TransportError;
use interview_core::protocol::{ClientMessage, ServerMessage, SpeechFormat};
use interview_core::turn_taking::{ClientPhase, DEFAULT_QUIESCENCE, TurnTaker};
use interview_core::vad::VadConfig;
use playback::Playback;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;

/// How often stalled speech and playback draining are checked.
const TICK: Duration = Duration::from_millis(50);

/// Speech format requested from the server.
const SPEECH_FORMAT: SpeechFormat = SpeechFormat::Pcm24k;

const VAD_CONFIG_TIMEOUT: Duration = Duration::from_secs(5);

/// Take a spoken interview from the terminal.
#[derive(Parser, Debug)]
#[command(name = "candidate", version, about)]
struct Args {
    /// WebSocket endpoint of the interview server.
    #[arg(long, default_value = "ws://127.0.0.1:3000/ws")]
    server: String,

    /// Role being interviewed for.
    #[arg(long)]
    role: String,

    /// Seniority level.
    #[arg(long, default_value = "mid")]
    level: String,

    /// Name the interviewer addresses you by.
    #[arg(long)]
    name: Option<String>,

    /// Consent to the interview up front instead of answering the prompt.
    #[arg(long)]
    consent: bool,

    /// Baseline silence before an answer is considered finished.
    #[arg(long)]
    silence_floor_ms: Option<u64>,

    /// Amplitude a sample must exceed to count as speech.
    #[arg(long)]
    detection_threshold: Option<f32>,
}

impl Args {
    /// Applies the command-line overrides on top of `base`.
    fn vad_config(&self, base: VadConfig) -> VadConfig {
        let mut config = base;
        if let Some(ms) = self.silence_floor_ms {
            config.silence_floor = Duration::from_millis(ms);
        }
        if let Some(threshold) = self.detection_threshold {
            config.detection_threshold = threshold;
        }
        config
    }

    fn start_message(&self) -> ClientMessage {
        ClientMessage::Start {
            role: self.role.clone(),
            level: self.level.clone(),
            candidate_name: self.name.clone(),
            resume: None,
            consent: self.consent,
            speech_format: SPEECH_FORMAT,
        }
    }
}

/// The VAD parameters the server publishes at `/vad-config`. Durations are
/// in milliseconds.
#[derive(Debug, Deserialize)]
struct ServerVadConfig {
    sample_rate: u32,
    channels: u16,
    detection_threshold: f32,
    sustained_fraction: f32,
    arm_delay_ms: u64,
    pre_roll_ms: u64,
    min_pause_ms: u64,
    pause_history: usize,
    buffer_factor: f32,
    silence_floor_ms: u64,
    min_silence_ms: u64,
    max_silence_ms: u64,
    voiced_floor_ms: u64,
    min_answer_ms: u64,
    max_turn_ms: u64,
}

impl From<ServerVadConfig> for VadConfig {
    fn from(server: ServerVadConfig) -> Self {
        VadConfig {
            sample_rate: server.sample_rate,
            channels: server.channels,
            detection_threshold: server.detection_threshold,
            sustained_fraction: server.sustained_fraction,
            arm_delay: Duration::from_millis(server.arm_delay_ms),
            pre_roll: Duration::from_millis(server.pre_roll_ms),
            min_pause: Duration::from_millis(server.min_pause_ms),
            pause_history: server.pause_history,
            buffer_factor: server.buffer_factor,
            silence_floor: Duration::from_millis(server.silence_floor_ms),
            min_silence: Duration::from_millis(server.min_silence_ms),
            max_silence: Duration::from_millis(server.max_silence_ms),
            voiced_floor: Duration::from_millis(server.voiced_floor_ms),
            min_answer: Duration::from_millis(server.min_answer_ms),
            max_turn: Duration::from_millis(server.max_turn_ms),
        }
    }
}

/// Maps the WebSocket endpoint to the server's `/vad-config` URL.
fn vad_config_url(server: &str) -> Option<String> {
    let (scheme, rest) = server.split_once("://")?;
    let scheme = match scheme {
        "ws" => "http",
        "wss" => "https",
        _ => return None,
    };
    let host = rest.split('/').next().filter(|host| !host.is_empty())?;
    Some(format!("{scheme}://{host}/vad-config"))
}

async fn fetch_vad_config(url: &str) -> Result<VadConfig> {
    let client = reqwest::Client::builder()
        .timeout(VAD_CONFIG_TIMEOUT)
        .build()?;
    let server: ServerVadConfig = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(server.into())
}

/// The server's VAD parameters, or the built-in defaults if it cannot be
/// reached.
async fn server_vad_config(server: &str) -> VadConfig {
    let Some(url) = vad_config_url(server) else {
        warn!(server, "Cannot derive the VAD config URL; using defaults");
        return VadConfig::default();
    };
    match fetch_vad_config(&url).await {
        Ok(config) => {
            info!(%url, "Loaded VAD configuration from server");
            config
        }
        Err(e) => {
            warn!(%url, "Could not load VAD configuration ({e:#}); using defaults");
            VadConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let args = Args::parse();
    let vad = args.vad_config(server_vad_config(&args.server).await);

    let (mic_tx, mic_rx) = mpsc::channel(64);
    // 20 ms blocks.
    let block_len = (vad.sample_rate / 50) as usize;
    let capture = MicCapture::start(vad.sample_rate, block_len, mic_tx)
        .context("failed to open the microphone")?;
    let playback = Playback::start(
        SPEECH_FORMAT
            .pcm_sample_rate()
            .context("speech format is not raw PCM")?,
    )?;

    let result = run_session(&args, vad, playback, mic_rx).await;
    drop(capture);
    if let Err(e) = &result {
        error!("Interview ended with an error: {e:#}");
    }
    result
}

async fn run_session(
    args: &Args,
    vad: VadConfig,
    mut playback: Playback,
    mut mic_rx: mpsc::Receiver<MicEvent>,
) -> Result<()> {
    let (ws_stream, _) = connect_async(args.server.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    info!(server = %args.server, "Connected to interview server");

    let start = serde_json::to_string(&args.start_message())?;
    ws_tx
        .send(Message::text(start))
        .await
        .map_err(|e| TransportError::Send(e.to_string()))?;

    let mut turns = TurnTaker::new(vad, DEFAULT_QUIESCENCE);
    let mut tick = tokio::time::interval(TICK);

    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let server_msg: ServerMessage = serde_json::from_str(text.as_str())
                        .map_err(|e| TransportError::Decode(e.to_string()))?;
                    if !handle_server_message(server_msg, &mut turns, &mut playback) {
                        turns.on_close();
                        break;
                    }
                }
                Some(Ok(Message::Binary(frame))) => {
                    if turns.on_speech_chunk(Instant::now()) {
                        playback.append(&frame);
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("Server closed the connection");
                    turns.on_close();
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    turns.on_close();
                    return Err(TransportError::Decode(e.to_string()).into());
                }
            },
            Some(event) = mic_rx.recv() => match event {
                MicEvent::Block(block) => match turns.on_block(&block) {
                    Ok(Some(payload)) => {
                        let answer = serde_json::to_string(&ClientMessage::Answer(payload))?;
                        ws_tx
                            .send(Message::text(answer))
                            .await
                            .map_err(|e| TransportError::Send(e.to_string()))?;
                        println!("(answer sent, waiting for the interviewer)");
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "Dropped an answer that could not be encoded");
                        println!("(that answer was lost, please repeat it)");
                    }
                },
                MicEvent::Failed(e) => {
                    turns.on_close();
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return Err(e).context("microphone capture failed");
                }
            },
            _ = tick.tick() => {
                turns.check_quiescence(Instant::now());
                if turns.phase() == ClientPhase::AwaitingPlaybackComplete
                    && playback.is_drained()
                    && turns.on_playback_drained()
                {
                    println!("(listening...)");
                }
            }
        }
    }

    let _ = ws_tx.close().await;
    Ok(())
}

/// Applies one server message. Returns false once the interview is over.
fn handle_server_message(
    msg: ServerMessage,
    turns: &mut TurnTaker,
    playback: &mut Playback,
) -> bool {
    match msg {
        ServerMessage::QuestionText {
            text,
            question_number,
            ..
        } => {
            playback.clear();
            turns.on_question(Instant::now());
            if question_number == 0 {
                println!("\nInterviewer: {text}");
            } else {
                println!("\nQ{question_number}: {text}");
            }
        }
        ServerMessage::ReadyToListen => turns.on_speech_done(),
        ServerMessage::TurnResult(result) => {
            info!(
                question = result.question_number,
                category = %result.category,
                score = result.score,
                "Turn scored"
            );
        }
        ServerMessage::Summary { text } => println!("\n{text}"),
        ServerMessage::JsonReport { report } => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("\n{json}"),
            Err(e) => warn!("failed to render report: {e}"),
        },
        ServerMessage::Done { status } => {
            println!("\nInterview {status}.");
            return false;
        }
        ServerMessage::Error { message } => warn!("Server error: {message}"),
    }
    debug!(phase = turns.phase().as_str(), "client phase");
    true
}
