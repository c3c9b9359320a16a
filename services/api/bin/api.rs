//! Main Entrypoint for the Interview API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Building the transcription, evaluation and speech collaborators.
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use interview_api::{
    config::{Backend, Config},
    router::create_router,
    state::AppState,
    ws::speech::{
        DEFAULT_SPEECH_QUIESCENCE, ElevenLabsSynthesizer, SpeechSynthesizer, TextOnly,
    },
};
use interview_core::{
    collaborator::{InterviewEvaluator, Transcriber},
    interview::InterviewConfig,
    llm_client::{OpenAIEvaluator, OpenAITranscriber},
    mock::{BankEvaluator, FixedTranscriber},
    vad::VadConfig,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Collaborators ---
    let (transcriber, evaluator): (Arc<dyn Transcriber>, Arc<dyn InterviewEvaluator>) =
        match &config.backend {
            Backend::OpenAI => {
                info!("Using OpenAI backend.");
                let api_key = config
                    .openai_api_key
                    .as_ref()
                    .context("OPENAI_API_KEY is required for the openai backend")?;
                let openai_config = OpenAIConfig::new()
                    .with_api_key(api_key)
                    .with_api_base("https://api.openai.com/v1");
                (
                    Arc::new(OpenAITranscriber::new(
                        openai_config.clone(),
                        config.transcription_model.clone(),
                    )),
                    Arc::new(OpenAIEvaluator::new(
                        openai_config,
                        config.chat_model.clone(),
                    )),
                )
            }
            Backend::Mock => {
                warn!("Using mock backend; answers are scored offline.");
                (
                    Arc::new(FixedTranscriber::default()),
                    Arc::new(BankEvaluator),
                )
            }
        };

    let synthesizer: Arc<dyn SpeechSynthesizer> = match &config.speech {
        Some(speech) => {
            info!(voice_id = %speech.voice_id, "Speech synthesis enabled.");
            Arc::new(
                ElevenLabsSynthesizer::new(speech.clone())
                    .context("Failed to build the speech client")?,
            )
        }
        None => {
            info!("No speech provider configured; questions are sent as text only.");
            Arc::new(TextOnly)
        }
    };

    let mut interview_config = InterviewConfig::default();
    interview_config.policy.max_questions = config.max_questions;

    let app_state = Arc::new(AppState {
        transcriber,
        evaluator,
        synthesizer,
        interview_config,
        vad_config: VadConfig::default(),
        answer_timeout: config.answer_timeout,
        speech_quiescence: DEFAULT_SPEECH_QUIESCENCE,
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        backend = ?config.backend,
        model = %config.chat_model,
        max_questions = config.max_questions,
        answer_timeout_secs = config.answer_timeout.as_secs(),
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
