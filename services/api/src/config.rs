use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where transcription and evaluation requests are sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backend {
    OpenAI,
    /// Deterministic offline collaborators; no API key needed.
    Mock,
}

/// ElevenLabs credentials and voice settings.
#[derive(Clone, Debug, PartialEq)]
pub struct SpeechConfig {
    pub api_key: String,
    pub voice_id: String,
    pub stability: f32,
    pub similarity: f32,
    /// `optimize_streaming_latency`, 0-4.
    pub latency: u8,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub backend: Backend,
    pub openai_api_key: Option<String>,
    pub chat_model: String,
    pub transcription_model: String,
    /// `None` runs the server text-only.
    pub speech: Option<SpeechConfig>,
    pub answer_timeout: Duration,
    pub max_questions: u32,
    pub log_level: Level,
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let backend_str =
            std::env::var("INTERVIEW_BACKEND").unwrap_or_else(|_| "openai".to_string());
        let backend = match backend_str.to_lowercase().as_str() {
            "openai" => Backend::OpenAI,
            "mock" => Backend::Mock,
            other => {
                return Err(ConfigError::InvalidValue(
                    "INTERVIEW_BACKEND".to_string(),
                    format!("'{other}' is not one of openai, mock"),
                ));
            }
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        if backend == Backend::OpenAI && openai_api_key.is_none() {
            return Err(ConfigError::MissingVar(
                "OPENAI_API_KEY must be set for the 'openai' backend".to_string(),
            ));
        }

        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let transcription_model =
            std::env::var("TRANSCRIPTION_MODEL").unwrap_or_else(|_| "whisper-1".to_string());

        let speech = match (
            std::env::var("ELEVEN_API_KEY").ok(),
            std::env::var("ELEVEN_VOICE_ID").ok(),
        ) {
            (Some(api_key), Some(voice_id)) => {
                let latency = parse_var("ELEVEN_TTS_LATENCY", 2u8)?;
                if latency > 4 {
                    return Err(ConfigError::InvalidValue(
                        "ELEVEN_TTS_LATENCY".to_string(),
                        format!("{latency} is outside 0-4"),
                    ));
                }
                Some(SpeechConfig {
                    api_key,
                    voice_id,
                    stability: parse_var("ELEVEN_TTS_STABILITY", 0.45)?,
                    similarity: parse_var("ELEVEN_TTS_SIMILARITY", 0.8)?,
                    latency,
                })
            }
            _ => None,
        };

        let answer_timeout = Duration::from_secs(parse_var("ANSWER_TIMEOUT_SECS", 360u64)?);
        let max_questions = parse_var("MAX_QUESTIONS", 12u32)?;
        if max_questions == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_QUESTIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            backend,
            openai_api_key,
            chat_model,
            transcription_model,
            speech,
            answer_timeout,
            max_questions,
            log_level,
        })
    }
}
