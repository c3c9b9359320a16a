//! Speech synthesis for spoken questions.
//!
//! Synthesized audio is streamed to the client as binary frames. A synthesis
//! failure never blocks the interview: the question still goes out as text.

use crate::config::SpeechConfig;
use anyhow::Result;
use async_trait::async_trait;
use axum::extract::ws::Message;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt, TryStreamExt};
use interview_core::protocol::SpeechFormat;
use serde::Serialize;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

const ELEVEN_BASE_URL: &str = "https://api.elevenlabs.io";
const ELEVEN_MODEL: &str = "eleven_turbo_v2";

/// Default wait for the next audio chunk before a stream counts as stalled.
pub const DEFAULT_SPEECH_QUIESCENCE: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("speech request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("speech provider returned {status}: {body}")]
    Status { status: u16, body: String },
}

pub type SpeechStream = Pin<Box<dyn Stream<Item = Result<Bytes, SpeechError>> + Send>>;

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Starts synthesizing `text`. `Ok(None)` means the server runs text-only.
    async fn synthesize(
        &self,
        text: &str,
        format: SpeechFormat,
    ) -> Result<Option<SpeechStream>, SpeechError>;
}

/// Used when no speech provider is configured.
pub struct TextOnly;

#[async_trait]
impl SpeechSynthesizer for TextOnly {
    async fn synthesize(
        &self,
        _text: &str,
        _format: SpeechFormat,
    ) -> Result<Option<SpeechStream>, SpeechError> {
        Ok(None)
    }
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

/// Streams speech from the ElevenLabs text-to-speech endpoint.
pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    config: SpeechConfig,
    base_url: String,
}

impl ElevenLabsSynthesizer {
    pub fn new(config: SpeechConfig) -> Result<Self, SpeechError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            config,
            base_url: ELEVEN_BASE_URL.to_string(),
        })
    }

    fn stream_url(&self, format: SpeechFormat) -> String {
        format!(
            "{}/v1/text-to-speech/{}/stream?optimize_streaming_latency={}&output_format={}",
            self.base_url,
            self.config.voice_id,
            self.config.latency,
            format.as_str()
        )
    }

    fn request_body<'a>(&self, text: &'a str) -> TtsRequest<'a> {
        TtsRequest {
            text,
            model_id: ELEVEN_MODEL,
            voice_settings: VoiceSettings {
                stability: self.config.stability,
                similarity_boost: self.config.similarity,
            },
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        format: SpeechFormat,
    ) -> Result<Option<SpeechStream>, SpeechError> {
        let response = self
            .client
            .post(self.stream_url(format))
            .header("xi-api-key", &self.config.api_key)
            .json(&self.request_body(text))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!(format = format.as_str(), "Speech stream opened");
        Ok(Some(Box::pin(response.bytes_stream().map_err(SpeechError::from))))
    }
}

/// Forwards a speech stream to `sink` as binary frames until it ends, fails,
/// or stays quiet for `quiescence`. Returns the number of bytes sent.
///
/// Only a failure to write to the sink is an error; provider problems end
/// the stream early and are logged.
pub async fn relay_speech<S>(
    mut stream: SpeechStream,
    sink: &mut S,
    quiescence: Duration,
) -> Result<usize>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let mut sent = 0;
    loop {
        match tokio::time::timeout(quiescence, stream.next()).await {
            Ok(Some(Ok(chunk))) => {
                if chunk.is_empty() {
                    continue;
                }
                sent += chunk.len();
                sink.send(Message::Binary(chunk)).await?;
            }
            Ok(Some(Err(e))) => {
                warn!(error = %e, bytes = sent, "Speech stream failed midway");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                warn!(
                    quiet_ms = quiescence.as_millis() as u64,
                    bytes = sent,
                    "Speech stream stalled; proceeding"
                );
                break;
            }
        }
    }
    Ok(sent)
}
