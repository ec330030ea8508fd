//! Speech synthesis against a VOICEVOX engine.
//!
//! Synthesis is a two-phase protocol: `POST /audio_query` turns text into a
//! query document, the caller patches its `speedScale`, and
//! `POST /synthesis` renders the patched query to WAV bytes. Each phase is
//! bounded by the client timeout so a stalled engine cannot wedge a session
//! queue.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use yomiage_types::{Speaker, SpeechRequest};

/// Maximum text input size for synthesis (64 KiB).
pub const MAX_SYNTHESIS_TEXT_BYTES: usize = 64 * 1024;

/// Default bound on each HTTP round trip to the engine.
pub const DEFAULT_SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(30);

/// Turns speech requests into encoded audio.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<Vec<u8>, SynthesisError>;

    /// Lists the voices the engine offers.
    async fn speakers(&self) -> Result<Vec<Speaker>, SynthesisError>;
}

/// Which engine call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisStage {
    AudioQuery,
    Synthesis,
    Speakers,
}

impl SynthesisStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AudioQuery => "audio_query",
            Self::Synthesis => "synthesis",
            Self::Speakers => "speakers",
        }
    }
}

impl fmt::Display for SynthesisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SynthesisCause {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("engine returned status {0}")]
    Status(StatusCode),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("text exceeds maximum size: {len} bytes (limit: {limit} bytes)")]
    TextTooLong { len: usize, limit: usize },
}

/// A failed engine call. The session worker logs it and drops the request.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {cause}")]
pub struct SynthesisError {
    pub stage: SynthesisStage,
    #[source]
    pub cause: SynthesisCause,
}

impl SynthesisError {
    pub fn new(stage: SynthesisStage, cause: impl Into<SynthesisCause>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }
}

/// HTTP client for a VOICEVOX-compatible engine.
#[derive(Debug, Clone)]
pub struct VoicevoxClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl VoicevoxClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self::with_http(reqwest::Client::new(), base_url, timeout)
    }

    pub fn with_http(http: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Phase 1: asks the engine for an audio query document.
    pub async fn audio_query(&self, text: &str, speaker_id: u32) -> Result<Value, SynthesisError> {
        let stage = SynthesisStage::AudioQuery;
        if text.len() > MAX_SYNTHESIS_TEXT_BYTES {
            return Err(SynthesisError::new(
                stage,
                SynthesisCause::TextTooLong {
                    len: text.len(),
                    limit: MAX_SYNTHESIS_TEXT_BYTES,
                },
            ));
        }

        let request = self
            .http
            .post(format!("{}/audio_query", self.base_url))
            .query(&[("text", text.to_string()), ("speaker", speaker_id.to_string())]);

        let response = self.send(stage, request).await?;
        let query: Value = self
            .bounded(stage, response.json())
            .await?
            .map_err(|e| SynthesisError::new(stage, SynthesisCause::Malformed(e.to_string())))?;

        if !query.is_object() {
            return Err(SynthesisError::new(
                stage,
                SynthesisCause::Malformed("audio query is not a JSON object".to_string()),
            ));
        }
        Ok(query)
    }

    /// Phase 2: renders a (speed-patched) query to audio bytes.
    pub async fn render(&self, query: &Value, speaker_id: u32) -> Result<Vec<u8>, SynthesisError> {
        let stage = SynthesisStage::Synthesis;
        let request = self
            .http
            .post(format!("{}/synthesis", self.base_url))
            .query(&[("speaker", speaker_id.to_string())])
            .json(query);

        let response = self.send(stage, request).await?;
        let audio = self
            .bounded(stage, response.bytes())
            .await?
            .map_err(|e| SynthesisError::new(stage, e))?;

        if audio.is_empty() {
            return Err(SynthesisError::new(
                stage,
                SynthesisCause::Malformed("empty audio body".to_string()),
            ));
        }
        Ok(audio.to_vec())
    }

    async fn send(
        &self,
        stage: SynthesisStage,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, SynthesisError> {
        let response = self
            .bounded(stage, request.send())
            .await?
            .map_err(|e| SynthesisError::new(stage, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SynthesisError::new(stage, SynthesisCause::Status(status)));
        }
        Ok(response)
    }

    async fn bounded<T>(
        &self,
        stage: SynthesisStage,
        fut: impl std::future::Future<Output = T>,
    ) -> Result<T, SynthesisError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| SynthesisError::new(stage, SynthesisCause::Timeout(self.timeout)))
    }
}

/// Sets the query's speech rate.
pub fn patch_speed(query: &mut Value, speed: f64) -> Result<(), SynthesisCause> {
    let object = query
        .as_object_mut()
        .ok_or_else(|| SynthesisCause::Malformed("audio query is not a JSON object".to_string()))?;
    object.insert("speedScale".to_string(), Value::from(speed));
    Ok(())
}

#[async_trait]
impl Synthesizer for VoicevoxClient {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<Vec<u8>, SynthesisError> {
        let mut query = self.audio_query(&request.text, request.speaker_id).await?;
        patch_speed(&mut query, request.speed)
            .map_err(|cause| SynthesisError::new(SynthesisStage::AudioQuery, cause))?;
        let audio = self.render(&query, request.speaker_id).await?;

        tracing::debug!(
            speaker_id = request.speaker_id,
            speed = request.speed,
            bytes = audio.len(),
            "synthesized speech"
        );
        Ok(audio)
    }

    async fn speakers(&self) -> Result<Vec<Speaker>, SynthesisError> {
        let stage = SynthesisStage::Speakers;
        let request = self.http.get(format!("{}/speakers", self.base_url));
        let response = self.send(stage, request).await?;
        self.bounded(stage, response.json::<Vec<Speaker>>())
            .await?
            .map_err(|e| SynthesisError::new(stage, SynthesisCause::Malformed(e.to_string())))
    }
}
