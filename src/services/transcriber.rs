//! Speech-to-text

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::types::TranscriptionResult;
use crate::voice::AudioPayload;
use crate::{Error, Result};

/// Reason reported when a transcription contains no words
pub const NO_SPEECH_RECOGNIZED: &str = "no speech recognized";

/// Turns recorded audio into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `audio` spoken in `language`
    ///
    /// An empty transcription is reported as an unsuccessful result, not an error.
    ///
    /// # Errors
    ///
    /// Returns error if the service cannot be reached or rejects the request
    async fn transcribe(&self, audio: &AudioPayload, language: &str)
    -> Result<TranscriptionResult>;
}

/// Response from the Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// `OpenAI` Whisper transcription
pub struct WhisperTranscriber {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl WhisperTranscriber {
    /// Create a transcriber against the `OpenAI` API
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: SecretString, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for Whisper".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: "https://api.openai.com/v1".to_string(),
        })
    }

    /// Use an OpenAI-compatible endpoint instead of the public API
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

/// ISO-639-1 part of a language tag (`es-MX` → `es`)
fn language_hint(language: &str) -> Option<&str> {
    language
        .split(['-', '_'])
        .next()
        .map(str::trim)
        .filter(|l| !l.is_empty())
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(
        &self,
        audio: &AudioPayload,
        language: &str,
    ) -> Result<TranscriptionResult> {
        tracing::debug!(audio_bytes = audio.bytes.len(), "starting Whisper transcription");

        let part = reqwest::multipart::Part::bytes(audio.bytes.clone())
            .file_name(audio.file_name())
            .mime_str(&audio.mime_type)
            .map_err(|e| Error::Stt(e.to_string()))?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        if let Some(hint) = language_hint(language) {
            form = form.text("language", hint.to_string());
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        let transcript = result.text.trim();
        if transcript.is_empty() {
            tracing::info!("transcription produced no text");
            return Ok(TranscriptionResult::failed(NO_SPEECH_RECOGNIZED));
        }

        tracing::info!(transcript = %transcript, "transcription complete");
        // Whisper does not report a confidence score
        Ok(TranscriptionResult::recognized(transcript, 1.0))
    }
}
