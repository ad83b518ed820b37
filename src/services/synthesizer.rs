//! Text-to-speech

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::types::SynthesizedSpeech;
use crate::{Error, Result};

/// Renders text to audio
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text`, optionally with a specific voice
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<SynthesizedSpeech>;
}

/// `OpenAI` speech synthesis
pub struct OpenAiSynthesizer {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    voice: String,
    speed: f32,
    base_url: String,
}

impl OpenAiSynthesizer {
    /// Create a synthesizer
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: SecretString, model: String, voice: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            voice,
            speed: 1.0,
            base_url: "https://api.openai.com/v1".to_string(),
        })
    }

    /// Playback speed multiplier
    #[must_use]
    pub const fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    /// Use an OpenAI-compatible endpoint instead of the public API
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Synthesizer for OpenAiSynthesizer {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<SynthesizedSpeech> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: voice.unwrap_or(&self.voice),
            speed: self.speed,
            response_format: "mp3",
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        tracing::debug!(bytes = audio.len(), voice = request.voice, "speech synthesized");
        Ok(SynthesizedSpeech::encode(&audio, "audio/mpeg"))
    }
}
