//! Generative fallback for queries without a confident intent

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::VertexConfig;
use crate::{Error, Result};

const SYSTEM_PROMPT: &str = "Eres Sof-IA, una asistente educativa de una billetera móvil. \
Responde en español, en un máximo de tres oraciones, con un tono amable y claro. \
Si la pregunta no trata sobre la billetera, el dinero o la seguridad de la cuenta, \
indica con cortesía que solo puedes ayudar con esos temas.";

/// Produces a free-form reply for an unmatched query
#[async_trait]
pub trait FallbackResponder: Send + Sync {
    /// Reply to `query`
    ///
    /// # Errors
    ///
    /// Returns error if the generation service fails
    async fn reply(&self, query: &str) -> Result<String>;
}

/// Fixed reply
#[derive(Debug, Clone)]
pub struct CannedFallback {
    reply: String,
}

impl CannedFallback {
    #[must_use]
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl FallbackResponder for CannedFallback {
    async fn reply(&self, _query: &str) -> Result<String> {
        Ok(self.reply.clone())
    }
}

/// Vertex AI `generateContent` client
pub struct VertexFallback {
    client: reqwest::Client,
    endpoint: String,
    access_token: SecretString,
    max_output_tokens: u32,
    max_reply_chars: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl VertexFallback {
    /// Create a client for the configured model
    #[must_use]
    pub fn new(config: &VertexConfig) -> Self {
        let endpoint = format!(
            "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{model}:generateContent",
            location = config.location,
            project = config.project_id,
            model = config.model,
        );

        Self {
            client: reqwest::Client::new(),
            endpoint,
            access_token: config.access_token.clone(),
            max_output_tokens: config.max_output_tokens,
            max_reply_chars: config.max_reply_chars,
        }
    }

    /// Use a different endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl FallbackResponder for VertexFallback {
    async fn reply(&self, query: &str) -> Result<String> {
        let request = GenerateRequest {
            system_instruction: Content {
                role: "system",
                parts: vec![Part {
                    text: SYSTEM_PROMPT,
                }],
            },
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: query }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.max_output_tokens,
                temperature: 0.4,
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.access_token.expose_secret())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Vertex AI error");
            return Err(Error::Intent(format!("Vertex AI error {status}")));
        }

        let body: GenerateResponse = response.json().await?;
        let text: String = body
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .collect();

        let reply = truncate_reply(text.trim(), self.max_reply_chars);
        if reply.is_empty() {
            return Err(Error::Intent("Vertex AI returned no text".to_string()));
        }

        tracing::debug!(chars = reply.chars().count(), "fallback reply generated");
        Ok(reply)
    }
}

/// Cut `text` to at most `max_chars` characters, preferring a sentence end
#[must_use]
pub fn truncate_reply(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut: String = text.chars().take(max_chars).collect();
    match cut.rfind(['.', '!', '?']) {
        Some(end) if end > 0 => cut[..=end].to_string(),
        _ => format!("{}…", cut.trim_end()),
    }
}
