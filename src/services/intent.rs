//! Intent recognition

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::types::IntentResult;
use crate::config::DialogflowConfig;
use crate::topics::TopicCatalog;
use crate::{Error, Result};

/// Classifies a user query
#[async_trait]
pub trait IntentRecognizer: Send + Sync {
    /// Detect the intent of `text` within conversation `session_id`
    ///
    /// # Errors
    ///
    /// Returns error if the recognition service fails
    async fn detect(&self, text: &str, session_id: &str) -> Result<IntentResult>;
}

/// Dialogflow ES `detectIntent` client
pub struct DialogflowClient {
    client: reqwest::Client,
    project_id: String,
    access_token: SecretString,
    language_code: String,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectIntentRequest<'a> {
    query_input: QueryInput<'a>,
}

#[derive(Serialize)]
struct QueryInput<'a> {
    text: TextInput<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TextInput<'a> {
    text: &'a str,
    language_code: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectIntentResponse {
    query_result: Option<QueryResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResult {
    #[serde(default)]
    query_text: String,
    #[serde(default)]
    fulfillment_text: String,
    intent: Option<DetectedIntent>,
    #[serde(default)]
    intent_detection_confidence: f32,
    parameters: Option<serde_json::Value>,
    #[serde(default)]
    language_code: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectedIntent {
    display_name: String,
}

impl DialogflowClient {
    /// Create a client
    ///
    /// # Errors
    ///
    /// Returns error if the project id is empty
    pub fn new(config: &DialogflowConfig) -> Result<Self> {
        if config.project_id.trim().is_empty() {
            return Err(Error::Config("Dialogflow project id required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            project_id: config.project_id.clone(),
            access_token: config.access_token.clone(),
            language_code: config.language_code.clone(),
            base_url: "https://dialogflow.googleapis.com/v2".to_string(),
        })
    }

    /// Use a different API root
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn session_url(&self, session_id: &str) -> String {
        format!(
            "{}/projects/{}/agent/sessions/{}:detectIntent",
            self.base_url, self.project_id, session_id
        )
    }
}

#[async_trait]
impl IntentRecognizer for DialogflowClient {
    async fn detect(&self, text: &str, session_id: &str) -> Result<IntentResult> {
        let request = DetectIntentRequest {
            query_input: QueryInput {
                text: TextInput {
                    text,
                    language_code: &self.language_code,
                },
            },
        };

        let response = self
            .client
            .post(self.session_url(session_id))
            .bearer_auth(self.access_token.expose_secret())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Dialogflow API error");
            return Err(Error::Intent(format!("Dialogflow API error {status}")));
        }

        let body: DetectIntentResponse = response.json().await?;
        let result = body
            .query_result
            .ok_or_else(|| Error::Intent("Dialogflow reply without queryResult".to_string()))?;

        let intent = result.intent.map(|i| i.display_name);
        tracing::debug!(
            intent = intent.as_deref().unwrap_or("none"),
            confidence = result.intent_detection_confidence,
            "intent detected"
        );

        Ok(IntentResult {
            query_text: if result.query_text.is_empty() {
                text.to_string()
            } else {
                result.query_text
            },
            fulfillment_text: result.fulfillment_text,
            intent,
            confidence: result.intent_detection_confidence,
            parameters: result.parameters,
            language_code: if result.language_code.is_empty() {
                self.language_code.clone()
            } else {
                result.language_code
            },
        })
    }
}

/// Offline recognizer matching topic trigger phrases
///
/// A query matches the first topic that has one of its phrases as a
/// case-insensitive substring; the reply is that topic's summary.
pub struct KeywordIntentRecognizer {
    catalog: Arc<TopicCatalog>,
    language_code: String,
}

impl KeywordIntentRecognizer {
    #[must_use]
    pub const fn new(catalog: Arc<TopicCatalog>, language_code: String) -> Self {
        Self {
            catalog,
            language_code,
        }
    }
}

#[async_trait]
impl IntentRecognizer for KeywordIntentRecognizer {
    async fn detect(&self, text: &str, _session_id: &str) -> Result<IntentResult> {
        let normalized = text.trim().to_lowercase();

        let matched = self.catalog.topics().iter().find(|topic| {
            topic
                .phrases
                .iter()
                .map(|p| p.trim().to_lowercase())
                .any(|p| !p.is_empty() && normalized.contains(&p))
        });

        Ok(match matched {
            Some(topic) => IntentResult {
                query_text: text.to_string(),
                fulfillment_text: topic.summary.clone(),
                intent: Some(topic.intent_key.clone()),
                confidence: 1.0,
                parameters: None,
                language_code: self.language_code.clone(),
            },
            None => IntentResult {
                query_text: text.to_string(),
                language_code: self.language_code.clone(),
                ..IntentResult::default()
            },
        })
    }
}
