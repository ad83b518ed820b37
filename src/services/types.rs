//! Wire types shared by the HTTP surface and its clients

use serde::{Deserialize, Serialize};

/// Result of a transcription request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionResult {
    pub success: bool,
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranscriptionResult {
    /// Successful transcription
    #[must_use]
    pub fn recognized(transcript: impl Into<String>, confidence: f32) -> Self {
        Self {
            success: true,
            transcript: transcript.into(),
            confidence,
            error: None,
        }
    }

    /// Failed transcription
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            transcript: String::new(),
            confidence: 0.0,
            error: Some(error.into()),
        }
    }
}

/// Result of intent recognition for one query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResult {
    pub query_text: String,
    #[serde(default)]
    pub fulfillment_text: String,
    /// Intent display name; absent when nothing matched
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    #[serde(default)]
    pub language_code: String,
}

/// Structured reply of the processing endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessReply {
    pub success: bool,
    #[serde(default, alias = "queryText")]
    pub transcript: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub fulfillment_text: String,
    #[serde(default)]
    pub language_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessReply {
    /// Reply for a recognized query
    #[must_use]
    pub fn from_intent(transcript: impl Into<String>, intent: IntentResult) -> Self {
        Self {
            success: true,
            transcript: transcript.into(),
            confidence: intent.confidence,
            intent: intent.intent,
            fulfillment_text: intent.fulfillment_text,
            language_code: intent.language_code,
            error: None,
        }
    }
}

/// Server-rendered speech
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizedSpeech {
    /// Base64-encoded audio
    pub audio_content: String,
    pub mime_type: String,
}

impl SynthesizedSpeech {
    /// Encode raw audio bytes
    #[must_use]
    pub fn encode(audio: &[u8], mime_type: impl Into<String>) -> Self {
        use base64::Engine;

        Self {
            audio_content: base64::engine::general_purpose::STANDARD.encode(audio),
            mime_type: mime_type.into(),
        }
    }

    /// Decode the audio bytes
    ///
    /// # Errors
    ///
    /// Returns error if the content is not valid base64
    pub fn decode(&self) -> crate::Result<Vec<u8>> {
        use base64::Engine;

        base64::engine::general_purpose::STANDARD
            .decode(&self.audio_content)
            .map_err(|e| crate::Error::Tts(format!("invalid audio content: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_reply_accepts_query_text_alias() {
        let json = r#"{"success":true,"queryText":"recargar saldo","intent":"recargar-saldo","fulfillmentText":"Claro"}"#;
        let reply: ProcessReply = serde_json::from_str(json).unwrap();
        assert_eq!(reply.transcript, "recargar saldo");
        assert_eq!(reply.intent.as_deref(), Some("recargar-saldo"));
        assert_eq!(reply.fulfillment_text, "Claro");
        assert!(reply.error.is_none());
    }

    #[test]
    fn process_reply_serializes_camel_case() {
        let reply = ProcessReply {
            success: true,
            transcript: "hola".to_string(),
            fulfillment_text: "Hola, soy Sof-IA".to_string(),
            language_code: "es-MX".to_string(),
            ..ProcessReply::default()
        };
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["fulfillmentText"], "Hola, soy Sof-IA");
        assert_eq!(value["languageCode"], "es-MX");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn synthesized_speech_base64() {
        let speech = SynthesizedSpeech::encode(b"ID3", "audio/mpeg");
        assert_eq!(speech.audio_content, "SUQz");
        assert_eq!(speech.decode().unwrap(), b"ID3");

        let bad = SynthesizedSpeech {
            audio_content: "***".to_string(),
            mime_type: "audio/mpeg".to_string(),
        };
        assert!(bad.decode().is_err());
    }
}
