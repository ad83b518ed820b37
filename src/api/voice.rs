//! Voice API endpoints: process, transcribe, synthesize

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Multipart, State},
    routing::post,
};
use serde::Deserialize;

use super::{ApiError, ApiState};
use crate::services::{ProcessReply, SynthesizedSpeech, TranscriptionResult};
use crate::voice::AudioPayload;

/// Build voice router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/process", post(process))
        .route("/transcribe", post(transcribe))
        .route("/synthesize", post(synthesize))
        .with_state(state)
}

/// Fields of a voice upload
#[derive(Debug, Default)]
struct VoiceUpload {
    audio: Option<AudioPayload>,
    session_id: Option<String>,
    language: Option<String>,
}

impl VoiceUpload {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut upload = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "audio" => {
                    let mime_type = field
                        .content_type()
                        .unwrap_or("audio/wav")
                        .to_string();
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("unreadable audio: {e}")))?;
                    upload.audio = Some(AudioPayload {
                        bytes: bytes.to_vec(),
                        mime_type,
                    });
                }
                "sessionId" => upload.session_id = Some(read_text(field).await?),
                "language" => upload.language = Some(read_text(field).await?),
                other => tracing::debug!(field = other, "ignoring multipart field"),
            }
        }

        Ok(upload)
    }

    fn audio(&self) -> Result<&AudioPayload, ApiError> {
        match &self.audio {
            Some(audio) if !audio.is_empty() => Ok(audio),
            _ => Err(ApiError::BadRequest("missing audio".to_string())),
        }
    }
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(format!("unreadable field: {e}")))
}

/// Transcribe, detect intent, and reply
async fn process(
    State(state): State<Arc<ApiState>>,
    multipart: Multipart,
) -> Result<Json<ProcessReply>, ApiError> {
    let upload = VoiceUpload::read(multipart).await?;
    let audio = upload.audio()?;
    tracing::debug!(bytes = audio.bytes.len(), mime = %audio.mime_type, "voice upload");

    let reply = state
        .assistant
        .process_audio(audio, upload.session_id.as_deref())
        .await?;

    tracing::info!(
        intent = reply.intent.as_deref().unwrap_or("none"),
        confidence = reply.confidence,
        "voice request answered"
    );
    Ok(Json(reply))
}

/// Transcribe only
async fn transcribe(
    State(state): State<Arc<ApiState>>,
    multipart: Multipart,
) -> Result<Json<TranscriptionResult>, ApiError> {
    let upload = VoiceUpload::read(multipart).await?;
    let result = state
        .assistant
        .transcribe(upload.audio()?, upload.language.as_deref())
        .await?;
    Ok(Json(result))
}

/// Synthesis request
#[derive(Debug, Deserialize)]
pub struct SynthesizeRequest {
    pub text: String,
    #[serde(default)]
    pub voice: Option<String>,
}

/// Render text to base64 audio
async fn synthesize(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SynthesizeRequest>,
) -> Result<Json<SynthesizedSpeech>, ApiError> {
    let speech = state
        .assistant
        .synthesize(&request.text, request.voice.as_deref())
        .await?;
    Ok(Json(speech))
}
