//! Text conversation endpoint

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::post};
use serde::Deserialize;

use super::{ApiError, ApiState};
use crate::services::ProcessReply;

/// Chat request; older clients send `text` instead of `message`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(alias = "text")]
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Build chat router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/", post(chat)).with_state(state)
}

async fn chat(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ProcessReply>, ApiError> {
    let reply = state
        .assistant
        .chat(&request.message, request.session_id.as_deref())
        .await?;

    tracing::info!(
        intent = reply.intent.as_deref().unwrap_or("none"),
        confidence = reply.confidence,
        "chat answered"
    );
    Ok(Json(reply))
}
