//! Topic catalog endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use super::{ApiError, ApiState};
use crate::topics::TopicRecord;

/// Build topics router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(list))
        .route("/{intent_key}", get(by_intent))
        .with_state(state)
}

async fn list(State(state): State<Arc<ApiState>>) -> Json<Vec<TopicRecord>> {
    Json(state.assistant.catalog().topics().to_vec())
}

async fn by_intent(
    State(state): State<Arc<ApiState>>,
    Path(intent_key): Path<String>,
) -> Result<Json<TopicRecord>, ApiError> {
    state
        .assistant
        .catalog()
        .get(&intent_key)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("topic {intent_key}")))
}
