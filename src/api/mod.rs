//! HTTP API server for the Sof-IA backend

pub mod chat;
pub mod health;
pub mod topics;
pub mod voice;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::services::Assistant;
use crate::{Error, Result};

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub assistant: Arc<Assistant>,
}

impl ApiState {
    #[must_use]
    pub const fn new(assistant: Arc<Assistant>) -> Self {
        Self { assistant }
    }
}

/// Build the router with all routes
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/voice", voice::router(state.clone()))
        .nest("/api/chat", chat::router(state.clone()))
        .nest("/api/topics", topics::router(state.clone()))
        .merge(health::router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    host: String,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(assistant: Arc<Assistant>, config: &ServerConfig) -> Self {
        Self {
            state: Arc::new(ApiState::new(assistant)),
            host: config.host.clone(),
            port: config.port,
        }
    }

    /// Run the API server until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind API server on {addr}: {e}")))?;

        tracing::info!(addr = %addr, "API server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Config(format!("API server error: {e}")))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

/// API errors rendered as `{error: {code, message}}`
#[derive(Debug)]
pub enum ApiError {
    NotConfigured(String),
    BadRequest(String),
    NoSpeech,
    Upstream(String),
    NotFound(String),
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::Config(msg) => Self::NotConfigured(msg),
            Error::EmptyInput => Self::BadRequest(e.to_string()),
            Error::NoSpeech => Self::NoSpeech,
            Error::NotFound(what) => Self::NotFound(what),
            Error::Stt(_)
            | Error::Tts(_)
            | Error::Intent(_)
            | Error::Processing(_)
            | Error::Http(_) => Self::Upstream(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::NotConfigured(msg) => (StatusCode::SERVICE_UNAVAILABLE, "not_configured", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::NoSpeech => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "no_speech",
                crate::services::NO_SPEECH_RECOGNIZED.to_string(),
            ),
            Self::Upstream(msg) => {
                tracing::warn!(error = %msg, "upstream service failed");
                (StatusCode::BAD_GATEWAY, "upstream_failed", msg)
            }
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg)
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: ErrorBody { code, message },
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mapping() {
        assert!(matches!(
            ApiError::from(Error::Config("x".into())),
            ApiError::NotConfigured(_)
        ));
        assert!(matches!(ApiError::from(Error::EmptyInput), ApiError::BadRequest(_)));
        assert!(matches!(ApiError::from(Error::NoSpeech), ApiError::NoSpeech));
        assert!(matches!(
            ApiError::from(Error::Intent("down".into())),
            ApiError::Upstream(_)
        ));
        assert!(matches!(
            ApiError::from(Error::Audio("x".into())),
            ApiError::Internal(_)
        ));
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            ApiError::NoSpeech.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::Upstream("x".into()).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
