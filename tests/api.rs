//! API endpoint integration tests

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use tower::ServiceExt;

use sofia_voice::api::{ApiState, router};
use sofia_voice::services::{Assistant, SynthesizedSpeech, TranscriptionResult};

mod common;
use common::{offline_assistant, voice_assistant};

const BOUNDARY: &str = "sofia-test-boundary";

fn build_test_router(assistant: Assistant) -> axum::Router {
    router(Arc::new(ApiState::new(Arc::new(assistant))))
}

fn json_request(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart_request(uri: &str, audio: &[u8], session_id: Option<&str>) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"audio\"; filename=\"audio.wav\"\r\nContent-Type: audio/wav\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(audio);
    body.extend_from_slice(b"\r\n");
    if let Some(session_id) = session_id {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"sessionId\"\r\n\r\n{session_id}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = build_test_router(offline_assistant());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["transcription"], false);
    assert!(json["topics"].as_u64().unwrap() >= 5);
}

#[tokio::test]
async fn test_chat_matches_topic_intent() {
    let app = build_test_router(offline_assistant());

    let response = app
        .oneshot(json_request(
            "/api/chat",
            &serde_json::json!({ "message": "¿Cómo puedo enviar dinero a mi mamá?" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["intent"], "enviar-recibir-dinero");
    assert_eq!(json["transcript"], "¿Cómo puedo enviar dinero a mi mamá?");
    assert!(!json["fulfillmentText"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_accepts_text_field() {
    let app = build_test_router(offline_assistant());

    let response = app
        .oneshot(json_request(
            "/api/chat",
            &serde_json::json!({ "text": "quiero pagar la luz" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["intent"], "pagar-servicios");
}

#[tokio::test]
async fn test_chat_unmatched_uses_fallback() {
    let app = build_test_router(offline_assistant());

    let response = app
        .oneshot(json_request(
            "/api/chat",
            &serde_json::json!({ "message": "¿quién ganó el partido?" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert!(json["intent"].is_null());
    assert_eq!(json["fulfillmentText"], "No entendí, ¿puedes repetirlo?");
}

#[tokio::test]
async fn test_chat_rejects_blank_message() {
    let app = build_test_router(offline_assistant());

    let response = app
        .oneshot(json_request("/api/chat", &serde_json::json!({ "message": "  " })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = read_json(response).await;
    assert_eq!(json["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_voice_process_runs_pipeline() {
    let app = build_test_router(voice_assistant(TranscriptionResult::recognized(
        "sofia quiero recargar saldo",
        0.9,
    )));

    let response = app
        .oneshot(multipart_request(
            "/api/voice/process",
            b"RIFF-fake-wav",
            Some("sesion-1"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["transcript"], "sofia quiero recargar saldo");
    assert_eq!(json["intent"], "recargar-saldo");
}

#[tokio::test]
async fn test_voice_process_without_speech_is_unprocessable() {
    let app = build_test_router(voice_assistant(TranscriptionResult::failed(
        "no speech recognized",
    )));

    let response = app
        .oneshot(multipart_request("/api/voice/process", b"RIFF", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = read_json(response).await;
    assert_eq!(json["error"]["code"], "no_speech");
}

#[tokio::test]
async fn test_voice_process_requires_audio() {
    let app = build_test_router(voice_assistant(TranscriptionResult::recognized("hola", 1.0)));

    let response = app
        .oneshot(multipart_request("/api/voice/process", b"", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_transcribe_not_configured() {
    let app = build_test_router(offline_assistant());

    let response = app
        .oneshot(multipart_request("/api/voice/transcribe", b"RIFF", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = read_json(response).await;
    assert_eq!(json["error"]["code"], "not_configured");
}

#[tokio::test]
async fn test_transcribe_returns_result() {
    let app = build_test_router(voice_assistant(TranscriptionResult::recognized(
        "pagar servicios",
        1.0,
    )));

    let response = app
        .oneshot(multipart_request("/api/voice/transcribe", b"RIFF", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["transcript"], "pagar servicios");
}

#[tokio::test]
async fn test_synthesize_returns_base64_audio() {
    let app = build_test_router(voice_assistant(TranscriptionResult::default()));

    let response = app
        .oneshot(json_request(
            "/api/voice/synthesize",
            &serde_json::json!({ "text": "Hola", "voice": "alloy" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["mimeType"], "audio/mpeg");
    let speech: SynthesizedSpeech = serde_json::from_value(json).unwrap();
    assert_eq!(speech.decode().unwrap(), b"alloy:Hola");
}

#[tokio::test]
async fn test_topics_listing_and_lookup() {
    let app = build_test_router(offline_assistant());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/topics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert!(json.as_array().unwrap().len() >= 5);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/topics/enviar-recibir-dinero")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["id"], "enviar-dinero");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/topics/enviar-dinero")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
