//! Remote processing client
//!
//! Uploads captured audio (or typed text) to the backend and hands the structured
//! reply back to the controller. Every submission is bounded by a timeout so the
//! controller can never stay in `Processing`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::controller::{ControllerEvent, Shared};
use super::provider::AudioPayload;
use super::Phase;
use crate::services::{
    ProcessReply, SynthesizedSpeech, Synthesizer, Transcriber, TranscriptionResult,
};
use crate::{Error, Result};

/// Message shown for any backend or transport failure
pub const PROCESSING_FAILED_MESSAGE: &str =
    "No se pudo procesar tu solicitud. Intenta de nuevo en un momento.";

/// Backend that turns audio or text into a reply
#[async_trait]
pub trait ProcessingBackend: Send + Sync {
    /// Process a recorded utterance
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, non-success status or malformed reply
    async fn process_audio(&self, audio: AudioPayload, session_id: Option<&str>)
    -> Result<ProcessReply>;

    /// Process typed text
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, non-success status or malformed reply
    async fn process_text(&self, text: &str, session_id: Option<&str>) -> Result<ProcessReply>;
}

/// What a submission carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Submission {
    Audio(AudioPayload),
    Text(String),
}

/// HTTP client for the processing endpoints
#[derive(Debug, Clone)]
pub struct HttpProcessingClient {
    client: reqwest::Client,
    base_url: url::Url,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

#[derive(serde::Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<&'a str>,
}

impl HttpProcessingClient {
    /// Create a client for the backend at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the HTTP client cannot be built
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = url::Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid backend url {base_url}: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// Backend base URL
    #[must_use]
    pub const fn base_url(&self) -> &url::Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("invalid endpoint {path}: {e}")))
    }

    async fn read_reply(response: reqwest::Response) -> Result<ProcessReply> {
        let status = response.status();
        tracing::debug!(status = %status, "received processing response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "processing endpoint error");
            return Err(Error::Processing(format!("backend returned {status}")));
        }

        let reply: ProcessReply = response
            .json()
            .await
            .map_err(|e| Error::Processing(format!("malformed reply: {e}")))?;

        if !reply.success {
            let reason = reply
                .error
                .unwrap_or_else(|| "backend reported failure".to_string());
            return Err(Error::Processing(reason));
        }

        Ok(reply)
    }
}

fn audio_part(audio: &AudioPayload) -> Result<reqwest::multipart::Part> {
    reqwest::multipart::Part::bytes(audio.bytes.clone())
        .file_name(audio.file_name())
        .mime_str(&audio.mime_type)
        .map_err(|e| Error::Processing(e.to_string()))
}

#[async_trait]
impl ProcessingBackend for HttpProcessingClient {
    async fn process_audio(
        &self,
        audio: AudioPayload,
        session_id: Option<&str>,
    ) -> Result<ProcessReply> {
        tracing::debug!(audio_bytes = audio.bytes.len(), "uploading audio");

        let mut form = reqwest::multipart::Form::new().part("audio", audio_part(&audio)?);
        if let Some(session_id) = session_id {
            form = form.text("sessionId", session_id.to_string());
        }

        let response = self
            .client
            .post(self.endpoint("api/voice/process")?)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Processing(e.to_string()))?;

        Self::read_reply(response).await
    }

    async fn process_text(&self, text: &str, session_id: Option<&str>) -> Result<ProcessReply> {
        tracing::debug!(chars = text.len(), "sending text");

        let response = self
            .client
            .post(self.endpoint("api/chat")?)
            .json(&ChatRequest {
                message: text,
                session_id,
            })
            .send()
            .await
            .map_err(|e| Error::Processing(e.to_string()))?;

        Self::read_reply(response).await
    }
}

#[async_trait]
impl Transcriber for HttpProcessingClient {
    async fn transcribe(
        &self,
        audio: &AudioPayload,
        language: &str,
    ) -> Result<TranscriptionResult> {
        let form = reqwest::multipart::Form::new()
            .part("audio", audio_part(audio)?)
            .text("language", language.to_string());
        let response = self
            .client
            .post(self.endpoint("api/voice/transcribe")?)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("transcription endpoint returned {status}: {body}")));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl Synthesizer for HttpProcessingClient {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<SynthesizedSpeech> {
        let response = self
            .client
            .post(self.endpoint("api/voice/synthesize")?)
            .json(&SynthesizeRequest { text, voice })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("synthesis endpoint returned {status}: {body}")));
        }

        Ok(response.json().await?)
    }
}

struct InFlight {
    request: u64,
    task: JoinHandle<()>,
}

/// Owns the single in-flight backend request
pub(crate) struct ProcessingClient {
    backend: Arc<dyn ProcessingBackend>,
    timeout: Duration,
    session_id: Option<String>,
    in_flight: Option<InFlight>,
    next_request: u64,
}

impl ProcessingClient {
    pub(crate) fn new(
        backend: Arc<dyn ProcessingBackend>,
        timeout: Duration,
        session_id: Option<String>,
    ) -> Self {
        Self {
            backend,
            timeout,
            session_id,
            in_flight: None,
            next_request: 0,
        }
    }

    pub(crate) const fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Enter `Processing` and dispatch the submission
    pub(crate) fn submit(&mut self, shared: &mut Shared, submission: Submission) {
        self.cancel();
        self.next_request += 1;
        let request = self.next_request;

        shared.state.clear_error();
        shared.state.set_phase(Phase::Processing);

        let backend = Arc::clone(&self.backend);
        let session_id = self.session_id.clone();
        let timeout = self.timeout;
        let events = shared.events.clone();

        let task = tokio::spawn(async move {
            let call = async {
                match submission {
                    Submission::Audio(audio) => {
                        backend.process_audio(audio, session_id.as_deref()).await
                    }
                    Submission::Text(text) => {
                        backend.process_text(&text, session_id.as_deref()).await
                    }
                }
            };

            let result = match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(Error::Processing(format!(
                    "no reply within {}s",
                    timeout.as_secs()
                ))),
            };
            let _ = events.send(ControllerEvent::ProcessingDone { request, result });
        });

        tracing::info!(request, "processing request dispatched");
        self.in_flight = Some(InFlight { request, task });
    }

    /// Accept the reply of the current request; stale replies yield `None`
    pub(crate) fn on_done(
        &mut self,
        request: u64,
        result: Result<ProcessReply>,
    ) -> Option<Result<ProcessReply>> {
        match &self.in_flight {
            Some(in_flight) if in_flight.request == request => {
                self.in_flight = None;
                Some(result)
            }
            _ => {
                tracing::debug!(request, "stale processing reply ignored");
                None
            }
        }
    }

    /// Abandon the in-flight request
    pub(crate) fn cancel(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.task.abort();
            tracing::debug!(request = in_flight.request, "processing request abandoned");
        }
    }
}
