//! Conversation pipeline behind the HTTP surface
//!
//! Text goes to intent recognition; when no intent matches with enough confidence
//! the generative fallback writes the reply. Audio is transcribed first and then
//! follows the text path.

use std::sync::Arc;

use super::fallback::{CannedFallback, FallbackResponder, VertexFallback};
use super::intent::{DialogflowClient, IntentRecognizer, KeywordIntentRecognizer};
use super::synthesizer::{OpenAiSynthesizer, Synthesizer};
use super::transcriber::{Transcriber, WhisperTranscriber};
use super::types::{IntentResult, ProcessReply, SynthesizedSpeech, TranscriptionResult};
use crate::config::{Config, DEFAULT_INTENT_SESSION};
use crate::topics::TopicCatalog;
use crate::voice::AudioPayload;
use crate::{Error, Result};

/// Composes transcription, intent recognition, fallback and synthesis
pub struct Assistant {
    intents: Arc<dyn IntentRecognizer>,
    fallback: Arc<dyn FallbackResponder>,
    transcriber: Option<Arc<dyn Transcriber>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    catalog: Arc<TopicCatalog>,
    confidence_threshold: f32,
    fallback_reply: String,
    default_session: String,
    language: String,
}

impl Assistant {
    /// Assistant with intent recognition and fallback only
    #[must_use]
    pub fn new(
        intents: Arc<dyn IntentRecognizer>,
        fallback: Arc<dyn FallbackResponder>,
        catalog: Arc<TopicCatalog>,
    ) -> Self {
        let defaults = crate::config::ServicesConfig::default();
        Self {
            intents,
            fallback,
            transcriber: None,
            synthesizer: None,
            catalog,
            confidence_threshold: defaults.confidence_threshold,
            fallback_reply: defaults.fallback_reply,
            default_session: DEFAULT_INTENT_SESSION.to_string(),
            language: crate::config::VoiceConfig::default().language,
        }
    }

    /// Build the assistant from configuration
    ///
    /// Dialogflow and Vertex AI are used when configured; otherwise intents are
    /// matched offline against the catalog and the fallback is a canned reply.
    ///
    /// # Errors
    ///
    /// Returns error if a configured service cannot be initialized
    pub fn from_config(config: &Config, catalog: Arc<TopicCatalog>) -> Result<Self> {
        let services = &config.services;

        let intents: Arc<dyn IntentRecognizer> = match &services.dialogflow {
            Some(dialogflow) => {
                tracing::info!(project = %dialogflow.project_id, "using Dialogflow intents");
                Arc::new(DialogflowClient::new(dialogflow)?)
            }
            None => {
                tracing::info!(topics = catalog.len(), "using offline keyword intents");
                Arc::new(KeywordIntentRecognizer::new(
                    Arc::clone(&catalog),
                    config.voice.language.clone(),
                ))
            }
        };

        let fallback: Arc<dyn FallbackResponder> = match &services.vertex {
            Some(vertex) => {
                tracing::info!(model = %vertex.model, "using Vertex AI fallback");
                Arc::new(VertexFallback::new(vertex))
            }
            None => Arc::new(CannedFallback::new(services.fallback_reply.clone())),
        };

        let mut assistant = Self::new(intents, fallback, catalog)
            .with_confidence_threshold(services.confidence_threshold)
            .with_fallback_reply(services.fallback_reply.clone())
            .with_language(config.voice.language.clone());

        if let Some(session_id) = services.dialogflow.as_ref().map(|d| d.session_id.clone()) {
            assistant.default_session = session_id;
        }

        match &services.openai_api_key {
            Some(key) => {
                assistant = assistant
                    .with_transcriber(Arc::new(WhisperTranscriber::new(
                        key.clone(),
                        services.stt_model.clone(),
                    )?))
                    .with_synthesizer(Arc::new(OpenAiSynthesizer::new(
                        key.clone(),
                        services.tts_model.clone(),
                        services.tts_voice.clone(),
                    )?));
            }
            None => tracing::warn!("OPENAI_API_KEY not set, voice endpoints disabled"),
        }

        Ok(assistant)
    }

    #[must_use]
    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    #[must_use]
    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    #[must_use]
    pub const fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Reply used when the fallback service itself fails
    #[must_use]
    pub fn with_fallback_reply(mut self, reply: String) -> Self {
        self.fallback_reply = reply;
        self
    }

    #[must_use]
    pub fn with_language(mut self, language: String) -> Self {
        self.language = language;
        self
    }

    /// Whether audio can be transcribed
    #[must_use]
    pub fn can_transcribe(&self) -> bool {
        self.transcriber.is_some()
    }

    /// Whether replies can be synthesized
    #[must_use]
    pub fn can_synthesize(&self) -> bool {
        self.synthesizer.is_some()
    }

    /// The topic catalog
    #[must_use]
    pub fn catalog(&self) -> &TopicCatalog {
        &self.catalog
    }

    /// Answer typed text
    ///
    /// # Errors
    ///
    /// Returns `EmptyInput` for blank text, or error if intent recognition fails
    pub async fn chat(&self, text: &str, session_id: Option<&str>) -> Result<ProcessReply> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyInput);
        }

        let session_id = session_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.default_session);
        let detected = self.intents.detect(text, session_id).await?;
        let resolved = self.resolve(text, detected).await;

        Ok(ProcessReply::from_intent(text, resolved))
    }

    /// Transcribe audio, in `language` or the configured language
    ///
    /// # Errors
    ///
    /// Returns error if transcription is not configured or fails
    pub async fn transcribe(
        &self,
        audio: &AudioPayload,
        language: Option<&str>,
    ) -> Result<TranscriptionResult> {
        let transcriber = self
            .transcriber
            .as_ref()
            .ok_or_else(|| Error::Config("transcription not configured".to_string()))?;
        if audio.is_empty() {
            return Err(Error::EmptyInput);
        }
        let language = language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(&self.language);
        transcriber.transcribe(audio, language).await
    }

    /// Transcribe audio, then answer the transcript
    ///
    /// # Errors
    ///
    /// Returns `NoSpeech` when nothing was recognized, or error if a service fails
    pub async fn process_audio(
        &self,
        audio: &AudioPayload,
        session_id: Option<&str>,
    ) -> Result<ProcessReply> {
        let transcription = self.transcribe(audio, None).await?;
        let transcript = transcription.transcript.trim();
        if !transcription.success || transcript.is_empty() {
            tracing::info!(
                reason = transcription.error.as_deref().unwrap_or("empty transcript"),
                "no speech in uploaded audio"
            );
            return Err(Error::NoSpeech);
        }

        tracing::debug!(transcript = %transcript, "audio transcribed");
        self.chat(transcript, session_id).await
    }

    /// Render text to speech
    ///
    /// # Errors
    ///
    /// Returns error if synthesis is not configured or fails
    pub async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<SynthesizedSpeech> {
        let synthesizer = self
            .synthesizer
            .as_ref()
            .ok_or_else(|| Error::Config("speech synthesis not configured".to_string()))?;
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyInput);
        }
        synthesizer.synthesize(text, voice).await
    }

    /// Fill in the reply when the recognizer had no confident answer
    async fn resolve(&self, text: &str, mut detected: IntentResult) -> IntentResult {
        let confident = detected.intent.as_deref().is_some_and(|i| !i.is_empty())
            && detected.confidence >= self.confidence_threshold;

        if !confident {
            tracing::debug!(
                intent = detected.intent.as_deref().unwrap_or("none"),
                confidence = detected.confidence,
                "no confident intent, using fallback"
            );
            detected.intent = None;
            detected.fulfillment_text = self.fallback_text(text).await;
            return detected;
        }

        if detected.fulfillment_text.trim().is_empty() {
            detected.fulfillment_text = match detected
                .intent
                .as_deref()
                .and_then(|intent| self.catalog.get(intent))
            {
                Some(topic) if !topic.summary.is_empty() => topic.summary.clone(),
                _ => self.fallback_text(text).await,
            };
        }

        detected
    }

    async fn fallback_text(&self, text: &str) -> String {
        match self.fallback.reply(text).await {
            Ok(reply) if !reply.trim().is_empty() => reply,
            Ok(_) => self.fallback_reply.clone(),
            Err(e) => {
                tracing::warn!(error = %e, "fallback reply failed");
                self.fallback_reply.clone()
            }
        }
    }
}

impl std::fmt::Debug for Assistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("topics", &self.catalog.len())
            .field("can_transcribe", &self.can_transcribe())
            .field("can_synthesize", &self.can_synthesize())
            .field("confidence_threshold", &self.confidence_threshold)
            .finish_non_exhaustive()
    }
}
