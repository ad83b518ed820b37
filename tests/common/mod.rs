//! Shared test utilities: fake platform providers and a controller harness

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, watch};

use sofia_voice::services::{
    Assistant, CannedFallback, KeywordIntentRecognizer, NO_SPEECH_RECOGNIZED, ProcessReply,
    SynthesizedSpeech, Synthesizer, Transcriber, TranscriptionResult,
};
use sofia_voice::voice::{
    AudioPayload, CaptureConstraints, MediaCaptureProvider, MediaStream, ProcessingBackend,
    RecognitionEvent, RecognitionOptions, RecognitionSegment, RecognitionSession,
    RecognitionSink, SpeechRecognitionProvider, SpeechSynthesisProvider, TopicOpener, Utterance,
    VoiceInfo,
};
use sofia_voice::{
    CaptureError, ControllerConfig, ControllerHandle, Error, IntentRouter, Providers,
    RecognitionErrorKind, Result, TopicCatalog, TopicRecord, VoiceController,
    VoiceSessionState,
};

// ---------------------------------------------------------------------------
// Recognition
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecognitionInner {
    sinks: Vec<RecognitionSink>,
    live: Vec<u64>,
    stops: usize,
    aborts: usize,
    open_error: Option<RecognitionErrorKind>,
}

/// Recognition provider driven by the test
#[derive(Clone, Default)]
pub struct FakeRecognition {
    inner: Arc<Mutex<RecognitionInner>>,
}

struct FakeRecognitionSession {
    sink: RecognitionSink,
    inner: Arc<Mutex<RecognitionInner>>,
}

impl FakeRecognition {
    /// Make every later `open` fail with `kind`
    pub fn fail_open(&self, kind: Option<RecognitionErrorKind>) {
        self.inner.lock().unwrap().open_error = kind;
    }

    /// Sessions opened so far
    pub fn opened(&self) -> usize {
        self.inner.lock().unwrap().sinks.len()
    }

    /// Sessions neither stopped, aborted nor ended
    pub fn live(&self) -> usize {
        self.inner.lock().unwrap().live.len()
    }

    pub fn stops(&self) -> usize {
        self.inner.lock().unwrap().stops
    }

    pub fn aborts(&self) -> usize {
        self.inner.lock().unwrap().aborts
    }

    fn latest(&self) -> RecognitionSink {
        self.inner
            .lock()
            .unwrap()
            .sinks
            .last()
            .cloned()
            .expect("no recognition session opened")
    }

    /// Deliver a final result on the most recent session
    pub fn say(&self, text: &str) {
        self.latest()
            .emit(RecognitionEvent::Results(vec![RecognitionSegment::final_text(text)]));
    }

    /// Deliver an interim result on the most recent session
    pub fn say_interim(&self, text: &str) {
        self.latest()
            .emit(RecognitionEvent::Results(vec![RecognitionSegment::interim(text)]));
    }

    /// Fail the most recent session, then end it
    pub fn fail(&self, kind: RecognitionErrorKind) {
        let sink = self.latest();
        sink.emit(RecognitionEvent::Error(kind));
        self.end_session(&sink);
    }

    /// End the most recent session on its own
    pub fn end(&self) {
        let sink = self.latest();
        self.end_session(&sink);
    }

    /// Deliver an event on an arbitrary earlier session
    pub fn emit_on(&self, index: usize, event: RecognitionEvent) {
        let sink = self.inner.lock().unwrap().sinks[index].clone();
        sink.emit(event);
    }

    fn end_session(&self, sink: &RecognitionSink) {
        self.inner
            .lock()
            .unwrap()
            .live
            .retain(|id| *id != sink.session());
        sink.emit(RecognitionEvent::Ended);
    }
}

impl SpeechRecognitionProvider for FakeRecognition {
    fn open(
        &self,
        _options: &RecognitionOptions,
        sink: RecognitionSink,
    ) -> std::result::Result<Box<dyn RecognitionSession>, RecognitionErrorKind> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(kind) = inner.open_error.clone() {
            return Err(kind);
        }
        inner.sinks.push(sink.clone());
        inner.live.push(sink.session());
        drop(inner);

        sink.emit(RecognitionEvent::Started);
        Ok(Box::new(FakeRecognitionSession {
            sink,
            inner: Arc::clone(&self.inner),
        }))
    }
}

impl RecognitionSession for FakeRecognitionSession {
    fn stop(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stops += 1;
        inner.live.retain(|id| *id != self.sink.session());
        drop(inner);
        self.sink.emit(RecognitionEvent::Ended);
    }

    fn abort(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        inner.aborts += 1;
        inner.live.retain(|id| *id != self.sink.session());
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

struct CaptureInner {
    error: Option<CaptureError>,
    payload: Vec<u8>,
    grant_delay: Duration,
    acquired: usize,
}

/// Microphone provider that counts live streams
#[derive(Clone)]
pub struct FakeCapture {
    inner: Arc<Mutex<CaptureInner>>,
    live: Arc<AtomicUsize>,
}

impl Default for FakeCapture {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CaptureInner {
                error: None,
                payload: b"RIFF-fake-wav".to_vec(),
                grant_delay: Duration::ZERO,
                acquired: 0,
            })),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FakeCapture {
    pub fn fail_with(&self, error: Option<CaptureError>) {
        self.inner.lock().unwrap().error = error;
    }

    /// Audio the recorder returns; empty simulates a silent recording
    pub fn record(&self, payload: &[u8]) {
        self.inner.lock().unwrap().payload = payload.to_vec();
    }

    /// How long the permission prompt takes
    pub fn delay_grant(&self, delay: Duration) {
        self.inner.lock().unwrap().grant_delay = delay;
    }

    pub fn acquired(&self) -> usize {
        self.inner.lock().unwrap().acquired
    }

    /// Streams whose tracks are still running
    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

struct FakeStream {
    payload: Vec<u8>,
    live: Option<Arc<AtomicUsize>>,
    recording: bool,
}

impl MediaStream for FakeStream {
    fn start_recorder(&mut self) -> std::result::Result<(), CaptureError> {
        self.recording = true;
        Ok(())
    }

    fn stop_recorder(&mut self) -> AudioPayload {
        self.recording = false;
        AudioPayload::wav(std::mem::take(&mut self.payload))
    }

    fn stop_tracks(&mut self) {
        if let Some(live) = self.live.take() {
            live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_live(&self) -> bool {
        self.live.is_some()
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

#[async_trait]
impl MediaCaptureProvider for FakeCapture {
    async fn acquire(
        &self,
        _constraints: &CaptureConstraints,
    ) -> std::result::Result<Box<dyn MediaStream>, CaptureError> {
        let (delay, error, payload) = {
            let mut inner = self.inner.lock().unwrap();
            inner.acquired += 1;
            (inner.grant_delay, inner.error.clone(), inner.payload.clone())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = error {
            return Err(error);
        }

        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            payload,
            live: Some(Arc::clone(&self.live)),
            recording: false,
        }))
    }
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

/// Speech synthesis that "speaks" for a fixed time
#[derive(Clone)]
pub struct FakeSynthesis {
    available: bool,
    duration: Duration,
    spoken: Arc<Mutex<Vec<Utterance>>>,
    cancels: Arc<AtomicUsize>,
    cancelled: Arc<Notify>,
    fail: bool,
}

impl Default for FakeSynthesis {
    fn default() -> Self {
        Self {
            available: true,
            duration: Duration::from_secs(2),
            spoken: Arc::default(),
            cancels: Arc::default(),
            cancelled: Arc::new(Notify::new()),
            fail: false,
        }
    }
}

impl FakeSynthesis {
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.text.clone())
            .collect()
    }

    pub fn last_utterance(&self) -> Option<Utterance> {
        self.spoken.lock().unwrap().last().cloned()
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesisProvider for FakeSynthesis {
    fn is_available(&self) -> bool {
        self.available
    }

    fn voices(&self) -> Vec<VoiceInfo> {
        vec![
            VoiceInfo {
                name: "Samantha".to_string(),
                language: "en-US".to_string(),
                is_default: true,
            },
            VoiceInfo {
                name: "Monica".to_string(),
                language: "es-ES".to_string(),
                is_default: false,
            },
        ]
    }

    async fn speak(&self, utterance: Utterance) -> Result<()> {
        self.spoken.lock().unwrap().push(utterance);
        if self.fail {
            return Err(Error::Tts("device lost".to_string()));
        }
        tokio::select! {
            () = tokio::time::sleep(self.duration) => {}
            () = self.cancelled.notified() => {}
        }
        Ok(())
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.cancelled.notify_waiters();
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// What the fake backend answers
#[derive(Clone)]
pub enum BackendBehavior {
    Reply(ProcessReply),
    Fail(String),
    Hang,
}

struct BackendInner {
    behavior: BackendBehavior,
    latency: Duration,
    audio: Vec<AudioPayload>,
    texts: Vec<String>,
    sessions: Vec<Option<String>>,
}

/// Processing backend with scripted replies
#[derive(Clone)]
pub struct FakeBackend {
    inner: Arc<Mutex<BackendInner>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::replying(reply(Some("enviar-recibir-dinero"), "Para enviar dinero abre la billetera."))
    }
}

impl FakeBackend {
    pub fn replying(reply: ProcessReply) -> Self {
        Self::with(BackendBehavior::Reply(reply))
    }

    pub fn with(behavior: BackendBehavior) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BackendInner {
                behavior,
                latency: Duration::from_millis(500),
                audio: Vec::new(),
                texts: Vec::new(),
                sessions: Vec::new(),
            })),
        }
    }

    pub fn set(&self, behavior: BackendBehavior) {
        self.inner.lock().unwrap().behavior = behavior;
    }

    pub fn uploads(&self) -> usize {
        self.inner.lock().unwrap().audio.len()
    }

    pub fn texts(&self) -> Vec<String> {
        self.inner.lock().unwrap().texts.clone()
    }

    pub fn sessions(&self) -> Vec<Option<String>> {
        self.inner.lock().unwrap().sessions.clone()
    }

    async fn answer(&self) -> Result<ProcessReply> {
        let (behavior, latency) = {
            let inner = self.inner.lock().unwrap();
            (inner.behavior.clone(), inner.latency)
        };
        tokio::time::sleep(latency).await;
        match behavior {
            BackendBehavior::Reply(reply) => Ok(reply),
            BackendBehavior::Fail(message) => Err(Error::Processing(message)),
            BackendBehavior::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl ProcessingBackend for FakeBackend {
    async fn process_audio(
        &self,
        audio: AudioPayload,
        session_id: Option<&str>,
    ) -> Result<ProcessReply> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.audio.push(audio);
            inner.sessions.push(session_id.map(ToString::to_string));
        }
        self.answer().await
    }

    async fn process_text(&self, text: &str, session_id: Option<&str>) -> Result<ProcessReply> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.texts.push(text.to_string());
            inner.sessions.push(session_id.map(ToString::to_string));
        }
        self.answer().await
    }
}

/// A successful backend reply
pub fn reply(intent: Option<&str>, text: &str) -> ProcessReply {
    ProcessReply {
        success: true,
        transcript: "sofia quiero enviar dinero".to_string(),
        confidence: 0.92,
        intent: intent.map(ToString::to_string),
        fulfillment_text: text.to_string(),
        language_code: "es".to_string(),
        error: None,
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A running controller wired to fakes
pub struct Harness {
    pub recognition: FakeRecognition,
    pub capture: FakeCapture,
    pub synthesis: FakeSynthesis,
    pub backend: FakeBackend,
    pub opened_topics: Arc<Mutex<Vec<String>>>,
    pub handle: ControllerHandle,
    pub state: watch::Receiver<VoiceSessionState>,
}

/// Fast, deterministic controller settings
pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        wake_phrases: vec!["sofia".to_string()],
        recording_secs: 5,
        restart_delay: Duration::from_millis(300),
        error_backoff: Duration::from_millis(1500),
        resume_delay: Duration::from_millis(250),
        processing_timeout: Duration::from_secs(20),
        session_id: None,
        ..ControllerConfig::default()
    }
}

impl Harness {
    pub fn start() -> Self {
        Self::start_with(
            test_config(),
            FakeCapture::default(),
            FakeSynthesis::default(),
            FakeBackend::default(),
        )
    }

    pub fn start_with(
        config: ControllerConfig,
        capture: FakeCapture,
        synthesis: FakeSynthesis,
        backend: FakeBackend,
    ) -> Self {
        let recognition = FakeRecognition::default();
        let opened_topics = Arc::new(Mutex::new(Vec::new()));

        let opener: TopicOpener = {
            let opened = Arc::clone(&opened_topics);
            Arc::new(move |topic: &TopicRecord| opened.lock().unwrap().push(topic.id.clone()))
        };
        let catalog = Arc::new(TopicCatalog::embedded().unwrap());

        let providers = Providers {
            recognition: Arc::new(recognition.clone()),
            capture: Arc::new(capture.clone()),
            synthesis: Arc::new(synthesis.clone()),
            backend: Arc::new(backend.clone()),
        };

        let controller = VoiceController::new(
            config,
            providers,
            IntentRouter::with_opener(catalog, opener),
        )
        .unwrap();
        let handle = controller.spawn();
        let state = handle.subscribe();

        Self {
            recognition,
            capture,
            synthesis,
            backend,
            opened_topics,
            handle,
            state,
        }
    }

    /// Wait until the published state satisfies `pred`
    pub async fn wait_for(
        &mut self,
        pred: impl FnMut(&VoiceSessionState) -> bool,
    ) -> VoiceSessionState {
        tokio::time::timeout(Duration::from_secs(120), self.state.wait_for(pred))
            .await
            .expect("state never reached")
            .expect("controller stopped")
            .clone()
    }

    /// Let the controller drain its queue and advance `by` of virtual time
    pub async fn advance(&self, by: Duration) {
        tokio::time::sleep(by).await;
        settle().await;
    }

    pub fn opened_topics(&self) -> Vec<String> {
        self.opened_topics.lock().unwrap().clone()
    }

    pub fn current(&self) -> VoiceSessionState {
        self.handle.state()
    }
}

/// Give spawned tasks a chance to run without advancing time
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// Transcriber with a fixed answer
pub struct ScriptedTranscriber(pub TranscriptionResult);

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, audio: &AudioPayload, _language: &str) -> Result<TranscriptionResult> {
        if audio.is_empty() {
            return Ok(TranscriptionResult::failed(NO_SPEECH_RECOGNIZED));
        }
        Ok(self.0.clone())
    }
}

/// Synthesizer that returns the text itself as "audio"
pub struct EchoSynthesizer;

#[async_trait]
impl Synthesizer for EchoSynthesizer {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<SynthesizedSpeech> {
        let body = format!("{}:{text}", voice.unwrap_or("nova"));
        Ok(SynthesizedSpeech::encode(body.as_bytes(), "audio/mpeg"))
    }
}

/// Assistant over the embedded catalog with offline intents and a canned fallback
pub fn offline_assistant() -> Assistant {
    let catalog = Arc::new(TopicCatalog::embedded().unwrap());
    Assistant::new(
        Arc::new(KeywordIntentRecognizer::new(
            Arc::clone(&catalog),
            "es-MX".to_string(),
        )),
        Arc::new(CannedFallback::new("No entendí, ¿puedes repetirlo?")),
        catalog,
    )
}

/// Offline assistant that also transcribes and synthesizes
pub fn voice_assistant(transcription: TranscriptionResult) -> Assistant {
    offline_assistant()
        .with_transcriber(Arc::new(ScriptedTranscriber(transcription)))
        .with_synthesizer(Arc::new(EchoSynthesizer))
}
