//! Voice interaction controller
//!
//! A single task owns the session state and the four stage machines (listening,
//! recording, processing, playback) and applies every event in arrival order.
//! Each asynchronous result comes back as an event tagged with the id of the
//! operation that produced it; the owning stage drops it when that operation is no
//! longer current, so a reset or teardown can never be undone by a late callback.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use super::listening::{ListeningManager, ListeningOutcome};
use super::playback::SpeechPlayback;
use super::processing::{
    PROCESSING_FAILED_MESSAGE, ProcessingBackend, ProcessingClient, Submission,
};
use super::provider::{
    CaptureConstraints, MediaCaptureProvider, MediaStream, RecognitionEvent,
    SpeechRecognitionProvider, SpeechSynthesisProvider,
};
use super::recording::{
    AcquireOutcome, EMPTY_RECORDING_MESSAGE, RecordingOutcome, RecordingSession,
};
use super::router::IntentRouter;
use super::state::{SessionStore, VoiceSessionState};
use super::timers::{TimerKind, TimerSet};
use super::wake::WakePhraseMatcher;
use super::Phase;
use crate::config::Config;
use crate::error::CaptureError;
use crate::services::ProcessReply;
use crate::{Error, Result};

pub(crate) type EventSender = mpsc::UnboundedSender<ControllerEvent>;

/// Everything the controller task reacts to
pub(crate) enum ControllerEvent {
    Command(Command),
    Recognition {
        session: u64,
        event: RecognitionEvent,
    },
    Timer {
        kind: TimerKind,
        token: u64,
    },
    CaptureReady {
        attempt: u64,
        result: std::result::Result<Box<dyn MediaStream>, CaptureError>,
    },
    ProcessingDone {
        request: u64,
        result: Result<ProcessReply>,
    },
    PlaybackDone {
        utterance: u64,
        result: Result<()>,
    },
}

/// Requests from presentation layers
pub(crate) enum Command {
    StartListening,
    StopListening,
    TriggerRecording,
    StopRecording,
    SubmitText(String),
    Reset,
    Shutdown(Option<oneshot::Sender<()>>),
}

/// State and resources every stage works on
pub(crate) struct Shared {
    pub(crate) state: SessionStore,
    pub(crate) timers: TimerSet,
    pub(crate) events: EventSender,
}

/// Controller tuning
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Spoken language tag for recognition and synthesis
    pub language: String,
    pub wake_phrases: Vec<String>,
    /// Recording budget in seconds
    pub recording_secs: u32,
    /// Delay before re-opening recognition after a session ends
    pub restart_delay: Duration,
    /// Delay before re-opening recognition after a surfaced failure
    pub error_backoff: Duration,
    /// Delay before re-opening recognition after a reply
    pub resume_delay: Duration,
    /// Upper bound on one backend submission
    pub processing_timeout: Duration,
    pub preferred_voice: Option<String>,
    /// Intent session sent with each submission; the backend default applies when absent
    pub session_id: Option<String>,
    pub capture: CaptureConstraints,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ControllerConfig {
    /// Derive controller settings from the application configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let voice = &config.voice;
        Self {
            language: voice.language.clone(),
            wake_phrases: voice.wake_phrases.clone(),
            recording_secs: voice.recording_secs,
            restart_delay: Duration::from_millis(voice.restart_delay_ms),
            error_backoff: Duration::from_millis(voice.error_backoff_ms),
            resume_delay: Duration::from_millis(voice.resume_delay_ms),
            processing_timeout: Duration::from_secs(config.backend.timeout_secs),
            preferred_voice: voice.preferred_voice.clone(),
            session_id: config
                .backend
                .per_session_ids
                .then(|| uuid::Uuid::new_v4().to_string()),
            capture: CaptureConstraints::default(),
        }
    }
}

/// Platform capabilities and the processing backend
#[derive(Clone)]
pub struct Providers {
    pub recognition: Arc<dyn SpeechRecognitionProvider>,
    pub capture: Arc<dyn MediaCaptureProvider>,
    pub synthesis: Arc<dyn SpeechSynthesisProvider>,
    pub backend: Arc<dyn ProcessingBackend>,
}

/// The voice interaction state machine
pub struct VoiceController {
    shared: Shared,
    rx: mpsc::UnboundedReceiver<ControllerEvent>,
    listening: ListeningManager,
    recording: RecordingSession,
    processing: ProcessingClient,
    playback: SpeechPlayback,
    router: IntentRouter,
    error_backoff: Duration,
    resume_delay: Duration,
}

impl VoiceController {
    /// Create a controller
    ///
    /// # Errors
    ///
    /// Returns error if no usable wake phrase is configured or the recording budget is zero
    pub fn new(config: ControllerConfig, providers: Providers, router: IntentRouter) -> Result<Self> {
        if config.recording_secs == 0 {
            return Err(Error::Config("recording budget must be positive".to_string()));
        }
        let matcher = WakePhraseMatcher::new(config.wake_phrases)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            state: SessionStore::new(),
            timers: TimerSet::new(tx.clone()),
            events: tx,
        };

        Ok(Self {
            shared,
            rx,
            listening: ListeningManager::new(
                providers.recognition,
                &config.language,
                matcher,
                config.restart_delay,
                config.error_backoff,
            ),
            recording: RecordingSession::new(
                providers.capture,
                config.capture,
                config.recording_secs,
            ),
            processing: ProcessingClient::new(
                providers.backend,
                config.processing_timeout,
                config.session_id,
            ),
            playback: SpeechPlayback::new(
                providers.synthesis,
                config.language,
                config.preferred_voice,
            ),
            router,
            error_backoff: config.error_backoff,
            resume_delay: config.resume_delay,
        })
    }

    /// Run the controller on its own task
    #[must_use]
    pub fn spawn(self) -> ControllerHandle {
        let handle = ControllerHandle {
            inner: Arc::new(HandleInner {
                events: self.shared.events.clone(),
            }),
            state: self.shared.state.subscribe(),
        };
        tokio::spawn(self.run());
        handle
    }

    /// Apply events until shutdown
    pub async fn run(mut self) {
        tracing::info!("voice controller started");
        self.start_listening();

        while let Some(event) = self.rx.recv().await {
            if !self.handle_event(event) {
                break;
            }
            debug_assert!(
                self.active_stages() <= 1,
                "more than one stage holds audio resources"
            );
        }

        self.teardown();
        tracing::info!("voice controller stopped");
    }

    fn handle_event(&mut self, event: ControllerEvent) -> bool {
        match event {
            ControllerEvent::Command(command) => return self.handle_command(command),
            ControllerEvent::Recognition { session, event } => {
                let busy = self.is_busy();
                let outcome = self
                    .listening
                    .handle_event(&mut self.shared, session, event, busy);
                if let ListeningOutcome::WakePhrase(_) = outcome {
                    self.begin_recording();
                }
            }
            ControllerEvent::Timer { kind, token } => self.on_timer(kind, token),
            ControllerEvent::CaptureReady { attempt, result } => {
                if let AcquireOutcome::Failed(message) =
                    self.recording.on_acquired(&mut self.shared, attempt, result)
                {
                    self.recover(message);
                }
            }
            ControllerEvent::ProcessingDone { request, result } => {
                if let Some(result) = self.processing.on_done(request, result) {
                    self.after_processing(result);
                }
            }
            ControllerEvent::PlaybackDone { utterance, result } => {
                if self.playback.on_done(utterance) {
                    self.after_playback(result);
                }
            }
        }
        true
    }

    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::StartListening => {
                if self.listening.is_suspended() {
                    tracing::info!("listening resumed");
                }
                self.listening.resume();
                self.start_listening();
            }
            Command::StopListening => self.listening.stop(&mut self.shared),
            Command::TriggerRecording => self.begin_recording(),
            Command::StopRecording => {
                if let Some(outcome) = self.recording.end(&mut self.shared) {
                    self.after_recording(outcome);
                }
            }
            Command::SubmitText(text) => {
                if self.is_busy() {
                    tracing::debug!(phase = %self.shared.state.phase(), "text ignored, controller busy");
                } else {
                    self.listening.resume();
                    self.listening.release(&mut self.shared);
                    self.processing
                        .submit(&mut self.shared, Submission::Text(text));
                }
            }
            Command::Reset => {
                self.teardown();
                self.shared.state.clear_error();
                self.listening.resume();
                self.start_listening();
            }
            Command::Shutdown(ack) => {
                self.teardown();
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
                return false;
            }
        }
        true
    }

    fn on_timer(&mut self, kind: TimerKind, token: u64) {
        if !self.shared.timers.accept(kind, token) {
            tracing::trace!(?kind, token, "stale timer tick ignored");
            return;
        }

        match kind {
            TimerKind::ListenRestart => self.start_listening(),
            TimerKind::Countdown => self.recording.on_countdown_tick(&mut self.shared),
            TimerKind::RecordingTimeout => {
                if let Some(outcome) = self.recording.on_timeout(&mut self.shared) {
                    self.after_recording(outcome);
                }
            }
        }
    }

    /// Recording, processing or speaking, or waiting on the microphone
    fn is_busy(&self) -> bool {
        self.shared.state.phase().is_busy() || self.recording.is_arming()
    }

    /// Number of stages currently holding the microphone, a backend request or the speaker
    fn active_stages(&self) -> usize {
        [
            self.listening.is_open(),
            self.recording.is_active(),
            self.processing.is_in_flight(),
            self.playback.is_speaking(),
        ]
        .into_iter()
        .filter(|active| *active)
        .count()
    }

    fn start_listening(&mut self) {
        let busy = self.is_busy();
        self.listening.start(&mut self.shared, busy);
    }

    fn begin_recording(&mut self) {
        if self.is_busy() {
            tracing::debug!(phase = %self.shared.state.phase(), "recording trigger ignored, controller busy");
            return;
        }
        // A new interaction lifts an explicit pause so the cycle ends back in Listening
        self.listening.resume();
        self.listening.release(&mut self.shared);
        self.recording.begin(&mut self.shared);
    }

    fn after_recording(&mut self, outcome: RecordingOutcome) {
        match outcome {
            RecordingOutcome::Captured(audio) => {
                self.processing
                    .submit(&mut self.shared, Submission::Audio(audio));
            }
            RecordingOutcome::Empty => self.recover(EMPTY_RECORDING_MESSAGE.to_string()),
        }
    }

    fn after_processing(&mut self, result: Result<ProcessReply>) {
        if self.shared.state.phase() != Phase::Processing {
            tracing::debug!(phase = %self.shared.state.phase(), "reply arrived outside processing, ignored");
            return;
        }

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "processing failed");
                self.recover(PROCESSING_FAILED_MESSAGE.to_string());
                return;
            }
        };

        let intent = reply.intent.filter(|i| !i.trim().is_empty());
        tracing::info!(
            intent = intent.as_deref().unwrap_or("none"),
            confidence = reply.confidence,
            "processing complete"
        );

        if !reply.transcript.trim().is_empty() {
            self.shared
                .state
                .set_transcript(reply.transcript.trim().to_string());
        }
        self.shared
            .state
            .set_reply(intent.clone(), reply.fulfillment_text.clone());

        if let Some(intent) = &intent {
            self.router.route(intent);
        }

        let text = reply.fulfillment_text.trim();
        if !text.is_empty() && self.playback.speak(&mut self.shared, text) {
            return;
        }

        self.shared.state.set_phase(Phase::Idle);
        self.listening
            .schedule_restart(&mut self.shared, self.resume_delay);
    }

    fn after_playback(&mut self, result: Result<()>) {
        if let Err(e) = result {
            tracing::warn!(error = %e, "playback failed");
        }
        if self.shared.state.phase() == Phase::Speaking {
            self.shared.state.set_phase(Phase::Idle);
        }
        self.listening
            .schedule_restart(&mut self.shared, self.resume_delay);
    }

    /// Surface `message`, return to idle and re-arm listening after the error backoff
    fn recover(&mut self, message: String) {
        self.shared.state.set_error(message);
        self.shared.state.set_phase(Phase::Idle);
        self.listening
            .schedule_restart(&mut self.shared, self.error_backoff);
    }

    /// Release every resource synchronously
    fn teardown(&mut self) {
        self.listening.release(&mut self.shared);
        self.shared.timers.cancel_all();
        self.playback.cancel();
        self.recording.teardown(&mut self.shared);
        self.processing.cancel();
        self.shared.state.set_phase(Phase::Idle);
        tracing::debug!("voice session torn down");
    }
}

struct HandleInner {
    events: EventSender,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        let _ = self
            .events
            .send(ControllerEvent::Command(Command::Shutdown(None)));
    }
}

/// Handle to a running controller
///
/// Cloning shares the controller; when the last clone is dropped the controller
/// tears down.
#[derive(Clone)]
pub struct ControllerHandle {
    inner: Arc<HandleInner>,
    state: watch::Receiver<VoiceSessionState>,
}

impl ControllerHandle {
    /// Subscribe to state snapshots
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<VoiceSessionState> {
        self.state.clone()
    }

    /// Current state snapshot
    #[must_use]
    pub fn state(&self) -> VoiceSessionState {
        self.state.borrow().clone()
    }

    /// Resume listening after an explicit stop
    ///
    /// # Errors
    ///
    /// Returns error if the controller has stopped
    pub fn start_listening(&self) -> Result<()> {
        self.send(Command::StartListening)
    }

    /// Stop listening and pause auto-restart
    ///
    /// # Errors
    ///
    /// Returns error if the controller has stopped
    pub fn stop_listening(&self) -> Result<()> {
        self.send(Command::StopListening)
    }

    /// Start recording as if the wake phrase was heard
    ///
    /// # Errors
    ///
    /// Returns error if the controller has stopped
    pub fn trigger_recording(&self) -> Result<()> {
        self.send(Command::TriggerRecording)
    }

    /// End the current recording early
    ///
    /// # Errors
    ///
    /// Returns error if the controller has stopped
    pub fn stop_recording(&self) -> Result<()> {
        self.send(Command::StopRecording)
    }

    /// Submit typed text
    ///
    /// # Errors
    ///
    /// Returns `EmptyInput` for blank text, or error if the controller has stopped
    pub fn submit_text(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyInput);
        }
        self.send(Command::SubmitText(text.to_string()))
    }

    /// Tear everything down and start listening again
    ///
    /// # Errors
    ///
    /// Returns error if the controller has stopped
    pub fn reset(&self) -> Result<()> {
        self.send(Command::Reset)
    }

    /// Tear down and stop the controller, waiting until resources are released
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Shutdown(Some(tx))).is_ok() {
            let _ = rx.await;
        }
    }

    /// Whether the controller task has exited
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.events.is_closed()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.inner
            .events
            .send(ControllerEvent::Command(command))
            .map_err(|_| Error::ControllerStopped)
    }
}
