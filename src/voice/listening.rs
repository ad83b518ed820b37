//! Continuous listening manager
//!
//! Keeps a recognition session open whenever the controller is not busy and
//! scans final results for a wake phrase. Recognition sessions end on their own
//! (timeouts, errors, explicit stops); every end schedules a fresh session so the
//! loop appears continuous.

use std::sync::Arc;
use std::time::Duration;

use super::controller::Shared;
use super::provider::{
    RecognitionEvent, RecognitionOptions, RecognitionSegment, RecognitionSession, RecognitionSink,
    SpeechRecognitionProvider,
};
use super::timers::TimerKind;
use super::wake::WakePhraseMatcher;
use super::Phase;
use crate::error::RecognitionErrorKind;

/// What a recognition event asks the controller to do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ListeningOutcome {
    Continue,
    WakePhrase(String),
}

struct OpenSession {
    id: u64,
    handle: Box<dyn RecognitionSession>,
    stopping: bool,
}

pub(crate) struct ListeningManager {
    provider: Arc<dyn SpeechRecognitionProvider>,
    options: RecognitionOptions,
    matcher: WakePhraseMatcher,
    session: Option<OpenSession>,
    next_session: u64,
    suspended: bool,
    restart_delay: Duration,
    error_backoff: Duration,
}

impl ListeningManager {
    pub(crate) fn new(
        provider: Arc<dyn SpeechRecognitionProvider>,
        language: &str,
        matcher: WakePhraseMatcher,
        restart_delay: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            provider,
            options: RecognitionOptions {
                language: language.to_string(),
                continuous: true,
                interim_results: true,
            },
            matcher,
            session: None,
            next_session: 0,
            suspended: false,
            restart_delay,
            error_backoff,
        }
    }

    /// Whether a recognition session is open
    pub(crate) const fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Whether auto-restart is paused by an explicit stop
    pub(crate) const fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Open a session unless busy, already open or suspended
    pub(crate) fn start(&mut self, shared: &mut Shared, busy: bool) {
        if busy {
            tracing::trace!(phase = %shared.state.phase(), "listen start deferred, controller busy");
            return;
        }
        if self.session.is_some() {
            tracing::trace!("listen start ignored, session already open");
            return;
        }
        if self.suspended {
            tracing::trace!("listen start ignored, listening suspended");
            return;
        }

        shared.timers.cancel(TimerKind::ListenRestart);
        self.next_session += 1;
        let id = self.next_session;
        let sink = RecognitionSink::new(id, shared.events.clone());

        match self.provider.open(&self.options, sink) {
            Ok(handle) => {
                tracing::debug!(session = id, language = %self.options.language, "recognition session opened");
                self.session = Some(OpenSession {
                    id,
                    handle,
                    stopping: false,
                });
                shared.state.set_recognition_open(true);
            }
            Err(kind) => {
                tracing::warn!(session = id, error = %kind, "failed to open recognition session");
                self.report_error(shared, &kind);
                self.schedule_restart(shared, self.backoff_for(&kind));
            }
        }
    }

    /// Explicit user stop: request the session to end and pause auto-restart
    pub(crate) fn stop(&mut self, shared: &mut Shared) {
        self.suspended = true;
        shared.timers.cancel(TimerKind::ListenRestart);

        if let Some(session) = self.session.as_mut() {
            if !session.stopping {
                tracing::debug!(session = session.id, "stopping recognition session");
                session.stopping = true;
                session.handle.stop();
            }
        }
    }

    /// Lift an explicit stop; also called when the user starts a new interaction
    pub(crate) const fn resume(&mut self) {
        self.suspended = false;
    }

    /// Tear down the open session synchronously and forget it
    ///
    /// Used when another stage takes the microphone, and on teardown. Events the
    /// aborted session still delivers are ignored as stale.
    pub(crate) fn release(&mut self, shared: &mut Shared) {
        shared.timers.cancel(TimerKind::ListenRestart);

        if let Some(mut session) = self.session.take() {
            tracing::debug!(session = session.id, "recognition session released");
            session.handle.abort();
        }
        shared.state.set_recognition_open(false);
        if shared.state.phase() == Phase::Listening {
            shared.state.set_phase(Phase::Idle);
        }
    }

    /// Schedule a new session after `delay`, replacing any pending restart
    pub(crate) fn schedule_restart(&self, shared: &mut Shared, delay: Duration) {
        if self.suspended {
            return;
        }
        tracing::trace!(delay_ms = delay.as_millis(), "listen restart scheduled");
        shared.timers.schedule_once(TimerKind::ListenRestart, delay);
    }

    /// Apply one recognition event
    pub(crate) fn handle_event(
        &mut self,
        shared: &mut Shared,
        session_id: u64,
        event: RecognitionEvent,
        busy: bool,
    ) -> ListeningOutcome {
        let Some(session) = self.session.as_ref() else {
            tracing::trace!(session = session_id, "event for closed recognition session ignored");
            return ListeningOutcome::Continue;
        };
        if session.id != session_id {
            tracing::trace!(
                session = session_id,
                current = session.id,
                "stale recognition event ignored"
            );
            return ListeningOutcome::Continue;
        }

        match event {
            RecognitionEvent::Started => {
                if !busy && !session.stopping {
                    shared.state.clear_error();
                    shared.state.set_phase(Phase::Listening);
                    tracing::info!(session = session_id, "listening for wake phrase");
                }
                ListeningOutcome::Continue
            }
            RecognitionEvent::Results(segments) => self.on_results(shared, &segments, busy),
            RecognitionEvent::Error(kind) => {
                if busy {
                    tracing::debug!(error = %kind, "recognition error while busy");
                    return ListeningOutcome::Continue;
                }
                self.report_error(shared, &kind);
                self.schedule_restart(shared, self.backoff_for(&kind));
                ListeningOutcome::Continue
            }
            RecognitionEvent::Ended => {
                tracing::debug!(session = session_id, "recognition session ended");
                self.session = None;
                shared.state.set_recognition_open(false);
                if shared.state.phase() == Phase::Listening {
                    shared.state.set_phase(Phase::Idle);
                }
                if !busy && !shared.timers.is_pending(TimerKind::ListenRestart) {
                    self.schedule_restart(shared, self.restart_delay);
                }
                ListeningOutcome::Continue
            }
        }
    }

    fn on_results(
        &self,
        shared: &Shared,
        segments: &[RecognitionSegment],
        busy: bool,
    ) -> ListeningOutcome {
        let finals: Vec<&str> = segments
            .iter()
            .filter(|s| s.is_final)
            .map(|s| s.transcript.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if finals.is_empty() {
            return ListeningOutcome::Continue;
        }

        let transcript = finals.join(" ").to_lowercase();
        tracing::debug!(transcript = %transcript, "final recognition result");
        shared.state.set_transcript(transcript.clone());

        if busy {
            return ListeningOutcome::Continue;
        }

        match self.matcher.find(&transcript) {
            Some(phrase) => {
                tracing::info!(wake_phrase = phrase, transcript = %transcript, "wake phrase detected");
                ListeningOutcome::WakePhrase(phrase.to_string())
            }
            None => ListeningOutcome::Continue,
        }
    }

    fn report_error(&self, shared: &Shared, kind: &RecognitionErrorKind) {
        if kind.is_benign() {
            tracing::debug!(error = %kind, "transient recognition error, retrying");
        } else {
            shared.state.set_error(kind.user_message());
        }
    }

    fn backoff_for(&self, kind: &RecognitionErrorKind) -> Duration {
        if kind.is_benign() {
            self.restart_delay
        } else {
            self.error_backoff
        }
    }
}
