//! Session state: the single source of truth for one controller
//!
//! The controller task is the only writer. Presentation layers subscribe to
//! snapshots through a `watch` channel and never mutate state directly.

use serde::Serialize;
use tokio::sync::watch;

use super::Phase;

/// Snapshot of the voice session published to subscribers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSessionState {
    /// Current operating phase
    pub phase: Phase,

    /// Whether a recognition session is currently open
    pub recognition_open: bool,

    /// Remaining seconds of the active recording window (0 outside `Recording`)
    pub countdown: u32,

    /// Most recent recognized utterance
    pub last_transcript: Option<String>,

    /// Intent of the most recent successful backend reply
    pub last_intent: Option<String>,

    /// Reply text of the most recent successful backend reply
    pub last_reply_text: Option<String>,

    /// Last user-visible failure message
    pub error: Option<String>,
}

/// Owner side of the session state
pub(crate) struct SessionStore {
    tx: watch::Sender<VoiceSessionState>,
}

impl SessionStore {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(VoiceSessionState::default());
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<VoiceSessionState> {
        self.tx.subscribe()
    }

    pub(crate) fn snapshot(&self) -> VoiceSessionState {
        self.tx.borrow().clone()
    }

    pub(crate) fn phase(&self) -> Phase {
        self.tx.borrow().phase
    }

    pub(crate) fn countdown(&self) -> u32 {
        self.tx.borrow().countdown
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.tx.send_if_modified(|state| {
            if state.phase == phase {
                return false;
            }
            tracing::debug!(from = %state.phase, to = %phase, "phase transition");
            state.phase = phase;
            if phase != Phase::Recording {
                state.countdown = 0;
            }
            true
        });
    }

    pub(crate) fn set_recognition_open(&self, open: bool) {
        self.tx.send_if_modified(|state| {
            let changed = state.recognition_open != open;
            state.recognition_open = open;
            changed
        });
    }

    pub(crate) fn set_countdown(&self, countdown: u32) {
        self.tx.send_if_modified(|state| {
            let changed = state.countdown != countdown;
            state.countdown = countdown;
            changed
        });
    }

    pub(crate) fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(error = %message, "voice session error");
        self.tx.send_modify(|state| state.error = Some(message));
    }

    pub(crate) fn clear_error(&self) {
        self.tx.send_if_modified(|state| state.error.take().is_some());
    }

    pub(crate) fn set_transcript(&self, transcript: String) {
        self.tx
            .send_modify(|state| state.last_transcript = Some(transcript));
    }

    pub(crate) fn set_reply(&self, intent: Option<String>, reply_text: String) {
        self.tx.send_modify(|state| {
            state.last_intent = intent;
            state.last_reply_text = Some(reply_text);
        });
    }
}
