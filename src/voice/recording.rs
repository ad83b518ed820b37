//! Recording session
//!
//! Captures a bounded window of microphone audio. A one-second interval drives
//! the visible countdown and a single terminal timer forces the end of the
//! window. The hardware tracks are always stopped before leaving `Recording`.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::controller::{ControllerEvent, Shared};
use super::provider::{AudioPayload, CaptureConstraints, MediaCaptureProvider, MediaStream};
use super::timers::TimerKind;
use super::Phase;
use crate::error::CaptureError;

/// Message shown when a recording produced no audio
pub const EMPTY_RECORDING_MESSAGE: &str = "No se capturó audio. Intenta hablar de nuevo.";

/// Result of a microphone grant
pub(crate) enum AcquireOutcome {
    /// The grant belonged to an abandoned attempt and was released
    Stale,
    /// Recording is running
    Started,
    /// No recording could start; carries the user-visible message
    Failed(String),
}

/// Result of ending a recording
#[derive(Debug)]
pub(crate) enum RecordingOutcome {
    Captured(AudioPayload),
    Empty,
}

struct Arming {
    attempt: u64,
    task: JoinHandle<()>,
}

struct ActiveRecording {
    attempt: u64,
    stream: Box<dyn MediaStream>,
}

pub(crate) struct RecordingSession {
    provider: Arc<dyn MediaCaptureProvider>,
    constraints: CaptureConstraints,
    budget_secs: u32,
    arming: Option<Arming>,
    active: Option<ActiveRecording>,
    next_attempt: u64,
}

impl RecordingSession {
    pub(crate) fn new(
        provider: Arc<dyn MediaCaptureProvider>,
        constraints: CaptureConstraints,
        budget_secs: u32,
    ) -> Self {
        Self {
            provider,
            constraints,
            budget_secs,
            arming: None,
            active: None,
            next_attempt: 0,
        }
    }

    /// A microphone request is outstanding
    pub(crate) const fn is_arming(&self) -> bool {
        self.arming.is_some()
    }

    /// A recorder is running
    pub(crate) const fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Request the microphone; recording starts when the grant arrives
    ///
    /// The caller must already have released the recognition session. Returns
    /// false when a recording is already arming or running.
    pub(crate) fn begin(&mut self, shared: &mut Shared) -> bool {
        if self.arming.is_some() || self.active.is_some() {
            tracing::debug!("recording already in progress, begin ignored");
            return false;
        }
        if shared.state.phase().is_busy() {
            tracing::debug!(phase = %shared.state.phase(), "controller busy, begin ignored");
            return false;
        }

        shared.state.clear_error();
        self.next_attempt += 1;
        let attempt = self.next_attempt;

        let provider = Arc::clone(&self.provider);
        let constraints = self.constraints.clone();
        let events = shared.events.clone();
        let task = tokio::spawn(async move {
            let result = provider.acquire(&constraints).await;
            let _ = events.send(ControllerEvent::CaptureReady { attempt, result });
        });

        tracing::debug!(attempt, "requesting microphone");
        self.arming = Some(Arming { attempt, task });
        true
    }

    /// Apply a microphone grant or refusal
    pub(crate) fn on_acquired(
        &mut self,
        shared: &mut Shared,
        attempt: u64,
        result: Result<Box<dyn MediaStream>, CaptureError>,
    ) -> AcquireOutcome {
        if self.arming.as_ref().is_none_or(|a| a.attempt != attempt) {
            tracing::debug!(attempt, "stale microphone grant released");
            if let Ok(mut stream) = result {
                stream.stop_tracks();
            }
            return AcquireOutcome::Stale;
        }
        self.arming = None;

        let mut stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(attempt, error = %e, "microphone acquisition failed");
                return AcquireOutcome::Failed(e.user_message().to_string());
            }
        };

        if let Err(e) = stream.start_recorder() {
            tracing::warn!(attempt, error = %e, "recorder failed to start");
            stream.stop_tracks();
            return AcquireOutcome::Failed(e.user_message().to_string());
        }

        self.active = Some(ActiveRecording { attempt, stream });
        shared.state.set_phase(Phase::Recording);
        shared.state.set_countdown(self.budget_secs);
        shared
            .timers
            .schedule_repeating(TimerKind::Countdown, Duration::from_secs(1));
        shared.timers.schedule_once(
            TimerKind::RecordingTimeout,
            Duration::from_secs(u64::from(self.budget_secs)),
        );

        tracing::info!(attempt, budget_secs = self.budget_secs, "recording started");
        AcquireOutcome::Started
    }

    /// One countdown tick
    pub(crate) fn on_countdown_tick(&self, shared: &mut Shared) {
        if shared.state.phase() != Phase::Recording {
            shared.timers.cancel(TimerKind::Countdown);
            return;
        }

        let remaining = shared.state.countdown().saturating_sub(1);
        shared.state.set_countdown(remaining);
        tracing::trace!(remaining, "recording countdown");

        if remaining == 0 {
            shared.timers.cancel(TimerKind::Countdown);
        }
    }

    /// The recording window elapsed
    pub(crate) fn on_timeout(&mut self, shared: &mut Shared) -> Option<RecordingOutcome> {
        if shared.state.phase() == Phase::Recording {
            shared.state.set_countdown(0);
            tracing::debug!("recording window elapsed");
        }
        self.end(shared)
    }

    /// End the recording; a no-op unless recording
    pub(crate) fn end(&mut self, shared: &mut Shared) -> Option<RecordingOutcome> {
        if shared.state.phase() != Phase::Recording {
            tracing::trace!(phase = %shared.state.phase(), "end ignored, not recording");
            return None;
        }
        let ActiveRecording { attempt, mut stream } = self.active.take()?;

        shared.timers.cancel(TimerKind::Countdown);
        shared.timers.cancel(TimerKind::RecordingTimeout);

        let payload = stream.stop_recorder();
        stream.stop_tracks();
        drop(stream);

        tracing::info!(attempt, bytes = payload.bytes.len(), "recording finished");

        if payload.is_empty() {
            Some(RecordingOutcome::Empty)
        } else {
            Some(RecordingOutcome::Captured(payload))
        }
    }

    /// Abandon any pending grant and release any running stream
    pub(crate) fn teardown(&mut self, shared: &mut Shared) {
        shared.timers.cancel(TimerKind::Countdown);
        shared.timers.cancel(TimerKind::RecordingTimeout);

        if let Some(arming) = self.arming.take() {
            arming.task.abort();
            tracing::debug!(attempt = arming.attempt, "microphone request abandoned");
        }

        if let Some(ActiveRecording { attempt, mut stream }) = self.active.take() {
            let _ = stream.stop_recorder();
            stream.stop_tracks();
            tracing::debug!(attempt, "recording discarded");
        }
    }
}
