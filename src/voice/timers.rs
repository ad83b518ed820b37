//! Pending timers of the voice session
//!
//! Each timer kind has at most one live timer. Scheduling a kind cancels the
//! previous timer of that kind first, and every tick carries a token so a tick
//! queued by a cancelled timer is recognised as stale.

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::controller::{ControllerEvent, EventSender};

/// Timer kinds owned by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Re-open the recognition session
    ListenRestart,
    /// One-second recording countdown tick
    Countdown,
    /// Forced end of the recording window
    RecordingTimeout,
}

struct PendingTimer {
    token: u64,
    repeating: bool,
    handle: JoinHandle<()>,
}

/// The `pendingTimers` set
pub(crate) struct TimerSet {
    events: EventSender,
    pending: HashMap<TimerKind, PendingTimer>,
    next_token: u64,
}

impl TimerSet {
    pub(crate) fn new(events: EventSender) -> Self {
        Self {
            events,
            pending: HashMap::new(),
            next_token: 0,
        }
    }

    /// Fire `kind` once after `delay`
    pub(crate) fn schedule_once(&mut self, kind: TimerKind, delay: Duration) {
        self.cancel(kind);
        let token = self.issue_token();
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ControllerEvent::Timer { kind, token });
        });

        tracing::trace!(?kind, token, delay_ms = delay.as_millis(), "timer scheduled");
        self.pending.insert(
            kind,
            PendingTimer {
                token,
                repeating: false,
                handle,
            },
        );
    }

    /// Fire `kind` every `period`, first tick one period from now
    pub(crate) fn schedule_repeating(&mut self, kind: TimerKind, period: Duration) {
        self.cancel(kind);
        let token = self.issue_token();
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                interval.tick().await;
                if events.send(ControllerEvent::Timer { kind, token }).is_err() {
                    break;
                }
            }
        });

        tracing::trace!(?kind, token, period_ms = period.as_millis(), "interval scheduled");
        self.pending.insert(
            kind,
            PendingTimer {
                token,
                repeating: true,
                handle,
            },
        );
    }

    /// Cancel the timer of `kind`; returns whether one was pending
    pub(crate) fn cancel(&mut self, kind: TimerKind) -> bool {
        self.pending.remove(&kind).is_some_and(|timer| {
            timer.handle.abort();
            tracing::trace!(?kind, token = timer.token, "timer cancelled");
            true
        })
    }

    /// Cancel every pending timer
    pub(crate) fn cancel_all(&mut self) {
        for (kind, timer) in self.pending.drain() {
            timer.handle.abort();
            tracing::trace!(?kind, token = timer.token, "timer cancelled");
        }
    }

    /// Whether a timer of `kind` is live
    pub(crate) fn is_pending(&self, kind: TimerKind) -> bool {
        self.pending.contains_key(&kind)
    }

    /// Number of live timers
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Validate a tick; one-shot timers are retired when they fire
    pub(crate) fn accept(&mut self, kind: TimerKind, token: u64) -> bool {
        let Some(timer) = self.pending.get(&kind) else {
            return false;
        };
        if timer.token != token {
            return false;
        }
        if !timer.repeating {
            self.pending.remove(&kind);
        }
        true
    }

    const fn issue_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rescheduling_invalidates_previous_tick() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerSet::new(tx);

        timers.schedule_once(TimerKind::ListenRestart, Duration::from_millis(100));
        timers.schedule_once(TimerKind::ListenRestart, Duration::from_millis(100));
        assert_eq!(timers.len(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        let Some(ControllerEvent::Timer { kind, token }) = rx.recv().await else {
            panic!("expected timer event");
        };
        assert!(timers.accept(kind, token));
        assert!(!timers.is_pending(TimerKind::ListenRestart));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_timer_ticks_until_cancelled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerSet::new(tx);

        timers.schedule_repeating(TimerKind::Countdown, Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(3500)).await;

        let mut ticks = 0;
        while let Ok(ControllerEvent::Timer { kind, token }) = rx.try_recv() {
            assert!(timers.accept(kind, token));
            ticks += 1;
        }
        assert_eq!(ticks, 3);
        assert!(timers.is_pending(TimerKind::Countdown));

        assert!(timers.cancel(TimerKind::Countdown));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_token_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timers = TimerSet::new(tx);
        timers.schedule_once(TimerKind::RecordingTimeout, Duration::from_secs(5));
        assert!(!timers.accept(TimerKind::RecordingTimeout, 999));
        assert!(!timers.accept(TimerKind::Countdown, 1));
        timers.cancel_all();
        assert_eq!(timers.len(), 0);
    }
}
