//! State shared between the session task (single writer) and readers

use super::events::{SessionEvent, StopCause};
use super::state::SessionState;
use crate::core::FailureReason;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug)]
struct Status {
    state: SessionState,
    attempt_count: u32,
    /// Monotonic start of the current (or last) streaming period
    connected_since: Option<Instant>,
    /// Wall clock time of the last successful open
    connected_at: Option<SystemTime>,
    subscription_id: Option<u64>,
    failure: Option<FailureReason>,
    stop_cause: Option<StopCause>,
}

/// Extra data recorded with a transition
#[derive(Debug, Default)]
pub(crate) struct Transition {
    pub attempt: u32,
    pub delay: Option<Duration>,
    pub reason: Option<String>,
    pub subscription_id: Option<u64>,
    pub failure: Option<FailureReason>,
    pub stop_cause: Option<StopCause>,
}

pub(crate) struct SessionShared {
    status: RwLock<Status>,
    max_attempts: u32,
    messages_received: AtomicU64,
    total_attempts: AtomicU64,
    subscriptions_opened: AtomicU64,
    state_tx: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionShared {
    pub(crate) fn new(max_attempts: u32, event_buffer: usize) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (events, _) = broadcast::channel(event_buffer.max(1));

        Self {
            status: RwLock::new(Status {
                state: SessionState::Idle,
                attempt_count: 0,
                connected_since: None,
                connected_at: None,
                subscription_id: None,
                failure: None,
                stop_cause: None,
            }),
            max_attempts,
            messages_received: AtomicU64::new(0),
            total_attempts: AtomicU64::new(0),
            subscriptions_opened: AtomicU64::new(0),
            state_tx,
            events,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.status.read().state
    }

    /// Apply a transition and publish it. Edges outside the state diagram
    /// are refused and leave the state unchanged.
    pub(crate) fn transition(&self, next: SessionState, detail: Transition) -> bool {
        let event = {
            let mut status = self.status.write();
            let previous = status.state;

            if !previous.can_transition_to(next) {
                error!(
                    from = %previous,
                    to = %next,
                    "refusing invalid session transition"
                );
                return false;
            }

            let uptime = if previous == SessionState::Streaming {
                status.connected_since.map(|since| since.elapsed())
            } else {
                None
            };

            if next == SessionState::Streaming {
                status.connected_since = Some(Instant::now());
                status.connected_at = Some(SystemTime::now());
                self.subscriptions_opened.fetch_add(1, Ordering::Relaxed);
            }

            status.state = next;
            status.attempt_count = detail.attempt;
            status.subscription_id = detail.subscription_id;
            if let Some(failure) = detail.failure {
                status.failure = Some(failure);
            }
            if let Some(cause) = detail.stop_cause {
                status.stop_cause = Some(cause);
            }

            SessionEvent {
                state: next,
                previous,
                attempt: detail.attempt,
                delay: detail.delay,
                uptime,
                reason: detail.reason,
                subscription_id: detail.subscription_id,
                at: SystemTime::now(),
            }
        };

        log_event(&event, self.max_attempts);

        // Event first: whoever wakes on the state watch has every event
        let _ = self.events.send(event);
        self.state_tx.send_replace(next);
        true
    }

    pub(crate) fn set_attempt(&self, attempt: u32) {
        self.status.write().attempt_count = attempt;
    }

    pub(crate) fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_attempt(&self) {
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        let status = self.status.read();
        let uptime = match (status.state, status.connected_since) {
            (SessionState::Streaming, Some(since)) => since.elapsed(),
            _ => Duration::ZERO,
        };

        SessionSnapshot {
            state: status.state,
            attempt_count: status.attempt_count,
            max_attempts: self.max_attempts,
            uptime,
            connected_at: status.connected_at,
            subscription_id: status.subscription_id,
            messages_received: self.messages_received.load(Ordering::Relaxed),
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
            subscriptions_opened: self.subscriptions_opened.load(Ordering::Relaxed),
            failure: status.failure.clone(),
            stop_cause: status.stop_cause,
        }
    }
}

fn log_event(event: &SessionEvent, max_attempts: u32) {
    let delay_ms = event.delay.map(|d| d.as_millis() as u64);
    let uptime_ms = event.uptime.map(|d| d.as_millis() as u64);
    let reason = event.reason.as_deref().unwrap_or("");

    match event.state {
        SessionState::Backoff => warn!(
            state = %event.state,
            attempt = event.attempt,
            max_attempts,
            delay_ms,
            uptime_ms,
            reason,
            "subscription lost, backing off"
        ),
        SessionState::Failed => error!(
            state = %event.state,
            attempt = event.attempt,
            uptime_ms,
            reason,
            "session failed, operator action required"
        ),
        _ => info!(
            state = %event.state,
            from = %event.previous,
            attempt = event.attempt,
            subscription_id = event.subscription_id,
            uptime_ms,
            reason,
            "session transition"
        ),
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// Zero unless streaming
    pub uptime: Duration,
    pub connected_at: Option<SystemTime>,
    pub subscription_id: Option<u64>,
    pub messages_received: u64,
    /// Reconnection attempts over the whole session lifetime
    pub total_attempts: u64,
    pub subscriptions_opened: u64,
    pub failure: Option<FailureReason>,
    pub stop_cause: Option<StopCause>,
}

/// Read-only view handed to reporters and exporters
#[derive(Clone)]
pub struct SessionObserver {
    shared: Arc<SessionShared>,
}

impl SessionObserver {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
        Self { shared }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.watch_state()
    }
}
