//! Prometheus metrics for a stream session
//!
//! Gauges and transition counters follow lifecycle events. Lifetime
//! counters (messages, subscriptions) are advanced from snapshots by delta,
//! so the exporter never needs a hook in the message path.

use crate::session::{SessionEvent, SessionObserver, SessionSnapshot, SessionState};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const NAMESPACE: &str = "feedline";

#[derive(Debug, Default)]
struct Seen {
    messages: u64,
    subscriptions: u64,
}

pub struct SessionMetrics {
    registry: Registry,
    /// Numeric `SessionState::code`
    pub state: IntGauge,
    pub attempt: IntGauge,
    pub uptime_seconds: Gauge,
    pub messages_total: IntCounter,
    pub transitions_total: IntCounterVec,
    pub subscriptions_opened_total: IntCounter,
    pub backoff_seconds: Histogram,
    seen: Mutex<Seen>,
}

impl SessionMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let state = IntGauge::with_opts(
            Opts::new("session_state", "Current session state code (0 idle .. 5 stopped)")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(state.clone()))?;

        let attempt = IntGauge::with_opts(
            Opts::new("session_attempt", "Reconnection attempts in the current failure run")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(attempt.clone()))?;

        let uptime_seconds = Gauge::with_opts(
            Opts::new("session_uptime_seconds", "Time spent in the current streaming period")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let messages_total = IntCounter::with_opts(
            Opts::new("messages_total", "Messages forwarded to the consumer").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        let transitions_total = IntCounterVec::new(
            Opts::new("transitions_total", "Session state transitions by target state")
                .namespace(NAMESPACE),
            &["state"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        let subscriptions_opened_total = IntCounter::with_opts(
            Opts::new("subscriptions_opened_total", "Subscriptions successfully opened")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(subscriptions_opened_total.clone()))?;

        let backoff_seconds = Histogram::with_opts(
            HistogramOpts::new("backoff_seconds", "Backoff delays before reconnecting")
                .namespace(NAMESPACE)
                .buckets(vec![0.1, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0]),
        )?;
        registry.register(Box::new(backoff_seconds.clone()))?;

        Ok(Self {
            registry,
            state,
            attempt,
            uptime_seconds,
            messages_total,
            transitions_total,
            subscriptions_opened_total,
            backoff_seconds,
            seen: Mutex::new(Seen::default()),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn observe_event(&self, event: &SessionEvent) {
        self.state.set(event.state.code());
        self.attempt.set(i64::from(event.attempt));
        self.transitions_total
            .with_label_values(&[event.state.name()])
            .inc();

        if let Some(delay) = event.delay {
            self.backoff_seconds.observe(delay.as_secs_f64());
        }
        if event.state != SessionState::Streaming {
            self.uptime_seconds.set(0.0);
        }
    }

    pub fn record_snapshot(&self, snapshot: &SessionSnapshot) {
        self.state.set(snapshot.state.code());
        self.attempt.set(i64::from(snapshot.attempt_count));
        self.uptime_seconds.set(snapshot.uptime.as_secs_f64());

        let mut seen = self.seen.lock();
        if snapshot.messages_received > seen.messages {
            self.messages_total
                .inc_by(snapshot.messages_received - seen.messages);
            seen.messages = snapshot.messages_received;
        }
        if snapshot.subscriptions_opened > seen.subscriptions {
            self.subscriptions_opened_total
                .inc_by(snapshot.subscriptions_opened - seen.subscriptions);
            seen.subscriptions = snapshot.subscriptions_opened;
        }
    }

    /// Forget counter baselines before following a replacement session,
    /// whose lifetime counters start again from zero
    pub fn rebase(&self) {
        *self.seen.lock() = Seen::default();
    }

    /// A session only counts as healthy while it is streaming
    pub fn is_streaming(&self) -> bool {
        self.state.get() == SessionState::Streaming.code()
    }

    /// Encode all metrics in Prometheus text format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;

        String::from_utf8(buffer).context("Invalid UTF-8 in metrics")
    }

    /// Follow a session's events until it terminates
    ///
    /// Lagging behind the broadcast only loses transition counts; gauges and
    /// counters are resynchronised from a snapshot on every wakeup.
    pub fn follow(self: Arc<Self>, observer: SessionObserver) -> JoinHandle<()> {
        let mut events = observer.subscribe();
        self.record_snapshot(&observer.snapshot());

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        self.observe_event(&event);
                        self.record_snapshot(&observer.snapshot());
                        if event.is_terminal() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "metrics fell behind session events");
                        self.record_snapshot(&observer.snapshot());
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("metrics stopped following session");
        })
    }
}
