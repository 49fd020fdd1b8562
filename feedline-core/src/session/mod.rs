//! Resilient stream session
//!
//! A `Session` owns one logical subscription intent. It opens a
//! subscription, forwards its messages in order and, when the transport
//! fails, classifies the error and either reconnects after a jittered
//! backoff or stops in `Failed`. Several underlying subscriptions may be
//! used over its lifetime, never more than one at a time.
//!
//! # Usage
//!
//! ```no_run
//! use feedline_core::session::{Session, SessionSettings};
//! use feedline_core::core::{Credentials, Endpoint, SubscriptionKind, SubscriptionParams};
//! use feedline_core::transport::TcpTransport;
//! use std::sync::Arc;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let endpoint = Endpoint {
//!     address: "127.0.0.1:10000".to_string(),
//!     credentials: Credentials::none(),
//!     insecure: true,
//! };
//! let settings = SessionSettings::new(endpoint, SubscriptionParams::new(SubscriptionKind::Slots));
//! let session = Session::new(settings, Arc::new(TcpTransport::default()));
//!
//! let mut messages = session.start()?;
//! while let Some(message) = messages.recv().await {
//!     println!("{}", message.payload);
//! }
//! session.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod restart;
mod runner;
pub mod shared;
pub mod state;

pub use events::{SessionEvent, StopCause};
pub use restart::restart;
pub use shared::{SessionObserver, SessionSnapshot};
pub use state::SessionState;

use crate::core::{Endpoint, FailureReason, Message, SessionError, SubscriptionParams};
use crate::resilience::{BackoffPolicy, JitterSource, RandomJitter};
use crate::transport::Transport;
use parking_lot::Mutex;
use runner::SessionTask;
use shared::{SessionShared, Transition};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::error;

/// Everything a session needs to (re)open its subscription
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub endpoint: Endpoint,
    pub params: SubscriptionParams,
    /// Retry ceiling; exceeding it ends the session in `Failed`
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Streaming this long without a message still resets the attempt counter
    pub min_sustained: Duration,
    /// Treat a clean remote end as a retryable loss instead of stopping
    pub resubscribe_on_end: bool,
    /// Capacity of the ordered message channel
    pub message_buffer: usize,
    /// Capacity of the lifecycle event broadcast
    pub event_buffer: usize,
}

impl SessionSettings {
    pub fn new(endpoint: Endpoint, params: SubscriptionParams) -> Self {
        Self {
            endpoint,
            params,
            max_attempts: 10,
            backoff: BackoffPolicy::default(),
            min_sustained: Duration::from_secs(30),
            resubscribe_on_end: false,
            message_buffer: 1024,
            event_buffer: 256,
        }
    }
}

/// Ordered receiver for the messages of a session
pub type MessageStream = mpsc::Receiver<Message>;

enum Lifecycle {
    Pending {
        task: SessionTask,
        messages: MessageStream,
    },
    Running(JoinHandle<()>),
    Finished,
}

pub struct Session {
    shared: Arc<SessionShared>,
    stop_tx: watch::Sender<bool>,
    lifecycle: Mutex<Lifecycle>,
    /// Serialises concurrent `stop()` callers so each returns only after
    /// the task has exited
    stop_gate: tokio::sync::Mutex<()>,
}

impl Session {
    pub fn new(settings: SessionSettings, transport: Arc<dyn Transport>) -> Self {
        let shared = Arc::new(SessionShared::new(
            settings.max_attempts,
            settings.event_buffer,
        ));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (messages_tx, messages) = mpsc::channel(settings.message_buffer.max(1));

        let task = SessionTask::new(
            settings,
            transport,
            Box::new(RandomJitter::new()),
            shared.clone(),
            stop_rx,
            messages_tx,
        );

        Self {
            shared,
            stop_tx,
            lifecycle: Mutex::new(Lifecycle::Pending { task, messages }),
            stop_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Replace the jitter source (deterministic tests, seeded runs)
    pub fn with_jitter(mut self, jitter: impl JitterSource + 'static) -> Self {
        if let Lifecycle::Pending { task, .. } = self.lifecycle.get_mut() {
            task.jitter = Box::new(jitter);
        }
        self
    }

    /// Spawn the session task and return the ordered message stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<MessageStream, SessionError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| SessionError::NoRuntime)?;

        let mut lifecycle = self.lifecycle.lock();
        match std::mem::replace(&mut *lifecycle, Lifecycle::Finished) {
            Lifecycle::Pending { task, messages } => {
                *lifecycle = Lifecycle::Running(runtime.spawn(task.run()));
                Ok(messages)
            }
            Lifecycle::Running(handle) => {
                *lifecycle = Lifecycle::Running(handle);
                Err(SessionError::AlreadyStarted)
            }
            Lifecycle::Finished => Err(SessionError::AlreadyTerminated(self.state().name())),
        }
    }

    /// Stop the session from any state.
    ///
    /// Returns once the active subscription is cancelled and the task has
    /// exited: no further messages, events, or reconnects follow. Calling it
    /// again, or on a terminated session, is a no-op.
    pub async fn stop(&self) {
        let _gate = self.stop_gate.lock().await;
        self.stop_tx.send_replace(true);

        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Finished);
        match previous {
            Lifecycle::Pending { .. } => {
                self.shared.transition(
                    SessionState::Stopped,
                    Transition {
                        reason: Some(StopCause::Requested.to_string()),
                        stop_cause: Some(StopCause::Requested),
                        ..Default::default()
                    },
                );
            }
            Lifecycle::Running(handle) => {
                if let Err(err) = handle.await {
                    error!(error = %err, "session task did not exit cleanly");
                }
            }
            Lifecycle::Finished => {}
        }
    }

    /// Resolves with the terminal state (`Failed` or `Stopped`)
    pub async fn wait_terminal(&self) -> SessionState {
        let mut state_rx = self.shared.watch_state();
        let result = state_rx.wait_for(|state| state.is_terminal()).await;
        match result {
            Ok(state) => *state,
            // The sender lives in `shared`, which we hold
            Err(_) => self.state(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot()
    }

    /// Reason for `Failed`, if the session failed
    pub fn failure(&self) -> Option<FailureReason> {
        self.shared.snapshot().failure
    }

    /// Lifecycle events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.subscribe()
    }

    pub fn observer(&self) -> SessionObserver {
        SessionObserver::new(self.shared.clone())
    }
}
