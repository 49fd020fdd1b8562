//! The session task: the only writer of session state
//!
//! Every suspension point (open, next event, forwarding a message, the
//! backoff sleep) is raced against the stop signal, so `stop()` never waits
//! for a timer or a slow transport.

use super::events::StopCause;
use super::shared::{SessionShared, Transition};
use super::state::SessionState;
use super::SessionSettings;
use crate::core::{FailureReason, Message, StatusCode, TransportError};
use crate::resilience::{panic_message, ErrorClass, JitterSource};
use crate::subscription::{SubscriptionEvent, SubscriptionHandle, Termination};
use crate::transport::Transport;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// How the task left its main loop
#[derive(Debug)]
enum Exit {
    Stopped(StopCause),
    Failed(FailureReason),
}

/// How one streaming period ended
enum StreamExit {
    Stop(StopCause),
    Lost(TransportError),
    Ended,
}

pub(crate) struct SessionTask {
    pub(crate) settings: SessionSettings,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) jitter: Box<dyn JitterSource>,
    pub(crate) shared: Arc<SessionShared>,
    pub(crate) stop_rx: watch::Receiver<bool>,
    pub(crate) messages_tx: mpsc::Sender<Message>,
    attempt_count: u32,
    next_subscription_id: u64,
}

impl SessionTask {
    pub(crate) fn new(
        settings: SessionSettings,
        transport: Arc<dyn Transport>,
        jitter: Box<dyn JitterSource>,
        shared: Arc<SessionShared>,
        stop_rx: watch::Receiver<bool>,
        messages_tx: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            settings,
            transport,
            jitter,
            shared,
            stop_rx,
            messages_tx,
            attempt_count: 0,
            next_subscription_id: 1,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(
            endpoint = %self.settings.endpoint.address,
            transport = self.transport.name(),
            kind = %self.settings.params.kind,
            max_attempts = self.settings.max_attempts,
            "session starting"
        );

        // A panic in transport or consumer code ends the session like a
        // fatal error; the open subscription is dropped with the future
        let exit = match AssertUnwindSafe(self.drive()).catch_unwind().await {
            Ok(exit) => exit,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "session task panicked");
                Exit::Failed(FailureReason::Fatal(TransportError::new(
                    StatusCode::Internal,
                    format!("session task panicked: {}", message),
                )))
            }
        };

        let attempt = self.attempt_count;
        match exit {
            Exit::Stopped(cause) => {
                self.shared.transition(
                    SessionState::Stopped,
                    Transition {
                        attempt,
                        reason: Some(cause.to_string()),
                        stop_cause: Some(cause),
                        ..Default::default()
                    },
                );
            }
            Exit::Failed(failure) => {
                self.shared.transition(
                    SessionState::Failed,
                    Transition {
                        attempt,
                        reason: Some(failure.to_string()),
                        failure: Some(failure),
                        ..Default::default()
                    },
                );
            }
        }
    }

    async fn drive(&mut self) -> Exit {
        loop {
            self.shared.transition(
                SessionState::Connecting,
                Transition {
                    attempt: self.attempt_count,
                    ..Default::default()
                },
            );

            let opened = tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop_rx) => return Exit::Stopped(StopCause::Requested),
                result = self.transport.open(&self.settings.endpoint, &self.settings.params) => result,
            };

            let failure = match opened {
                Err(err) => {
                    debug!(error = %err, "open failed");
                    err
                }
                Ok(stream) => {
                    let id = self.next_subscription_id;
                    self.next_subscription_id += 1;

                    // Dropped at the end of this block, before any backoff or
                    // reopen, so two subscriptions never overlap
                    let mut handle = SubscriptionHandle::new(id, stream);
                    match self.stream(&mut handle).await {
                        StreamExit::Stop(cause) => {
                            handle.cancel();
                            return Exit::Stopped(cause);
                        }
                        StreamExit::Lost(err) => err,
                        StreamExit::Ended if self.settings.resubscribe_on_end => {
                            TransportError::new(StatusCode::Unavailable, "stream ended by remote")
                        }
                        StreamExit::Ended => return Exit::Stopped(StopCause::RemoteEnded),
                    }
                }
            };

            if let Some(exit) = self.back_off(failure).await {
                return exit;
            }
        }
    }

    /// Pump one subscription until it terminates or a stop arrives
    async fn stream(&mut self, handle: &mut SubscriptionHandle) -> StreamExit {
        self.shared.transition(
            SessionState::Streaming,
            Transition {
                attempt: self.attempt_count,
                subscription_id: Some(handle.id()),
                ..Default::default()
            },
        );

        let sustained = tokio::time::sleep(self.settings.min_sustained);
        tokio::pin!(sustained);
        let mut qualified = false;

        loop {
            tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop_rx) => return StreamExit::Stop(StopCause::Requested),
                _ = &mut sustained, if !qualified => {
                    qualified = true;
                    self.reset_attempts("sustained uptime reached");
                }
                event = handle.next_event() => match event {
                    Some(SubscriptionEvent::Data(message)) => {
                        if !qualified {
                            qualified = true;
                            self.reset_attempts("first message received");
                        }
                        tokio::select! {
                            biased;
                            _ = stop_requested(&mut self.stop_rx) => return StreamExit::Stop(StopCause::Requested),
                            sent = self.messages_tx.send(message) => {
                                if sent.is_err() {
                                    return StreamExit::Stop(StopCause::ConsumerClosed);
                                }
                                self.shared.record_message();
                            }
                        }
                    }
                    Some(SubscriptionEvent::Terminated(Termination::Error(err))) => {
                        return StreamExit::Lost(err);
                    }
                    Some(SubscriptionEvent::Terminated(Termination::End)) | None => {
                        return StreamExit::Ended;
                    }
                },
            }
        }
    }

    /// Classify `failure` and either wait out a backoff or return the exit
    async fn back_off(&mut self, failure: TransportError) -> Option<Exit> {
        if failure.class() == ErrorClass::Fatal {
            return Some(Exit::Failed(FailureReason::Fatal(failure)));
        }

        if self.attempt_count >= self.settings.max_attempts {
            return Some(Exit::Failed(FailureReason::Exhausted {
                attempts: self.attempt_count,
                last_error: failure,
            }));
        }

        self.attempt_count += 1;
        self.shared.record_attempt();

        let delay = self
            .settings
            .backoff
            .delay_for(self.attempt_count - 1, self.jitter.as_mut());

        self.shared.transition(
            SessionState::Backoff,
            Transition {
                attempt: self.attempt_count,
                delay: Some(delay),
                reason: Some(failure.to_string()),
                ..Default::default()
            },
        );

        tokio::select! {
            biased;
            _ = stop_requested(&mut self.stop_rx) => Some(Exit::Stopped(StopCause::Requested)),
            _ = tokio::time::sleep(delay) => None,
        }
    }

    fn reset_attempts(&mut self, why: &'static str) {
        if self.attempt_count > 0 {
            info!(previous = self.attempt_count, why, "connection healthy, attempt counter reset");
        }
        self.attempt_count = 0;
        self.shared.set_attempt(0);
    }
}

/// Resolves once a stop is requested, or when the owning `Session` is gone
async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow_and_update() {
            return;
        }
        if stop_rx.changed().await.is_err() {
            warn!("session handle dropped without stop, shutting down");
            return;
        }
    }
}
