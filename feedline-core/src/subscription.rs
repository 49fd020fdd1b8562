//! Handle over one live subscription
//!
//! Turns the transport stream into typed events:
//! `Data(message)*` followed by exactly one `Terminated(..)`, then nothing.
//! Cancelling releases the stream; no event is produced afterwards.

use crate::core::{Message, TransportError};
use crate::transport::BoxSubscriptionStream;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How a subscription ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Error(TransportError),
    /// Clean end-of-stream signalled by the remote
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    Data(Message),
    Terminated(Termination),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    Active,
    Terminated,
    Cancelled,
}

pub struct SubscriptionHandle {
    id: u64,
    stream: Option<BoxSubscriptionStream>,
    status: HandleStatus,
    opened_at: Instant,
    messages: u64,
}

impl SubscriptionHandle {
    pub fn new(id: u64, stream: BoxSubscriptionStream) -> Self {
        Self {
            id,
            stream: Some(stream),
            status: HandleStatus::Active,
            opened_at: Instant::now(),
            messages: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> HandleStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == HandleStatus::Active
    }

    pub fn messages(&self) -> u64 {
        self.messages
    }

    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Next event in transport order, or `None` once terminated or cancelled.
    ///
    /// Cancel-safe: dropping the future before it completes loses no event.
    pub async fn next_event(&mut self) -> Option<SubscriptionEvent> {
        let stream = self.stream.as_mut()?;

        let event = match stream.next().await {
            Some(Ok(mut message)) => {
                message.subscription_id = self.id;
                self.messages += 1;
                return Some(SubscriptionEvent::Data(message));
            }
            Some(Err(err)) => Termination::Error(err),
            None => Termination::End,
        };

        // Terminal: release the stream so nothing else can be read from it
        self.stream = None;
        self.status = HandleStatus::Terminated;
        debug!(
            subscription_id = self.id,
            messages = self.messages,
            termination = ?event,
            "subscription terminated"
        );
        Some(SubscriptionEvent::Terminated(event))
    }

    /// Release the subscription. Idempotent; a failed close is logged only.
    pub fn cancel(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };

        if let Err(err) = stream.close() {
            warn!(
                subscription_id = self.id,
                error = %err,
                "failed to close subscription cleanly, dropping it"
            );
        }
        drop(stream);

        self.status = HandleStatus::Cancelled;
        debug!(subscription_id = self.id, "subscription cancelled");
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("messages", &self.messages)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StatusCode;
    use crate::transport::{boxed_stream, SubscriptionStream};
    use futures::stream;
    use serde_json::json;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};

    fn handle_over(items: Vec<Result<Message, TransportError>>) -> SubscriptionHandle {
        SubscriptionHandle::new(7, boxed_stream(stream::iter(items)))
    }

    #[tokio::test]
    async fn test_data_then_single_error_terminal() {
        let mut handle = handle_over(vec![
            Ok(Message::new(json!(1))),
            Ok(Message::new(json!(2))),
            Err(TransportError::unavailable("dropped")),
            Ok(Message::new(json!(3))),
        ]);

        match handle.next_event().await {
            Some(SubscriptionEvent::Data(m)) => {
                assert_eq!(m.payload, json!(1));
                assert_eq!(m.subscription_id, 7);
            }
            other => panic!("expected data, got {:?}", other),
        }
        assert!(matches!(handle.next_event().await, Some(SubscriptionEvent::Data(_))));
        assert_eq!(
            handle.next_event().await,
            Some(SubscriptionEvent::Terminated(Termination::Error(
                TransportError::new(StatusCode::Unavailable, "dropped")
            )))
        );

        // Nothing after the terminal event, even though the stream had more
        assert_eq!(handle.next_event().await, None);
        assert_eq!(handle.status(), HandleStatus::Terminated);
        assert_eq!(handle.messages(), 2);
    }

    #[tokio::test]
    async fn test_clean_end() {
        let mut handle = handle_over(vec![Ok(Message::new(json!("a")))]);
        assert!(matches!(handle.next_event().await, Some(SubscriptionEvent::Data(_))));
        assert_eq!(
            handle.next_event().await,
            Some(SubscriptionEvent::Terminated(Termination::End))
        );
        assert_eq!(handle.next_event().await, None);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_after_termination() {
        let mut handle = handle_over(vec![Err(TransportError::unavailable("gone"))]);
        assert!(matches!(
            handle.next_event().await,
            Some(SubscriptionEvent::Terminated(_))
        ));

        handle.cancel();
        handle.cancel();
        assert_eq!(handle.status(), HandleStatus::Terminated);
        assert_eq!(handle.next_event().await, None);
    }

    #[tokio::test]
    async fn test_cancel_stops_delivery() {
        let mut handle = handle_over(vec![
            Ok(Message::new(json!(1))),
            Ok(Message::new(json!(2))),
        ]);
        assert!(matches!(handle.next_event().await, Some(SubscriptionEvent::Data(_))));

        handle.cancel();
        assert_eq!(handle.status(), HandleStatus::Cancelled);
        assert_eq!(handle.next_event().await, None);
        handle.cancel();
    }

    struct FailingClose {
        closes: Arc<AtomicUsize>,
    }

    impl futures::Stream for FailingClose {
        type Item = Result<Message, TransportError>;

        fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Pending
        }
    }

    impl SubscriptionStream for FailingClose {
        fn close(&mut self) -> Result<(), TransportError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::new(StatusCode::Internal, "close failed"))
        }
    }

    #[tokio::test]
    async fn test_failed_close_is_not_fatal() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut handle = SubscriptionHandle::new(
            1,
            Box::new(FailingClose {
                closes: closes.clone(),
            }),
        );

        handle.cancel();
        handle.cancel();
        drop(handle);

        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
