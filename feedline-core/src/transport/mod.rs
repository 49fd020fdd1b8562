//! Transport boundary
//!
//! A transport opens one subscription and hands back a stream of decoded
//! messages. The stream ends with `None` on a clean remote end, or yields a
//! single `Err` when the subscription terminates abnormally.
//!
//! Implementations:
//! - `TcpTransport`: newline-delimited JSON frames over plain TCP
//! - `SimulatedTransport`: synthetic feed with injected outages

pub mod simulated;
pub mod tcp;

use crate::core::{Endpoint, Message, SubscriptionParams, TransportError};
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

pub use simulated::{SimulatedConfig, SimulatedTransport};
pub use tcp::TcpTransport;

/// Stream of messages for one open subscription
pub trait SubscriptionStream:
    Stream<Item = Result<Message, TransportError>> + Send + Unpin
{
    /// Release transport resources early. Dropping the stream must also
    /// release them; this hook exists for transports that can report a
    /// failed shutdown.
    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub type BoxSubscriptionStream = Box<dyn SubscriptionStream>;

/// Capability to open subscriptions against a remote feed
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    async fn open(
        &self,
        endpoint: &Endpoint,
        params: &SubscriptionParams,
    ) -> Result<BoxSubscriptionStream, TransportError>;
}

/// Adapter for transports whose streams need no explicit close
pub struct PlainStream {
    inner: BoxStream<'static, Result<Message, TransportError>>,
}

impl Stream for PlainStream {
    type Item = Result<Message, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl SubscriptionStream for PlainStream {}

/// Box any message stream as a `SubscriptionStream`
pub fn boxed_stream<S>(stream: S) -> BoxSubscriptionStream
where
    S: Stream<Item = Result<Message, TransportError>> + Send + 'static,
{
    Box::new(PlainStream {
        inner: stream.boxed(),
    })
}
