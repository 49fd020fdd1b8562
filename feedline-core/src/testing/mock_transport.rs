//! Scripted transport for session tests
//!
//! Each `open()` consumes the next scripted outcome; once the script is
//! exhausted the fallback outcome repeats. The transport counts opens and
//! tracks how many of its streams are alive at once, so tests can assert
//! that subscriptions never overlap.

use crate::core::{Endpoint, Message, SubscriptionParams, TransportError};
use crate::transport::{BoxSubscriptionStream, SubscriptionStream, Transport};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// One item of a scripted stream
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Message(serde_json::Value),
    Error(TransportError),
    /// Clean end-of-stream
    End,
    /// Sleep (tokio time) before the next step
    Delay(Duration),
    /// Never yield again
    Hang,
}

/// Outcome of one `open()` call
#[derive(Debug, Clone)]
pub enum ScriptedOpen {
    Fail(TransportError),
    Stream(Vec<ScriptStep>),
    /// Open never completes
    Hang,
    /// Open panics with this message
    Panic(&'static str),
}

#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    closes: AtomicUsize,
}

pub struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptedOpen>>,
    fallback: ScriptedOpen,
    counters: Arc<Counters>,
    fail_close: bool,
    open_params: Mutex<Vec<SubscriptionParams>>,
}

impl ScriptedTransport {
    /// Script followed by an endless run of `Unavailable` open failures
    pub fn new(script: Vec<ScriptedOpen>) -> Self {
        Self::with_fallback(
            script,
            ScriptedOpen::Fail(TransportError::unavailable("connection refused")),
        )
    }

    pub fn with_fallback(script: Vec<ScriptedOpen>, fallback: ScriptedOpen) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            counters: Arc::new(Counters::default()),
            fail_close: false,
            open_params: Mutex::new(Vec::new()),
        }
    }

    /// Transport whose every open fails with `err`
    pub fn always_failing(err: TransportError) -> Self {
        Self::with_fallback(Vec::new(), ScriptedOpen::Fail(err))
    }

    /// Make `close()` on streams report an error
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    /// Streams currently alive
    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Highest number of streams ever alive at the same time
    pub fn max_live(&self) -> usize {
        self.counters.max_live.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    /// Parameters passed to each `open()`, in order
    pub fn open_params(&self) -> Vec<SubscriptionParams> {
        self.open_params.lock().clone()
    }

    fn next_outcome(&self) -> ScriptedOpen {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn open(
        &self,
        _endpoint: &Endpoint,
        params: &SubscriptionParams,
    ) -> Result<BoxSubscriptionStream, TransportError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        self.open_params.lock().push(params.clone());

        match self.next_outcome() {
            ScriptedOpen::Fail(err) => Err(err),
            ScriptedOpen::Hang => futures::future::pending().await,
            ScriptedOpen::Panic(message) => panic!("{}", message),
            ScriptedOpen::Stream(steps) => {
                let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
                self.counters.max_live.fetch_max(live, Ordering::SeqCst);

                Ok(Box::new(ScriptedStream {
                    inner: script_stream(steps),
                    counters: self.counters.clone(),
                    fail_close: self.fail_close,
                }))
            }
        }
    }
}

fn script_stream(steps: Vec<ScriptStep>) -> BoxStream<'static, Result<Message, TransportError>> {
    stream::unfold(VecDeque::from(steps), |mut steps| async move {
        loop {
            match steps.pop_front()? {
                ScriptStep::Message(payload) => return Some((Ok(Message::new(payload)), steps)),
                ScriptStep::Error(err) => return Some((Err(err), steps)),
                ScriptStep::End => return None,
                ScriptStep::Delay(delay) => tokio::time::sleep(delay).await,
                ScriptStep::Hang => futures::future::pending::<()>().await,
            }
        }
    })
    .boxed()
}

struct ScriptedStream {
    inner: BoxStream<'static, Result<Message, TransportError>>,
    counters: Arc<Counters>,
    fail_close: bool,
}

impl Stream for ScriptedStream {
    type Item = Result<Message, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl SubscriptionStream for ScriptedStream {
    fn close(&mut self) -> Result<(), TransportError> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(TransportError::new(
                crate::core::StatusCode::Internal,
                "scripted close failure",
            ));
        }
        Ok(())
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}
