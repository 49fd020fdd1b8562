//! Synthetic feed for demos and soak runs
//!
//! Produces one payload per `interval` and injects failures on a fixed
//! schedule, so reconnect and backoff paths can be exercised without a
//! real server.

use super::{boxed_stream, BoxSubscriptionStream, Transport};
use crate::core::{Endpoint, Message, SubscriptionParams, TransportError};
use async_trait::async_trait;
use futures::stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    /// Time between payloads
    #[serde(with = "millis")]
    pub interval: Duration,
    /// Drop each subscription with `Unavailable` after this many messages
    pub fail_every: Option<u64>,
    /// Number of initial opens that are refused
    pub failing_opens: u32,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            fail_every: Some(500),
            failing_opens: 0,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

pub struct SimulatedTransport {
    config: SimulatedConfig,
    opens: AtomicU32,
    /// Continues across subscriptions, like a slot number would
    sequence: Arc<AtomicU64>,
}

impl SimulatedTransport {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            opens: AtomicU32::new(0),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::Relaxed)
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new(SimulatedConfig::default())
    }
}

struct Feed {
    ticker: tokio::time::Interval,
    sequence: Arc<AtomicU64>,
    kind: &'static str,
    sent: u64,
    fail_every: Option<u64>,
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn open(
        &self,
        endpoint: &Endpoint,
        params: &SubscriptionParams,
    ) -> Result<BoxSubscriptionStream, TransportError> {
        let open = self.opens.fetch_add(1, Ordering::Relaxed);
        if open < self.config.failing_opens {
            return Err(TransportError::unavailable(format!(
                "simulated connect failure {}/{}",
                open + 1,
                self.config.failing_opens
            )));
        }
        debug!(address = %endpoint.address, kind = %params.kind, "simulated subscription opened");

        let mut ticker = tokio::time::interval(self.config.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let feed = Feed {
            ticker,
            sequence: self.sequence.clone(),
            kind: params.kind.as_str(),
            sent: 0,
            fail_every: self.config.fail_every.filter(|n| *n > 0),
        };

        let messages = stream::unfold(Some(feed), |state| async move {
            let mut feed = state?;
            if feed.fail_every.is_some_and(|n| feed.sent >= n) {
                let err = TransportError::unavailable("simulated connection reset");
                return Some((Err(err), None));
            }

            feed.ticker.tick().await;
            feed.sent += 1;
            let sequence = feed.sequence.fetch_add(1, Ordering::Relaxed);
            let payload = json!({ "kind": feed.kind, "sequence": sequence });
            Some((Ok(Message::new(payload)), Some(feed)))
        });

        Ok(boxed_stream(messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Credentials, StatusCode, SubscriptionKind};
    use futures::StreamExt;

    fn endpoint() -> Endpoint {
        Endpoint {
            address: "sim://local".to_string(),
            credentials: Credentials::none(),
            insecure: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_opens_then_success() {
        let transport = SimulatedTransport::new(SimulatedConfig {
            failing_opens: 2,
            ..Default::default()
        });
        let params = SubscriptionParams::new(SubscriptionKind::Slots);

        for _ in 0..2 {
            let err = transport.open(&endpoint(), &params).await.err().unwrap();
            assert_eq!(err.code, StatusCode::Unavailable);
        }
        assert!(transport.open(&endpoint(), &params).await.is_ok());
        assert_eq!(transport.opens(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_after_fail_every() {
        let transport = SimulatedTransport::new(SimulatedConfig {
            interval: Duration::from_millis(10),
            fail_every: Some(3),
            failing_opens: 0,
        });
        let params = SubscriptionParams::new(SubscriptionKind::Slots);

        let mut first = transport.open(&endpoint(), &params).await.unwrap();
        for expected in 0..3u64 {
            let message = first.next().await.unwrap().unwrap();
            assert_eq!(message.payload["sequence"], expected);
            assert_eq!(message.payload["kind"], "slots");
        }
        let err = first.next().await.unwrap().unwrap_err();
        assert!(err.class().is_retryable());
        assert!(first.next().await.is_none());

        // Sequence continues on the next subscription
        let mut second = transport.open(&endpoint(), &params).await.unwrap();
        assert_eq!(second.next().await.unwrap().unwrap().payload["sequence"], 3);
    }

    #[test]
    fn test_config_from_json() {
        let config: SimulatedConfig =
            serde_json::from_str(r#"{"interval": 250, "fail_every": null}"#).unwrap();
        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.fail_every, None);
        assert_eq!(config.failing_opens, 0);
    }
}
