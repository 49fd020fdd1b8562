//! Run a session against the simulated feed for a few seconds
//!
//! The feed refuses the first two opens and drops every subscription after
//! 20 messages, so the log shows the full backoff and reconnect cycle.
//!
//! ```bash
//! RUST_LOG=info cargo run --example simulated_session
//! ```

use anyhow::Result;
use feedline_core::core::{Credentials, Endpoint, SubscriptionKind, SubscriptionParams};
use feedline_core::monitoring::StatsReporter;
use feedline_core::resilience::BackoffPolicy;
use feedline_core::session::{Session, SessionSettings};
use feedline_core::transport::{SimulatedConfig, SimulatedTransport};
use feedline_core::utils::init_logger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    init_logger("info", false)?;

    let transport = SimulatedTransport::new(SimulatedConfig {
        interval: Duration::from_millis(50),
        fail_every: Some(20),
        failing_opens: 2,
    });

    let endpoint = Endpoint {
        address: "sim://local".to_string(),
        credentials: Credentials::none(),
        insecure: true,
    };
    let mut settings = SessionSettings::new(endpoint, SubscriptionParams::new(SubscriptionKind::Slots));
    settings.backoff = BackoffPolicy::aggressive();

    let session = Session::new(settings, Arc::new(transport));
    let (stop_tx, stop_rx) = watch::channel(false);
    let reporter = StatsReporter::new(session.observer(), Duration::from_secs(1)).spawn(stop_rx);

    let mut messages = session.start()?;
    let deadline = tokio::time::sleep(Duration::from_secs(5));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            message = messages.recv() => match message {
                Some(message) => tracing::debug!(payload = %message.payload, "message"),
                None => break,
            },
        }
    }

    session.stop().await;
    stop_tx.send_replace(true);
    reporter.await?;

    let snapshot = session.snapshot();
    println!(
        "state={} messages={} subscriptions={} attempts={}",
        snapshot.state, snapshot.messages_received, snapshot.subscriptions_opened, snapshot.total_attempts
    );
    Ok(())
}
