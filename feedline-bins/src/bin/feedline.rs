//! Feedline: keep one feed subscription alive
//!
//! - SIGINT / SIGTERM: stop the session and exit
//! - SIGHUP: re-read the config file and replace the session
//!
//! Exits non-zero when the session ends in `Failed`.

use anyhow::{Context, Result};
use clap::Parser;
use feedline_bins::common::{
    build_transport, exit_code, ignored_on_reload, summarize, CommonArgs, SignalFlags,
};
use feedline_core::config::ClientConfig;
use feedline_core::monitoring::{
    MetricsServer, MetricsServerConfig, SessionMetrics, StatsReporter, TracingSink,
};
use feedline_core::resilience::install_panic_handler;
use feedline_core::session::{restart, MessageStream, Session, SessionState};
use feedline_core::utils::init_logger;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const SUMMARY_CHARS: usize = 160;

fn main() -> Result<ExitCode> {
    let args = CommonArgs::parse();
    let config = args.load_config()?;

    init_logger(&config.metrics.log_level, config.metrics.json_logs)?;
    install_panic_handler();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let state = runtime.block_on(run(args, config))?;
    Ok(exit_code(state))
}

/// Per-session background tasks
struct Monitors {
    reporter: JoinHandle<()>,
    follower: Option<JoinHandle<()>>,
}

impl Monitors {
    fn spawn(
        session: &Session,
        config: &ClientConfig,
        metrics: Option<&Arc<SessionMetrics>>,
        shutdown: &watch::Receiver<bool>,
    ) -> Self {
        let mut reporter = StatsReporter::new(session.observer(), config.stats_interval())
            .with_sink(TracingSink {
                json: config.stats.json,
            });
        let mut follower = None;

        if let Some(metrics) = metrics {
            metrics.rebase();
            reporter = reporter.with_metrics(metrics.clone());
            follower = Some(metrics.clone().follow(session.observer()));
        }

        Self {
            reporter: reporter.spawn(shutdown.clone()),
            follower,
        }
    }

    /// Both tasks end on their own once the session is terminal
    async fn join(self) {
        if let Err(e) = self.reporter.await {
            warn!("Stats reporter task failed: {}", e);
        }
        if let Some(follower) = self.follower {
            if let Err(e) = follower.await {
                warn!("Metrics task failed: {}", e);
            }
        }
    }
}

fn build_session(config: &ClientConfig) -> Session {
    Session::new(config.session_settings(), build_transport(config))
}

async fn run(args: CommonArgs, mut config: ClientConfig) -> Result<SessionState> {
    info!("=== Feedline ===");
    info!(
        endpoint = %config.endpoint,
        transport = %config.transport,
        kind = %config.subscription.kind,
        max_attempts = config.reconnect.max_attempts,
        "Starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signals = SignalFlags::install()?;

    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(SessionMetrics::new()?);
        let server = MetricsServer::new(
            MetricsServerConfig {
                listen_addr: config.metrics.listen_addr,
                ..Default::default()
            },
            metrics.clone(),
        );
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = server.serve(shutdown).await {
                error!("Metrics server failed: {:#}", e);
            }
        });
        Some(metrics)
    } else {
        None
    };

    let mut session = build_session(&config);
    let mut monitors = Monitors::spawn(&session, &config, metrics.as_ref(), &shutdown_rx);
    let mut messages: MessageStream = session.start()?;

    let mut signal_poll = tokio::time::interval(Duration::from_millis(100));
    let mut received: u64 = 0;

    loop {
        tokio::select! {
            message = messages.recv() => match message {
                Some(message) => {
                    received += 1;
                    info!("{}", summarize(&message, SUMMARY_CHARS));
                }
                // Session reached a terminal state on its own
                None => break,
            },
            _ = signal_poll.tick() => {
                if signals.shutdown_requested() {
                    warn!("Received shutdown signal, stopping session...");
                    session.stop().await;
                    break;
                }
                if !signals.take_reload() {
                    continue;
                }

                info!(path = %args.config.display(), "SIGHUP received, reloading configuration");
                let mut new_config = match args.load_config() {
                    Ok(new_config) => new_config,
                    Err(e) => {
                        error!("Reload failed, keeping current session: {:#}", e);
                        continue;
                    }
                };

                for field in ignored_on_reload(&config, &new_config) {
                    warn!(field, "Setting only applies at startup, keeping the running value");
                }
                new_config.metrics = config.metrics.clone();

                // Old monitors must finish before the metrics baseline is reset
                session.stop().await;
                monitors.join().await;

                let replacement = build_session(&new_config);
                monitors = Monitors::spawn(&replacement, &new_config, metrics.as_ref(), &shutdown_rx);
                let (current, stream) = restart(session, replacement).await?;
                session = current;
                messages = stream;
                config = new_config;
            }
        }
    }

    let state = session.wait_terminal().await;
    monitors.join().await;
    shutdown_tx.send_replace(true);

    let snapshot = session.snapshot();
    info!("=== Final Statistics ===");
    info!("State: {}", state);
    info!("Messages received: {}", received);
    info!("Subscriptions opened: {}", snapshot.subscriptions_opened);
    info!("Reconnection attempts: {}", snapshot.total_attempts);
    if let Some(failure) = session.failure() {
        error!("Session failed: {}", failure);
    }

    Ok(state)
}
