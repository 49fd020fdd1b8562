//! Common utilities for the binaries
//!
//! CLI parsing, configuration overrides, signal flags and transport
//! selection.

use anyhow::{Context, Result};
use clap::Parser;
use feedline_core::config::{ClientConfig, TransportKind};
use feedline_core::core::Message;
use feedline_core::session::SessionState;
use feedline_core::transport::{SimulatedTransport, TcpTransport, Transport};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Common CLI arguments
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CommonArgs {
    /// JSON configuration file (re-read on SIGHUP)
    #[arg(short, long, default_value = "config/feedline.json")]
    pub config: PathBuf,

    /// Feed address, overrides the config file
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Access token, overrides the config file
    #[arg(long, env = "FEEDLINE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Transport: tcp or simulated
    #[arg(short, long)]
    pub transport: Option<TransportKind>,

    /// Serve Prometheus metrics and the health probe
    #[arg(long)]
    pub metrics: bool,

    /// Log level (RUST_LOG takes precedence)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

impl CommonArgs {
    /// Read the config file, apply overrides, then validate
    pub fn load_config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::read(&self.config)?;
        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut ClientConfig) {
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(token) = &self.token {
            config.credentials.token = Some(token.clone());
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if self.metrics {
            config.metrics.enabled = true;
        }
        if let Some(level) = &self.log_level {
            config.metrics.log_level = level.clone();
        }
        if self.json_logs {
            config.metrics.json_logs = true;
        }
    }
}

/// Settings applied once at startup; a reload keeps the running values
pub fn ignored_on_reload(running: &ClientConfig, reloaded: &ClientConfig) -> Vec<&'static str> {
    let (old, new) = (&running.metrics, &reloaded.metrics);
    let mut ignored = Vec::new();
    if old.enabled != new.enabled {
        ignored.push("metrics.enabled");
    }
    if old.listen_addr != new.listen_addr {
        ignored.push("metrics.listen_addr");
    }
    if old.log_level != new.log_level {
        ignored.push("metrics.log_level");
    }
    if old.json_logs != new.json_logs {
        ignored.push("metrics.json_logs");
    }
    ignored
}

/// Process signals, latched into flags the main loop polls
///
/// - SIGINT (ctrlc) and SIGTERM: shutdown
/// - SIGHUP: reload the configuration
#[derive(Clone, Default)]
pub struct SignalFlags {
    shutdown: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
}

impl SignalFlags {
    /// Install every handler. ctrlc allows one handler per process.
    pub fn install() -> Result<Self> {
        let flags = Self::default();

        let shutdown = flags.shutdown.clone();
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .context("Failed to install SIGINT handler")?;

        flags.register_hooks()?;
        Ok(flags)
    }

    #[cfg(unix)]
    fn register_hooks(&self) -> Result<()> {
        use signal_hook::consts::{SIGHUP, SIGTERM};

        signal_hook::flag::register(SIGTERM, self.shutdown.clone())
            .context("Failed to install SIGTERM handler")?;
        signal_hook::flag::register(SIGHUP, self.reload.clone())
            .context("Failed to install SIGHUP handler")?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn register_hooks(&self) -> Result<()> {
        Ok(())
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// True once per received SIGHUP burst
    pub fn take_reload(&self) -> bool {
        self.reload.swap(false, Ordering::SeqCst)
    }
}

pub fn build_transport(config: &ClientConfig) -> Arc<dyn Transport> {
    match config.transport {
        TransportKind::Tcp => Arc::new(TcpTransport::new(config.connect_timeout())),
        TransportKind::Simulated => Arc::new(SimulatedTransport::new(config.simulated.clone())),
    }
}

/// One log line per message: subscription id plus the payload, cut to
/// `max_chars` characters
pub fn summarize(message: &Message, max_chars: usize) -> String {
    let payload = message.payload.to_string();
    let mut summary: String = payload.chars().take(max_chars).collect();
    if summary.len() < payload.len() {
        summary.push_str("...");
    }
    format!("[sub {}] {}", message.subscription_id, summary)
}

/// Non-zero only when the session gave up
pub fn exit_code(state: SessionState) -> ExitCode {
    match state {
        SessionState::Failed => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        serde_json::from_value(serde_json::json!({
            "endpoint": "10.0.0.1:7000",
            "subscription": { "kind": "accounts" }
        }))
        .unwrap()
    }

    #[test]
    fn test_overrides() {
        let args = CommonArgs::try_parse_from([
            "feedline",
            "--endpoint",
            "127.0.0.1:9000",
            "--token",
            "cli-token",
            "--transport",
            "simulated",
            "--metrics",
            "--log-level",
            "debug",
        ])
        .unwrap();

        let mut config = config();
        args.apply_overrides(&mut config);

        assert_eq!(config.endpoint, "127.0.0.1:9000");
        assert_eq!(config.credentials.token.as_deref(), Some("cli-token"));
        assert_eq!(config.transport, TransportKind::Simulated);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.log_level, "debug");
        config.validate().unwrap();
    }

    #[test]
    fn test_no_overrides_keeps_file_values() {
        let args = CommonArgs::try_parse_from(["feedline", "-c", "other.json"]).unwrap();
        assert_eq!(args.config, PathBuf::from("other.json"));

        let mut config = config();
        args.apply_overrides(&mut config);
        assert_eq!(config.endpoint, "10.0.0.1:7000");
        assert_eq!(config.transport, TransportKind::Tcp);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_unknown_transport_rejected() {
        assert!(CommonArgs::try_parse_from(["feedline", "--transport", "udp"]).is_err());
    }

    #[test]
    fn test_summarize() {
        let mut message = Message::new(serde_json::json!({ "slot": 42 }));
        message.subscription_id = 3;
        assert_eq!(summarize(&message, 80), r#"[sub 3] {"slot":42}"#);
        assert_eq!(summarize(&message, 5), r#"[sub 3] {"slo..."#);

        let wide = Message::new(serde_json::json!("ééééé"));
        assert_eq!(summarize(&wide, 3), "[sub 0] \"éé...");
    }

    #[cfg(unix)]
    #[test]
    fn test_sighup_reloads_without_shutdown() {
        use signal_hook::consts::{SIGHUP, SIGTERM};
        use signal_hook::low_level::raise;

        let flags = SignalFlags::default();
        flags.register_hooks().unwrap();

        raise(SIGHUP).unwrap();
        assert!(!flags.shutdown_requested());
        assert!(flags.take_reload());
        assert!(!flags.take_reload());

        raise(SIGTERM).unwrap();
        assert!(flags.shutdown_requested());
        assert!(!flags.take_reload());
    }

    #[test]
    fn test_ignored_on_reload() {
        let running = config();
        assert!(ignored_on_reload(&running, &running.clone()).is_empty());

        let mut reloaded = running.clone();
        reloaded.endpoint = "10.0.0.2:10000".to_string();
        reloaded.metrics.enabled = !running.metrics.enabled;
        reloaded.metrics.log_level = "debug".to_string();
        assert_eq!(
            ignored_on_reload(&running, &reloaded),
            vec!["metrics.enabled", "metrics.log_level"]
        );
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(exit_code(SessionState::Failed), ExitCode::FAILURE);
        assert_eq!(exit_code(SessionState::Stopped), ExitCode::SUCCESS);
    }
}
