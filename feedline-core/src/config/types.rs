use crate::core::SubscriptionKind;
use crate::transport::SimulatedConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// `host:port` of the feed (`tcp://` prefix accepted)
    pub endpoint: String,

    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Allow a plaintext connection
    #[serde(default)]
    pub insecure: bool,

    #[serde(default)]
    pub transport: TransportKind,

    pub subscription: SubscriptionConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub stats: StatsConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Only read when `transport` is `simulated`
    #[serde(default)]
    pub simulated: SimulatedConfig,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Access token (or pass `--token` / `FEEDLINE_TOKEN`)
    #[serde(default)]
    pub token: Option<String>,
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Tcp,
    Simulated,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(TransportKind::Tcp),
            "simulated" => Ok(TransportKind::Simulated),
            other => Err(format!(
                "unknown transport '{}', must be 'tcp' or 'simulated'",
                other
            )),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => f.write_str("tcp"),
            TransportKind::Simulated => f.write_str("simulated"),
        }
    }
}

/// What to subscribe to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub kind: SubscriptionKind,

    /// Passed to the server untouched
    #[serde(default)]
    pub filters: serde_json::Value,
}

/// Reconnection policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Streaming this long resets the attempt counter even without messages
    #[serde(default = "default_min_sustained_ms")]
    pub min_sustained_ms: u64,

    /// Reconnect when the server ends the stream cleanly
    #[serde(default)]
    pub resubscribe_on_end: bool,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_message_buffer")]
    pub message_buffer: usize,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            min_sustained_ms: default_min_sustained_ms(),
            resubscribe_on_end: false,
            connect_timeout_ms: default_connect_timeout_ms(),
            message_buffer: default_message_buffer(),
        }
    }
}

/// Periodic stats reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    #[serde(default = "default_stats_interval_secs")]
    pub interval_secs: u64,

    /// Emit each report as one JSON line
    #[serde(default)]
    pub json: bool,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_stats_interval_secs(),
            json: false,
        }
    }
}

/// Metrics and logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve `/metrics` and `/health`
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_addr")]
    pub listen_addr: SocketAddr,

    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_metrics_addr(),
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

// Default value functions
fn default_max_attempts() -> u32 {
    10
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_ms() -> u64 {
    1_000
}

fn default_min_sustained_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_message_buffer() -> usize {
    1024
}

fn default_stats_interval_secs() -> u64 {
    30
}

fn default_metrics_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_log_level() -> String {
    "info".to_string()
}
