//! Client configuration
//!
//! Loaded from a JSON file; every section except `endpoint` and
//! `subscription` has defaults. See `config/feedline.example.json`.

pub mod types;

pub use types::*;

use crate::core::{Credentials, Endpoint, SubscriptionParams};
use crate::resilience::BackoffPolicy;
use crate::session::SessionSettings;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

impl ClientConfig {
    /// Load and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let cfg = Self::read(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a configuration file without validating it, so command line
    /// overrides can be applied first
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_path = path.as_ref();

        let text = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", config_path.display()))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            anyhow::bail!("endpoint must not be empty");
        }

        if self.transport == TransportKind::Tcp && !self.insecure {
            anyhow::bail!(
                "tcp transport is plaintext only; set insecure = true to connect to '{}'",
                self.endpoint
            );
        }

        let reconnect = &self.reconnect;
        if reconnect.initial_delay_ms == 0 {
            anyhow::bail!("reconnect.initial_delay_ms must be positive");
        }
        if reconnect.max_delay_ms < reconnect.initial_delay_ms {
            anyhow::bail!(
                "reconnect.max_delay_ms ({}) must be >= initial_delay_ms ({})",
                reconnect.max_delay_ms,
                reconnect.initial_delay_ms
            );
        }
        if reconnect.connect_timeout_ms == 0 {
            anyhow::bail!("reconnect.connect_timeout_ms must be positive");
        }
        if reconnect.message_buffer == 0 {
            anyhow::bail!("reconnect.message_buffer must be positive");
        }

        if self.stats.interval_secs == 0 {
            anyhow::bail!("stats.interval_secs must be positive");
        }

        match self.metrics.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!(
                "Invalid log level '{}', must be one of trace, debug, info, warn, error",
                other
            ),
        }

        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        let credentials = match &self.credentials.token {
            Some(token) => Credentials::token(token.clone()),
            None => Credentials::none(),
        };

        Endpoint {
            address: self.endpoint.clone(),
            credentials,
            insecure: self.insecure,
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            jitter_bound: Duration::from_millis(self.reconnect.jitter_ms),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect.connect_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats.interval_secs)
    }

    /// Settings for a new `Session` built from this configuration
    pub fn session_settings(&self) -> SessionSettings {
        let params = SubscriptionParams::new(self.subscription.kind)
            .with_filters(self.subscription.filters.clone());

        let mut settings = SessionSettings::new(self.endpoint(), params);
        settings.max_attempts = self.reconnect.max_attempts;
        settings.backoff = self.backoff();
        settings.min_sustained = Duration::from_millis(self.reconnect.min_sustained_ms);
        settings.resubscribe_on_end = self.reconnect.resubscribe_on_end;
        settings.message_buffer = self.reconnect.message_buffer;
        settings
    }
}
