//! Test support: scripted transport and settings helpers

pub mod mock_transport;

pub use mock_transport::{ScriptStep, ScriptedOpen, ScriptedTransport};

use crate::core::{Credentials, Endpoint, SubscriptionKind, SubscriptionParams};
use crate::resilience::BackoffPolicy;
use crate::session::SessionSettings;
use std::time::Duration;

/// Settings with fast, jitter-free backoff for tests
pub fn test_settings(max_attempts: u32) -> SessionSettings {
    let endpoint = Endpoint {
        address: "mock://feed".to_string(),
        credentials: Credentials::token("test-token"),
        insecure: true,
    };

    let mut settings = SessionSettings::new(endpoint, SubscriptionParams::new(SubscriptionKind::Slots));
    settings.max_attempts = max_attempts;
    settings.backoff = BackoffPolicy {
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(5),
        jitter_bound: Duration::ZERO,
    };
    settings.min_sustained = Duration::from_secs(30);
    settings.message_buffer = 64;
    settings
}
