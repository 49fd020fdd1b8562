//! Subscription request descriptor and received messages

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Kind of stream requested from the remote feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    Accounts,
    Transactions,
    Slots,
    Blocks,
    BlocksMeta,
    Entries,
}

impl SubscriptionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionKind::Accounts => "accounts",
            SubscriptionKind::Transactions => "transactions",
            SubscriptionKind::Slots => "slots",
            SubscriptionKind::Blocks => "blocks",
            SubscriptionKind::BlocksMeta => "blocks_meta",
            SubscriptionKind::Entries => "entries",
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable request used to open (and reopen) a subscription.
///
/// Filters are passed to the transport untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionParams {
    pub kind: SubscriptionKind,
    #[serde(default)]
    pub filters: serde_json::Value,
}

impl SubscriptionParams {
    pub fn new(kind: SubscriptionKind) -> Self {
        Self {
            kind,
            filters: serde_json::Value::Null,
        }
    }

    pub fn with_filters(mut self, filters: serde_json::Value) -> Self {
        self.filters = filters;
        self
    }
}

/// Opaque credentials handed to the transport. Never printed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    token: Option<String>,
}

impl Credentials {
    pub fn none() -> Self {
        Self { token: None }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn as_token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.token.is_none()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.token {
            Some(_) => f.write_str("Credentials(<redacted>)"),
            None => f.write_str("Credentials(none)"),
        }
    }
}

/// Where and how to connect
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub address: String,
    pub credentials: Credentials,
    /// Plaintext connection allowed
    pub insecure: bool,
}

/// One decoded event received from the feed
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Subscription that delivered this message
    pub subscription_id: u64,
    pub payload: serde_json::Value,
    pub received_at: SystemTime,
}

impl Message {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            subscription_id: 0,
            payload,
            received_at: SystemTime::now(),
        }
    }
}
