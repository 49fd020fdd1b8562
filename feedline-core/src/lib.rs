//! Feedline Core - Resilient Stream Subscription Client
//!
//! Keeps one long-lived subscription to a remote event feed alive across
//! transport failures. Transient errors are retried with capped, jittered
//! exponential backoff; fatal errors stop the session immediately.
//!
//! ## Architecture
//! - **Single writer**: one tokio task owns all mutable session state
//! - **No overlap**: a subscription is released before its replacement opens
//! - **Fail closed**: unrecognized errors are never retried
//! - **Observable**: lifecycle events, periodic stats, Prometheus metrics
//!
//! ## Core Modules
//! - `core`: request descriptors, messages, status codes, errors
//! - `resilience`: backoff policy, error classification, panic handler
//! - `transport`: the `Transport` capability plus TCP and simulated feeds
//! - `subscription`: cancellable handle over one open stream
//! - `session`: the reconnecting session state machine
//! - `monitoring`: stats reporter, metrics, HTTP exporter
//! - `config`: JSON configuration with validation

pub mod config;
pub mod core;
pub mod monitoring;
pub mod resilience;
pub mod session;
pub mod subscription;
pub mod transport;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use crate::core::{
    Credentials, Endpoint, FailureReason, Message, SessionError, StatusCode, SubscriptionKind,
    SubscriptionParams, TransportError,
};
pub use config::ClientConfig;
pub use resilience::{classify, BackoffPolicy, ErrorClass};
pub use session::{restart, Session, SessionEvent, SessionSettings, SessionState};

pub use anyhow::{Error, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::core::{
        Credentials, Endpoint, FailureReason, Message, SubscriptionKind, SubscriptionParams,
        TransportError,
    };

    pub use crate::session::{
        MessageStream, Session, SessionEvent, SessionObserver, SessionSettings, SessionState,
    };

    pub use crate::transport::{SimulatedTransport, TcpTransport, Transport};

    pub use crate::monitoring::{SessionMetrics, StatsReporter};

    pub use crate::{Error, Result};
}
