//! Resilience patterns for a long-lived subscription
//!
//! - Exponential backoff with injectable jitter
//! - Retryable/fatal classification of transport failures
//! - Panic reporting through tracing

pub mod backoff;
pub mod classify;
pub mod panic;

pub use backoff::{BackoffPolicy, FixedJitter, JitterSource, RandomJitter};
pub use classify::{classify, ErrorClass};
pub use panic::{install_panic_handler, panic_message};
