//! Core types shared by every layer
//!
//! - `SubscriptionParams`: immutable request descriptor (kind + filters)
//! - `Message`: one received event, payload kept opaque
//! - `TransportError` / `StatusCode`: what a transport reports on failure
//! - `FailureReason` / `SessionError`: what the session reports to its host

pub mod errors;
pub mod types;

pub use errors::{FailureReason, SessionError, StatusCode, TransportError};
pub use types::{Credentials, Endpoint, Message, SubscriptionKind, SubscriptionParams};
