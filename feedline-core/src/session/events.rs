//! Lifecycle events emitted on every state transition

use super::state::SessionState;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, SystemTime};

/// Why a session reached `Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCause {
    /// Explicit `stop()`, a shutdown signal, or the `Session` was dropped
    Requested,
    /// The remote ended the stream without error
    RemoteEnded,
    /// The message receiver was dropped
    ConsumerClosed,
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopCause::Requested => "stop requested",
            StopCause::RemoteEnded => "stream ended by remote",
            StopCause::ConsumerClosed => "message consumer closed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionEvent {
    pub state: SessionState,
    pub previous: SessionState,
    /// `attempt_count` after the transition
    pub attempt: u32,
    /// Set when entering `Backoff`
    pub delay: Option<Duration>,
    /// Set when leaving `Streaming`
    pub uptime: Option<Duration>,
    /// Failure or stop reason, human readable
    pub reason: Option<String>,
    /// Subscription involved, if any
    pub subscription_id: Option<u64>,
    pub at: SystemTime,
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
