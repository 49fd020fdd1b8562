//! Session state machine
//!
//! # State Diagram
//!
//! ```text
//!      IDLE
//!        │ start()
//!        ▼
//!   CONNECTING ─────── open ok ───────► STREAMING
//!     │  ▲   │                            │    │
//!     │  │   │ fatal / exhausted          │    │ clean end
//!     │  │   ▼                            │    ▼
//!     │  │  FAILED ◄── fatal / exhausted ─┤  STOPPED
//!     │  │                                │
//!     │  └── timer ──── BACKOFF ◄─────────┘ retryable
//!     │                    ▲
//!     └──── retryable ─────┘
//! ```
//!
//! `Failed` and `Stopped` are terminal. Every non-terminal state can move to
//! `Stopped` on an explicit stop.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Backoff,
    Failed,
    Stopped,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Streaming => "streaming",
            SessionState::Backoff => "backoff",
            SessionState::Failed => "failed",
            SessionState::Stopped => "stopped",
        }
    }

    /// Numeric code exported as a metric gauge
    pub fn code(self) -> i64 {
        match self {
            SessionState::Idle => 0,
            SessionState::Connecting => 1,
            SessionState::Streaming => 2,
            SessionState::Backoff => 3,
            SessionState::Failed => 4,
            SessionState::Stopped => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Stopped)
    }

    /// Whether `self -> next` is an edge of the diagram above
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Idle, Connecting) => true,
            (Connecting, Streaming | Backoff | Failed) => true,
            (Streaming, Backoff | Failed) => true,
            (Backoff, Connecting) => true,
            (Idle | Connecting | Streaming | Backoff, Stopped) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
