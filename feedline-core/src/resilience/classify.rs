//! Retry classification for transport failures
//!
//! Decides whether a failure justifies another connection attempt. The
//! mapping is a fixed table over status codes plus a list of transient
//! markers searched in the error text. Anything the table does not
//! recognise is `Fatal`.

use crate::core::{StatusCode, TransportError};

/// Outcome of classifying a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient transport unavailability, back off and reconnect
    Retryable,
    /// Stop the session
    Fatal,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        self == ErrorClass::Retryable
    }
}

/// Lowercase substrings that mark a dropped or reset connection
const TRANSIENT_MARKERS: &[&str] = &[
    "connection reset",
    "connection refused",
    "connection closed",
    "connection aborted",
    "connection lost",
    "broken pipe",
    "econnreset",
    "econnrefused",
    "etimedout",
    "socket hang up",
    "stream removed",
    "rst_stream",
    "goaway",
    "timed out",
    "timeout",
    "transport is closing",
    "unexpected eof",
    "network is unreachable",
    "network is down",
    "no route to host",
    "host is unreachable",
    "name resolution",
    "failed to lookup address",
];

/// Classify a failure by its status code and message.
///
/// Total over all inputs.
pub fn classify(code: StatusCode, message: &str) -> ErrorClass {
    match code {
        // Configuration or application rejections: never retried
        StatusCode::Unauthenticated
        | StatusCode::PermissionDenied
        | StatusCode::InvalidArgument
        | StatusCode::FailedPrecondition
        | StatusCode::NotFound
        | StatusCode::AlreadyExists
        | StatusCode::OutOfRange
        | StatusCode::Unimplemented => ErrorClass::Fatal,

        StatusCode::Unavailable
        | StatusCode::DeadlineExceeded
        | StatusCode::Aborted
        | StatusCode::ResourceExhausted => ErrorClass::Retryable,

        // Ambiguous codes: only the error text can tell a dropped
        // connection apart from an application failure
        StatusCode::Ok
        | StatusCode::Cancelled
        | StatusCode::Unknown
        | StatusCode::Internal
        | StatusCode::DataLoss => {
            if has_transient_marker(message) {
                ErrorClass::Retryable
            } else {
                ErrorClass::Fatal
            }
        }
    }
}

fn has_transient_marker(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lowered.contains(marker))
}

impl TransportError {
    pub fn class(&self) -> ErrorClass {
        classify(self.code, &self.message)
    }
}
