//! Error types for the transport boundary and the session API
//!
//! Transport errors are absorbed by the session and turned into state
//! transitions. `SessionError` only covers misuse of the session API.

use std::fmt;
use thiserror::Error;

/// Status code attached to a transport failure.
///
/// Numeric values follow the gRPC status code table so remote services can
/// forward their codes unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl StatusCode {
    /// Map a numeric wire code. Unassigned values map to `Unknown`.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::Cancelled,
            2 => StatusCode::Unknown,
            3 => StatusCode::InvalidArgument,
            4 => StatusCode::DeadlineExceeded,
            5 => StatusCode::NotFound,
            6 => StatusCode::AlreadyExists,
            7 => StatusCode::PermissionDenied,
            8 => StatusCode::ResourceExhausted,
            9 => StatusCode::FailedPrecondition,
            10 => StatusCode::Aborted,
            11 => StatusCode::OutOfRange,
            12 => StatusCode::Unimplemented,
            13 => StatusCode::Internal,
            14 => StatusCode::Unavailable,
            15 => StatusCode::DataLoss,
            16 => StatusCode::Unauthenticated,
            _ => StatusCode::Unknown,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::AlreadyExists => "ALREADY_EXISTS",
            StatusCode::PermissionDenied => "PERMISSION_DENIED",
            StatusCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            StatusCode::FailedPrecondition => "FAILED_PRECONDITION",
            StatusCode::Aborted => "ABORTED",
            StatusCode::OutOfRange => "OUT_OF_RANGE",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::DataLoss => "DATA_LOSS",
            StatusCode::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Failure raised by a transport, either while opening a subscription or
/// as the terminal event of an open one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct TransportError {
    pub code: StatusCode,
    pub message: String,
}

impl TransportError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unauthenticated, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let code = match err.kind() {
            ErrorKind::TimedOut => StatusCode::DeadlineExceeded,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::AddrNotAvailable
            | ErrorKind::AddrInUse
            | ErrorKind::NetworkUnreachable
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkDown => StatusCode::Unavailable,
            ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
            ErrorKind::InvalidInput | ErrorKind::InvalidData => StatusCode::InvalidArgument,
            _ => StatusCode::Unknown,
        };
        Self::new(code, err.to_string())
    }
}

/// Why a session ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    /// A non-retryable error, regardless of remaining budget
    #[error("fatal error: {0}")]
    Fatal(TransportError),

    /// Retryable failures persisted past the attempt ceiling
    #[error("gave up after {attempts} reconnection attempts, last error: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: TransportError,
    },
}

impl FailureReason {
    pub fn last_error(&self) -> &TransportError {
        match self {
            FailureReason::Fatal(err) => err,
            FailureReason::Exhausted { last_error, .. } => last_error,
        }
    }
}

/// Misuse of the session control API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session already started")]
    AlreadyStarted,

    #[error("session already terminated ({0})")]
    AlreadyTerminated(&'static str),

    #[error("session must be started from within a tokio runtime")]
    NoRuntime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_round_trip_known_values() {
        for code in 0..=16 {
            assert_eq!(StatusCode::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_unassigned_code_is_unknown() {
        assert_eq!(StatusCode::from_code(17), StatusCode::Unknown);
        assert_eq!(StatusCode::from_code(u32::MAX), StatusCode::Unknown);
    }

    #[test]
    fn test_io_error_mapping() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert_eq!(TransportError::from(reset).code, StatusCode::Unavailable);

        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        assert_eq!(TransportError::from(timeout).code, StatusCode::DeadlineExceeded);

        let other = std::io::Error::new(std::io::ErrorKind::Other, "mystery");
        assert_eq!(TransportError::from(other).code, StatusCode::Unknown);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unreachable_errno_is_retryable() {
        // ENETUNREACH, EHOSTUNREACH, ENETDOWN
        for errno in [101, 113, 100] {
            let err = TransportError::from(std::io::Error::from_raw_os_error(errno));
            assert_eq!(err.code, StatusCode::Unavailable, "errno {}", errno);
            assert!(err.class().is_retryable(), "errno {}", errno);
        }
    }

    #[test]
    fn test_unreachable_network_is_unavailable() {
        for kind in [
            std::io::ErrorKind::NetworkUnreachable,
            std::io::ErrorKind::HostUnreachable,
            std::io::ErrorKind::NetworkDown,
            std::io::ErrorKind::AddrInUse,
        ] {
            let err = TransportError::from(std::io::Error::from(kind));
            assert_eq!(err.code, StatusCode::Unavailable, "{:?}", kind);
        }
    }

    #[test]
    fn test_display_includes_code_and_message() {
        let err = TransportError::unauthenticated("bad token");
        assert_eq!(err.to_string(), "UNAUTHENTICATED (16): bad token");
    }
}
