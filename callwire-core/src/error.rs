//! Error taxonomy for request completion.
//!
//! Every failure a caller can observe falls into one of three families:
//!
//! - [`TransportError`] - the attempt never produced a usable HTTP reply
//!   (connection, DNS, TLS failures and watchdog timeouts)
//! - [`ProtocolError`] - a reply arrived but the remote side reported failure
//!   (non-200 status or a well-formed remote error payload)
//! - [`CallError::Decode`] - the reply could not be turned into a value

use std::fmt;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Message suffix some servers attach to an "unknown content" failure that is
/// in fact a successful reply.
const BENIGN_OK_REPLY_SUFFIX: &str = "server replied: OK";

// ============================================================================
// Transport Error
// ============================================================================

/// Classification of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The remote host actively refused the connection.
    ConnectionRefused,
    /// The connection could not be established for another reason.
    ConnectionFailed,
    /// Host name lookup failed.
    HostNotFound,
    /// The remote host closed the connection before the reply was complete.
    RemoteHostClosed,
    /// No network activity within the request deadline.
    Timeout,
    /// TLS handshake or certificate verification failed.
    SslHandshakeFailed,
    /// The request could not be built or addressed.
    InvalidRequest,
    /// The transport could not interpret the reply content.
    UnknownContent,
    /// The transport went away without reporting an outcome.
    Disconnected,
    /// Anything else.
    Other,
}

impl TransportErrorKind {
    /// Returns a stable snake_case name for this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionRefused => "connection_refused",
            Self::ConnectionFailed => "connection_failed",
            Self::HostNotFound => "host_not_found",
            Self::RemoteHostClosed => "remote_host_closed",
            Self::Timeout => "timeout",
            Self::SslHandshakeFailed => "ssl_handshake_failed",
            Self::InvalidRequest => "invalid_request",
            Self::UnknownContent => "unknown_content",
            Self::Disconnected => "disconnected",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified transport failure with the transport's own message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport error ({kind}): {message}")]
pub struct TransportError {
    /// Failure classification.
    pub kind: TransportErrorKind,
    /// Human-readable message reported by the transport.
    pub message: String,
}

impl TransportError {
    /// Creates a transport error.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The error produced by the inactivity watchdog.
    pub fn timeout() -> Self {
        Self::new(TransportErrorKind::Timeout, "Request timeout.")
    }

    /// Returns true if this error was produced by the watchdog.
    pub fn is_timeout(&self) -> bool {
        self.kind == TransportErrorKind::Timeout
    }

    /// Returns true for the "unknown content" failure that a non-conformant
    /// server raises while actually answering with a successful body.
    ///
    /// Such errors do not terminate an attempt; the transport goes on to
    /// deliver the reply normally.
    pub fn is_benign_ok_reply(&self) -> bool {
        self.kind == TransportErrorKind::UnknownContent
            && self.message.ends_with(BENIGN_OK_REPLY_SUFFIX)
    }
}

// ============================================================================
// Protocol Error
// ============================================================================

/// A reply arrived but the remote side reported failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The HTTP status code was not 200.
    #[error("HTTP Status Code = {0}")]
    Status(u16),

    /// The payload carried a well-formed remote error.
    #[error("remote error: {message}")]
    Remote {
        /// Service-specific error code, if any.
        code: Option<i32>,
        /// Error description supplied by the remote service.
        message: String,
    },
}

impl ProtocolError {
    /// Creates a remote error without a code.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            code: None,
            message: message.into(),
        }
    }
}

// ============================================================================
// Decode Failure
// ============================================================================

/// Failure returned by a decode callback.
///
/// `Protocol` is propagated to the caller unchanged; anything else is
/// reported as [`CallError::Decode`] carrying the error's description.
#[derive(Debug, Error)]
pub enum DecodeFailure {
    /// The payload decoded into a remote error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The payload could not be decoded.
    #[error("{0}")]
    Other(BoxError),
}

impl DecodeFailure {
    /// Wraps any error (or message) as an unrecognized decode failure.
    pub fn other(error: impl Into<BoxError>) -> Self {
        Self::Other(error.into())
    }
}

impl From<serde_json::Error> for DecodeFailure {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

// ============================================================================
// Call Error
// ============================================================================

/// The error half of a completed call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The attempt failed at the transport level.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The remote side reported failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The decode callback rejected the payload.
    #[error("decode error: {0}")]
    Decode(String),
}

impl CallError {
    /// Returns true for transport failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if the watchdog ended the attempt.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }

    /// Returns the offending HTTP status for status errors.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Protocol(ProtocolError::Status(code)) => Some(*code),
            _ => None,
        }
    }

    /// Whether a fresh attempt could plausibly succeed.
    ///
    /// Only transport failures qualify; the remote side answered
    /// deliberately in every other case.
    pub fn is_retryable(&self) -> bool {
        self.is_transport()
    }
}

// ============================================================================
// Tests
// ============================================================================
