//! Error types for the session manager and its transport.
//!
//! Two layers of errors exist:
//!
//! - [`TransportError`]: the underlying cause reported by the SSH transport
//!   (protocol errors, I/O errors, timeouts, rejected channel requests).
//! - [`SessionError`]: the closed set of errors a caller can receive through
//!   an operation's completion. Variants that wrap a transport failure carry
//!   it as their source.
//!
//! # Retry Classification
//!
//! The transport retries a failed connect only when [`is_retryable_error`]
//! classifies the failure as transient. Authentication failures take
//! precedence over connection keywords and are never retried, to avoid
//! repeatedly failing with bad credentials.

use std::time::Duration;

use thiserror::Error;

/// Underlying cause of a transport-level failure.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("SSH protocol error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Remote host disconnected: {0}")]
    RemoteDisconnect(String),

    #[error("Request rejected by server: {0}")]
    RequestRejected(&'static str),

    #[error("Not connected")]
    NotConnected,

    #[error("Shell is not running")]
    ShellNotRunning,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("{0}")]
    Other(String),
}

/// Errors delivered through operation completions.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The operation needed a password and none was supplied.
    #[error("No password supplied for this session")]
    NoPassword,

    /// The connect step did not yield a live connection.
    #[error("Not connected to the remote host")]
    NotConnected,

    /// The server rejected authentication.
    #[error("Not authorized on the remote host")]
    NotAuthorized,

    /// The operation needed a session channel and none existed.
    #[error("No session channel available")]
    NoSessionChannel,

    #[error("Error writing command '{command}': {cause}")]
    ErrorWritingCommand {
        command: String,
        #[source]
        cause: TransportError,
    },

    #[error("Error executing command '{command}': {cause}")]
    ErrorExecutingCommand {
        command: String,
        #[source]
        cause: TransportError,
    },

    #[error("Shell not started: {0}")]
    ShellNotStarted(#[source] TransportError),
}

/// Authentication error patterns that indicate permanent failures.
const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "password authentication failed",
    "permission denied",
    "publickey",
    "auth fail",
    "no authentication",
];

/// Connection error patterns that indicate transient failures.
const RETRYABLE_ERRORS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "timed out",
    "timeout",
    "network is unreachable",
    "no route to host",
    "host is down",
    "temporary failure",
    "resource temporarily unavailable",
    "handshake failed",
    "failed to connect",
    "broken pipe",
];

/// Determines if a connect failure is transient and worth retrying.
///
/// Authentication patterns are checked first and always win. Unknown errors
/// are retried unless they look like an SSH protocol error without a
/// timeout or connect keyword.
pub(crate) fn is_retryable_error(error: &str) -> bool {
    let error_lower = error.to_lowercase();

    if AUTH_ERRORS.iter().any(|p| error_lower.contains(p)) {
        return false;
    }

    if RETRYABLE_ERRORS.iter().any(|p| error_lower.contains(p)) {
        return true;
    }

    !error_lower.contains("ssh")
        || error_lower.contains("timeout")
        || error_lower.contains("connect")
}

impl TransportError {
    /// Whether a connect attempt that failed with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::InvalidAddress(_) => false,
            TransportError::Timeout(_) => true,
            other => is_retryable_error(&other.to_string()),
        }
    }
}
