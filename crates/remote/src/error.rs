//! Error types for remote operations.
//!
//! Errors are categorized so that the retry and poll primitives can tell a
//! host that is still booting apart from one that rejected us outright.

use std::fmt;
use std::io;
use std::time::Duration;

/// Result type alias for remote operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of remote errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient connection failure (refused, timed out, handshake).
    Connection,
    /// Credentials missing or rejected.
    Authentication,
    /// Host never came back within the allowed window.
    Unreachable,
    /// A remote command exited non-zero.
    Command,
    /// A precondition on the target is not met.
    Capability,
    /// The remote answered with something we could not interpret.
    Response,
    /// A polled condition never became true.
    Timeout,
    /// Input rejected before any remote call.
    Validation,
    /// Remote object does not exist.
    NotFound,
    /// Other/unknown errors.
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection)
    }

    /// Get a user-friendly description of this error category.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Connection => "Connection failure",
            Self::Authentication => "Authentication failure",
            Self::Unreachable => "Host unreachable",
            Self::Command => "Remote command failed",
            Self::Capability => "Missing capability",
            Self::Response => "Malformed response",
            Self::Timeout => "Condition timed out",
            Self::Validation => "Invalid input",
            Self::NotFound => "Not found",
            Self::Other => "Unexpected error",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// How a single connection attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFailure {
    /// Nothing listening on the port (host booting, sshd not up yet).
    Refused,
    /// TCP connect or read timed out.
    TimedOut,
    /// Host or network unreachable, or the connection was reset.
    Unreachable,
    /// SSH protocol negotiation failed.
    Handshake,
    /// Name resolution or any other socket failure.
    Other,
}

impl ConnectionFailure {
    /// Classify an IO error raised while establishing a connection.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::TimedOut,
            io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => Self::Unreachable,
            _ => Self::Other,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Refused => "connection refused",
            Self::TimedOut => "timed out",
            Self::Unreachable => "unreachable",
            Self::Handshake => "handshake failed",
            Self::Other => "connection error",
        }
    }
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors that can occur while acting on a remote host.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No credential supplied, or the host rejected the one we sent.
    #[error("authentication failed for {user}@{host}: {message}")]
    Authentication {
        /// Target host.
        host: String,
        /// User we tried to log in as.
        user: String,
        /// What went wrong.
        message: String,
    },

    /// A single connection attempt failed.
    #[error("cannot connect to {host}:{port} ({kind}): {message}")]
    Connection {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
        /// Failure classification.
        kind: ConnectionFailure,
        /// Underlying error message.
        message: String,
    },

    /// Connection attempts exhausted the timeout window.
    #[error("host {host} unreachable after {:.1}s", elapsed.as_secs_f64())]
    UnreachableHost {
        /// Host that never answered.
        host: String,
        /// Time spent waiting.
        elapsed: Duration,
    },

    /// A command exited non-zero.
    #[error("remote command exited with status {exit_status}: {command}\n{}", stderr.trim())]
    RemoteCommand {
        /// The command as sent.
        command: String,
        /// Exit status reported by the remote shell.
        exit_status: i32,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The target lacks something we require before acting.
    #[error("{target} is missing capability: {capability}")]
    CapabilityMissing {
        /// What we inspected (e.g. "VM 101").
        target: String,
        /// The missing capability.
        capability: String,
    },

    /// A response did not have the expected shape.
    #[error("malformed response from {context}: {message}")]
    MalformedResponse {
        /// Where the response came from.
        context: String,
        /// What was wrong with it.
        message: String,
    },

    /// A polled condition never became true.
    #[error("timed out after {:.1}s waiting for {condition}", elapsed.as_secs_f64())]
    Timeout {
        /// Description of the condition.
        condition: String,
        /// Time spent polling.
        elapsed: Duration,
    },

    /// File permission mode outside the allowed octal digits.
    #[error("invalid permission mode '{0}': expected three digits from 0,1,2,4,6,7")]
    InvalidPermission(String),

    /// Remote object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// HTTP API request failed.
    #[error("HTTP request failed: {message}")]
    Http {
        /// Error message.
        message: String,
        /// HTTP status code if available.
        status: Option<u16>,
    },

    /// SSH session failure after the connection was established.
    #[error("SSH session error on {host}: {message}")]
    Session {
        /// Target host.
        host: String,
        /// Underlying error message.
        message: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an HTTP error.
    pub fn http(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Http {
            message: message.into(),
            status,
        }
    }

    /// Create a malformed-response error.
    pub fn malformed(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Get the error category for retry logic.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Authentication { .. } => ErrorCategory::Authentication,
            Error::Connection { kind, .. } => match kind {
                ConnectionFailure::Other => ErrorCategory::Other,
                _ => ErrorCategory::Connection,
            },
            Error::UnreachableHost { .. } => ErrorCategory::Unreachable,
            Error::RemoteCommand { .. } => ErrorCategory::Command,
            Error::CapabilityMissing { .. } => ErrorCategory::Capability,
            Error::MalformedResponse { .. } | Error::Json(_) => ErrorCategory::Response,
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::InvalidPermission(_) => ErrorCategory::Validation,
            Error::NotFound(_) => ErrorCategory::NotFound,
            Error::Http {
                status: Some(404), ..
            } => ErrorCategory::NotFound,
            Error::Http { .. } | Error::Session { .. } | Error::Io(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether the remote object is already gone.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::Http {
                message: format!("HTTP {code}"),
                status: Some(code),
            },
            other => Self::Http {
                message: other.to_string(),
                status: None,
            },
        }
    }
}
