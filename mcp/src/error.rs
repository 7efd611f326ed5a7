//! Backend error types.
//!
//! Defines error variants for backend operations including connection,
//! forwarding, and configuration errors, plus the transient-error classifier
//! used by the retry loop.

use thiserror::Error;

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("Server '{server_id}' unreachable at {endpoint}")]
    ServerUnreachable { server_id: String, endpoint: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Message fragments that indicate a transient connection-level failure.
///
/// Substring matching on error text is a placeholder heuristic (wording
/// depends on the transport); a typed fault code should replace it if the
/// transport ever grows one. Matching is case-sensitive.
const CONNECTION_ERROR_PATTERNS: &[&str] = &[
    "reset",
    "refused",
    "socket hang up",
    "network",
    "timeout",
    "timed out",
    "closed",
    "broken pipe",
    "unreachable",
];

/// Check whether an error message looks like a transient connection failure.
pub fn is_connection_error(message: &str) -> bool {
    CONNECTION_ERROR_PATTERNS
        .iter()
        .any(|pattern| message.contains(pattern))
}

impl BackendError {
    /// Whether this error should trigger the connection retry loop.
    ///
    /// Non-transient errors (invalid arguments, permission failures, config
    /// mistakes) are surfaced immediately without retry.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Timeout(_) => true,
            BackendError::ServerUnreachable { .. } => true,
            BackendError::Transport(msg)
            | BackendError::ConnectionFailed(msg)
            | BackendError::ToolExecution(msg) => is_connection_error(msg),
            BackendError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}
