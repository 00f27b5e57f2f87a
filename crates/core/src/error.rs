//! Error types for the conduit domain.
//!
//! Two layers live here:
//! - [`ErrorCode`] / [`ToolError`]: the closed taxonomy that is shown to the
//!   model and the user. Every failure ends up as exactly one code.
//! - Rust error enums (`Error`, `TransportError`, `StoreError`, `ToolFailure`)
//!   used for propagation between crates with `?`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The closed failure taxonomy.
///
/// Serialized as the `ERROR_*` wire strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "ERROR_UNKNOWN_TOOL")]
    UnknownTool,
    #[serde(rename = "ERROR_INVALID_ARGS")]
    InvalidArgs,
    #[serde(rename = "ERROR_RATE_LIMITED")]
    RateLimited,
    #[serde(rename = "ERROR_TIMEOUT")]
    Timeout,
    #[serde(rename = "ERROR_TOOL_LOOP_EXCEEDED")]
    ToolLoopExceeded,
    #[serde(rename = "ERROR_CONTEXT_OVERFLOW")]
    ContextOverflow,
    #[serde(rename = "ERROR_SESSION_NOT_FOUND")]
    SessionNotFound,
    #[serde(rename = "ERROR_STORE_LOCKED")]
    StoreLocked,
    #[serde(rename = "ERROR_FILE_NOT_FOUND")]
    FileNotFound,
    #[serde(rename = "ERROR_PERMISSION_DENIED")]
    PermissionDenied,
    #[serde(rename = "ERROR_FILE_TOO_LARGE")]
    FileTooLarge,
    #[serde(rename = "ERROR_DISK_FULL")]
    DiskFull,
    #[serde(rename = "ERROR_SANDBOX_VIOLATION")]
    SandboxViolation,
    #[serde(rename = "ERROR_NETWORK_ERROR")]
    NetworkError,
    #[serde(rename = "ERROR_EXECUTION_FAILED")]
    ExecutionFailed,
    #[serde(rename = "ERROR_CANCELLED")]
    Cancelled,
    #[serde(rename = "ERROR_TRANSPORT_FAILURE")]
    TransportFailure,
    #[serde(rename = "ERROR_STORAGE")]
    Storage,
    #[serde(rename = "ERROR_UNKNOWN")]
    Unknown,
}

impl ErrorCode {
    /// The wire form, e.g. `ERROR_RATE_LIMITED`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownTool => "ERROR_UNKNOWN_TOOL",
            Self::InvalidArgs => "ERROR_INVALID_ARGS",
            Self::RateLimited => "ERROR_RATE_LIMITED",
            Self::Timeout => "ERROR_TIMEOUT",
            Self::ToolLoopExceeded => "ERROR_TOOL_LOOP_EXCEEDED",
            Self::ContextOverflow => "ERROR_CONTEXT_OVERFLOW",
            Self::SessionNotFound => "ERROR_SESSION_NOT_FOUND",
            Self::StoreLocked => "ERROR_STORE_LOCKED",
            Self::FileNotFound => "ERROR_FILE_NOT_FOUND",
            Self::PermissionDenied => "ERROR_PERMISSION_DENIED",
            Self::FileTooLarge => "ERROR_FILE_TOO_LARGE",
            Self::DiskFull => "ERROR_DISK_FULL",
            Self::SandboxViolation => "ERROR_SANDBOX_VIOLATION",
            Self::NetworkError => "ERROR_NETWORK_ERROR",
            Self::ExecutionFailed => "ERROR_EXECUTION_FAILED",
            Self::Cancelled => "ERROR_CANCELLED",
            Self::TransportFailure => "ERROR_TRANSPORT_FAILURE",
            Self::Storage => "ERROR_STORAGE",
            Self::Unknown => "ERROR_UNKNOWN",
        }
    }

    /// Default recoverability for a code.
    ///
    /// Recoverable failures are handed back to the model so it can adapt.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::InvalidArgs
            | Self::RateLimited
            | Self::Timeout
            | Self::FileNotFound
            | Self::PermissionDenied
            | Self::FileTooLarge
            | Self::SandboxViolation
            | Self::NetworkError
            | Self::ExecutionFailed => true,

            Self::UnknownTool
            | Self::ToolLoopExceeded
            | Self::ContextOverflow
            | Self::SessionNotFound
            | Self::StoreLocked
            | Self::DiskFull
            | Self::Cancelled
            | Self::TransportFailure
            | Self::Storage
            | Self::Unknown => false,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure: what the model and the user get to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct ToolError {
    pub code: ErrorCode,
    pub message: String,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    /// Set on `ERROR_RATE_LIMITED`: seconds until the window admits a call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ToolError {
    /// Build an error with the code's default recoverability.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            recoverable: code.is_recoverable(),
            remediation: None,
            retry_after_secs: None,
        }
    }

    /// A rate-limit denial carrying when the caller may try again.
    pub fn rate_limited(message: impl Into<String>, retry_after_secs: u64) -> Self {
        let mut error = Self::new(ErrorCode::RateLimited, message)
            .with_remediation(format!("retry after {retry_after_secs} seconds"));
        error.retry_after_secs = Some(retry_after_secs);
        error
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub fn fatal(mut self) -> Self {
        self.recoverable = false;
        self
    }
}

/// The top-level error type for conduit operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Transport errors ---
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Context errors ---
    #[error("Context overflow: {tokens} pinned tokens exceed the budget of {budget}")]
    ContextOverflow { tokens: usize, budget: usize },

    // --- Turn errors ---
    #[error("Tool loop exceeded: more than {max_iterations} tool iterations in one turn")]
    ToolLoopExceeded { max_iterations: usize },

    #[error("Turn cancelled")]
    Cancelled,

    // --- Registry errors ---
    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map onto the taxonomy for structured reporting.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Transport(_) => ErrorCode::TransportFailure,
            Self::Store(e) => e.code(),
            Self::ContextOverflow { .. } => ErrorCode::ContextOverflow,
            Self::ToolLoopExceeded { .. } => ErrorCode::ToolLoopExceeded,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::DuplicateTool(_)
            | Self::Config { .. }
            | Self::Serialization(_)
            | Self::Internal(_) => ErrorCode::Unknown,
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Transport not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Whether a fresh attempt may succeed (used by the transport's own
    /// bounded retry loop, never by the controller).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Store is locked by another process: {0}")]
    Locked(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SessionNotFound(_) => ErrorCode::SessionNotFound,
            Self::Locked(_) => ErrorCode::StoreLocked,
            _ => ErrorCode::Storage,
        }
    }
}

/// Typed failures a tool handler may raise.
///
/// Handlers return `anyhow::Error`; the classifier downcasts to this type
/// first, before falling back to OS and string-level inspection.
#[derive(Debug, Error)]
pub enum ToolFailure {
    #[error("Not found: {path}")]
    NotFound { path: String },

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Sandbox violation: {reason}")]
    SandboxViolation { reason: String },

    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Execution failed: {reason}")]
    ExecutionFailed { reason: String },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_wire_form() {
        let json = serde_json::to_string(&ErrorCode::RateLimited).unwrap();
        assert_eq!(json, "\"ERROR_RATE_LIMITED\"");
        assert_eq!(ErrorCode::ContextOverflow.to_string(), "ERROR_CONTEXT_OVERFLOW");

        let back: ErrorCode = serde_json::from_str("\"ERROR_STORE_LOCKED\"").unwrap();
        assert_eq!(back, ErrorCode::StoreLocked);
    }

    #[test]
    fn unknown_is_not_recoverable() {
        assert!(!ErrorCode::Unknown.is_recoverable());
        assert!(!ToolError::new(ErrorCode::Unknown, "boom").recoverable);
        assert!(ToolError::new(ErrorCode::InvalidArgs, "bad").recoverable);
    }

    #[test]
    fn tool_error_display_and_remediation() {
        let err = ToolError::new(ErrorCode::RateLimited, "too many calls")
            .with_remediation("retry after 12 seconds");
        assert_eq!(err.to_string(), "ERROR_RATE_LIMITED: too many calls");
        assert_eq!(err.remediation.as_deref(), Some("retry after 12 seconds"));
        assert!(!err.clone().fatal().recoverable);
        assert_eq!(err.retry_after_secs, None);
    }

    #[test]
    fn rate_limited_carries_retry_after_as_a_field() {
        let err = ToolError::rate_limited("rate limit exceeded for 'grep'", 42);
        assert_eq!(err.code, ErrorCode::RateLimited);
        assert!(err.recoverable);
        assert_eq!(err.retry_after_secs, Some(42));
        assert_eq!(err.remediation.as_deref(), Some("retry after 42 seconds"));

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["retry_after_secs"], 42);
        let plain = serde_json::to_value(ToolError::new(ErrorCode::Timeout, "slow")).unwrap();
        assert!(plain.get("retry_after_secs").is_none());
    }

    #[test]
    fn store_error_codes() {
        assert_eq!(
            Error::Store(StoreError::SessionNotFound("s1".into())).code(),
            ErrorCode::SessionNotFound
        );
        assert_eq!(StoreError::Locked("db".into()).code(), ErrorCode::StoreLocked);
        assert_eq!(StoreError::Storage("disk".into()).code(), ErrorCode::Storage);
    }

    #[test]
    fn transport_transience() {
        assert!(TransportError::RateLimited { retry_after_secs: 1 }.is_transient());
        assert!(
            TransportError::ApiError {
                status_code: 503,
                message: "unavailable".into()
            }
            .is_transient()
        );
        assert!(!TransportError::AuthenticationFailed("bad key".into()).is_transient());
    }
}
