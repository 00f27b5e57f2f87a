//! Error classification: maps raw handler failures onto the closed
//! [`ErrorCode`] taxonomy.
//!
//! Typed errors anywhere in the `anyhow` chain win; message heuristics are
//! only consulted when nothing in the chain is recognised. Everything else
//! becomes `ERROR_UNKNOWN` and is not recoverable.

use conduit_core::error::{ErrorCode, ToolError, ToolFailure, TransportError};
use std::io;

/// ENOSPC on Linux and macOS.
const ENOSPC: i32 = 28;

/// Classify a handler failure. Pure: the same error always yields the same
/// [`ToolError`].
pub fn classify(err: &anyhow::Error) -> ToolError {
    for cause in err.chain() {
        if let Some(classified) = classify_typed(cause) {
            return classified;
        }
    }

    let rendered = format!("{err:#}");
    let code = classify_message(&rendered);
    let error = ToolError::new(code, rendered);
    match remediation(code) {
        Some(hint) => error.with_remediation(hint),
        None => error,
    }
}

fn classify_typed(cause: &(dyn std::error::Error + 'static)) -> Option<ToolError> {
    if let Some(err) = cause.downcast_ref::<ToolError>() {
        return Some(err.clone());
    }

    let code = if let Some(failure) = cause.downcast_ref::<ToolFailure>() {
        match failure {
            ToolFailure::NotFound { .. } => ErrorCode::FileNotFound,
            ToolFailure::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            ToolFailure::SandboxViolation { .. } => ErrorCode::SandboxViolation,
            ToolFailure::TooLarge { .. } => ErrorCode::FileTooLarge,
            ToolFailure::Network(_) => ErrorCode::NetworkError,
            ToolFailure::ExecutionFailed { .. } => ErrorCode::ExecutionFailed,
            ToolFailure::InvalidArguments(_) => ErrorCode::InvalidArgs,
            ToolFailure::Cancelled => ErrorCode::Cancelled,
        }
    } else if let Some(io_err) = cause.downcast_ref::<io::Error>() {
        classify_io(io_err)?
    } else if cause.downcast_ref::<serde_json::Error>().is_some() {
        ErrorCode::InvalidArgs
    } else if cause.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
        ErrorCode::Timeout
    } else if cause.downcast_ref::<TransportError>().is_some() {
        ErrorCode::NetworkError
    } else {
        return None;
    };

    let error = ToolError::new(code, cause.to_string());
    Some(match remediation(code) {
        Some(hint) => error.with_remediation(hint),
        None => error,
    })
}

fn classify_io(err: &io::Error) -> Option<ErrorCode> {
    if err.raw_os_error() == Some(ENOSPC) {
        return Some(ErrorCode::DiskFull);
    }
    match err.kind() {
        io::ErrorKind::NotFound => Some(ErrorCode::FileNotFound),
        io::ErrorKind::PermissionDenied => Some(ErrorCode::PermissionDenied),
        io::ErrorKind::TimedOut => Some(ErrorCode::Timeout),
        io::ErrorKind::StorageFull => Some(ErrorCode::DiskFull),
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::HostUnreachable
        | io::ErrorKind::NetworkUnreachable => Some(ErrorCode::NetworkError),
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => Some(ErrorCode::InvalidArgs),
        _ => None,
    }
}

fn classify_message(message: &str) -> ErrorCode {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["no such file", "not found", "does not exist"]) {
        ErrorCode::FileNotFound
    } else if has(&["permission denied", "access denied", "operation not permitted"]) {
        ErrorCode::PermissionDenied
    } else if has(&["no space left", "disk full", "quota exceeded"]) {
        ErrorCode::DiskFull
    } else if has(&["timed out", "timeout", "deadline"]) {
        ErrorCode::Timeout
    } else if has(&[
        "connection refused",
        "connection reset",
        "dns",
        "network",
        "unreachable",
    ]) {
        ErrorCode::NetworkError
    } else if has(&["invalid argument", "missing argument", "expected"]) {
        ErrorCode::InvalidArgs
    } else {
        ErrorCode::Unknown
    }
}

/// Suggested next step shown to the model alongside the error.
pub fn remediation(code: ErrorCode) -> Option<&'static str> {
    Some(match code {
        ErrorCode::FileNotFound => "check the path; list the directory to find the right name",
        ErrorCode::PermissionDenied => "choose a path you have access to",
        ErrorCode::FileTooLarge => "read a smaller file or pass a lower max_bytes",
        ErrorCode::DiskFull => "free disk space before writing again",
        ErrorCode::SandboxViolation => "stay inside the workspace and avoid blocked commands",
        ErrorCode::NetworkError => "the network call failed; retry later",
        ErrorCode::ExecutionFailed => "inspect the error output and adjust the command",
        ErrorCode::InvalidArgs => "fix the arguments to match the tool's parameter schema",
        ErrorCode::Timeout => "retry with a smaller unit of work",
        ErrorCode::Unknown => "report this failure to the user",
        _ => return None,
    })
}
