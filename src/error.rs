//! Error taxonomy shared by the session, the backend client and the dispatcher
//!
//! Every failure a tool invocation can hit is one of the [`Error`] variants.
//! The dispatcher converts them into an [`ErrorRecord`] so the calling agent
//! always receives the same structured shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Result alias used across the library
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure of a tool, resource or prompt request
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The URL handed to set-target is not an absolute http(s) URL
    #[error("invalid target URL '{url}': {reason}")]
    InvalidTarget { url: String, reason: String },

    /// The backend call exceeded the configured timeout
    #[error("request to {url} timed out after {}s", .timeout.as_secs_f64())]
    Timeout { url: String, timeout: Duration },

    /// Transport-level failure reaching the backend
    #[error("FHIR server at {url} is unreachable: {cause}")]
    Unreachable { url: String, cause: String },

    /// Missing, malformed or mistyped arguments
    #[error("invalid arguments for '{operation}': {reason}")]
    InvalidArguments { operation: String, reason: String },

    /// No tool, resource or prompt with this name
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    /// The backend answered with an error status
    #[error("FHIR server rejected the request with status {status}: {diagnostics}")]
    BackendRejected {
        status: u16,
        diagnostics: String,
        outcome: Option<Value>,
    },

    /// Administrative operation invoked while admin tools are switched off
    #[error("operation '{0}' is disabled: admin tools are not enabled on this server")]
    Disabled(String),
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidTarget,
    Timeout,
    Unreachable,
    InvalidArguments,
    UnknownOperation,
    BackendRejected,
    Disabled,
}

impl Error {
    pub fn invalid_arguments(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidArguments {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_target(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidTarget {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidTarget { .. } => ErrorKind::InvalidTarget,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Unreachable { .. } => ErrorKind::Unreachable,
            Error::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            Error::UnknownOperation(_) => ErrorKind::UnknownOperation,
            Error::BackendRejected { .. } => ErrorKind::BackendRejected,
            Error::Disabled(_) => ErrorKind::Disabled,
        }
    }

    /// HTTP status returned by the backend, when the failure came from one
    pub fn backend_status(&self) -> Option<u16> {
        match self {
            Error::BackendRejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// JSON-RPC error code used when the failure is reported at protocol level
    pub fn json_rpc_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::InvalidArguments => -32602,
            ErrorKind::UnknownOperation => -32601,
            ErrorKind::InvalidTarget => -32001,
            ErrorKind::Timeout => -32002,
            ErrorKind::Unreachable => -32003,
            ErrorKind::BackendRejected => -32004,
            ErrorKind::Disabled => -32005,
        }
    }

    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord::from(self)
    }
}

/// Structured failure returned to the calling agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_status: Option<u16>,
    /// Backend `OperationOutcome`, passed through untouched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Value>,
}

impl From<&Error> for ErrorRecord {
    fn from(error: &Error) -> Self {
        let outcome = match error {
            Error::BackendRejected { outcome, .. } => outcome.clone(),
            _ => None,
        };
        Self {
            kind: error.kind(),
            message: error.to_string(),
            backend_status: error.backend_status(),
            outcome,
        }
    }
}
