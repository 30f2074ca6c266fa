//! Error types shared by every layer of the crate.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::{Category, Requirement};
use crate::config::SettingsError;

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure details reported by the worker for a single request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Human-readable message from the engine.
    pub message: String,
    /// Operation the worker was handling when it failed ("open", "exec", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Engine-specific cause (SQLite result codes), kept for inspection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<serde_json::Value>,
}

impl ErrorInfo {
    /// Create error info carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            operation: None,
            cause: None,
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.operation {
            Some(op) => write!(f, "{} (during {})", self.message, op),
            None => f.write_str(&self.message),
        }
    }
}

/// Errors raised by the channel between the caller and the worker.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The handshake has not completed yet.
    #[error("transport not ready")]
    NotReady,

    /// The transport was closed; no further requests are accepted.
    #[error("transport closed")]
    Closed,

    /// The worker went away while requests were outstanding.
    #[error("worker exited unexpectedly")]
    WorkerExited,

    /// The worker reported a failure while starting up.
    #[error("worker failed to start: {0}")]
    StartupFailed(String),

    /// An inbound message could not be decoded.
    #[error("malformed message from worker: {0}")]
    Malformed(String),
}

/// Errors that can occur while talking to the database.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed SQL, parameters or statement list, caught before dispatch.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The SQL statement does not belong to the requested typed operation.
    #[error("wrong operation for statement kind: {operation} expects {expected}, got {detected}")]
    OperationMismatch {
        /// Name of the typed operation that was called.
        operation: &'static str,
        /// Category the operation accepts.
        expected: Requirement,
        /// Category the statement classified as.
        detected: Category,
    },

    /// The channel to the worker is unusable.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A dispatched request received no response in time.
    #[error("operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The engine rejected an otherwise well-formed request.
    #[error("engine error: {0}")]
    Engine(ErrorInfo),

    /// The host lacks a primitive the database needs.
    #[error("capability unavailable: {0}")]
    Capability(String),

    /// A statement inside a transaction failed and the transaction was aborted.
    #[error("transaction execution failed: {source}")]
    Transaction {
        /// The failure that aborted the transaction.
        #[source]
        source: Box<Error>,
        /// Failure raised by the best-effort rollback, if any.
        rollback: Option<Box<Error>>,
    },

    /// Engine rows did not deserialize into the requested type.
    #[error("failed to decode result: {0}")]
    Decode(#[source] serde_json::Error),

    /// Settings could not be loaded.
    #[error(transparent)]
    Config(#[from] SettingsError),
}

impl Error {
    /// Check if this error is a request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Check if this error means the worker channel is gone or not yet usable.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Check if this error is a closed transport.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Self::Transport(TransportError::Closed | TransportError::WorkerExited)
        )
    }

    /// The engine failure behind this error, looking through transaction wrapping.
    pub fn engine_info(&self) -> Option<&ErrorInfo> {
        match self {
            Self::Engine(info) => Some(info),
            Self::Transaction { source, .. } => source.engine_info(),
            _ => None,
        }
    }

    /// The rollback failure suppressed while aborting a transaction.
    pub fn suppressed(&self) -> Option<&Error> {
        match self {
            Self::Transaction { rollback, .. } => rollback.as_deref(),
            _ => None,
        }
    }
}
