//! Protocol types for worker communication.
//!
//! Every message is a JSON object. Requests carry a `messageId` the worker
//! echoes back; the handshake messages carry none and are recognized by shape.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{ErrorInfo, TransportError};

/// `type` of the worker's handshake reply.
pub const READY_TYPE: &str = "sqlite3-api";

/// `result` of the worker's handshake reply.
pub const READY_RESULT: &str = "worker1-ready";

/// The only storage driver this crate opens databases with.
pub const DURABLE_VFS: &str = "opfs";

/// One row of a result set, keyed by column name.
pub type Row = serde_json::Map<String, Json>;

// ============================================================================
// Request/Response Envelope
// ============================================================================

/// Operations the worker understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Handshake start signal; never correlated.
    Start,
    Open,
    Exec,
    Close,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Open => "open",
            Self::Exec => "exec",
            Self::Close => "close",
        }
    }
}

/// Request envelope sent to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Operation to perform.
    #[serde(rename = "type")]
    pub kind: OperationKind,
    /// Operation-specific arguments.
    #[serde(default, skip_serializing_if = "Json::is_null")]
    pub args: Json,
    /// Correlation ID; absent only on the start signal.
    #[serde(
        rename = "messageId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub message_id: Option<String>,
}

impl RequestEnvelope {
    /// The uncorrelated start signal that opens the handshake.
    pub fn start() -> Self {
        Self {
            kind: OperationKind::Start,
            args: Json::Null,
            message_id: None,
        }
    }
}

/// Response envelope as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Echo of the request type, `"error"`, or [`READY_TYPE`].
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Result data on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Json>,
    /// Request ID this response corresponds to.
    #[serde(
        rename = "messageId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub message_id: Option<String>,
    /// Error information on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl ResponseEnvelope {
    /// Successful reply to a correlated request.
    pub fn success(kind: OperationKind, message_id: impl Into<String>, result: Json) -> Self {
        Self {
            kind: Some(kind.as_str().to_string()),
            result: Some(result),
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    /// Failed reply to a correlated request.
    pub fn failure(message_id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            kind: Some("error".to_string()),
            result: None,
            message_id,
            error: Some(error),
        }
    }

    /// The handshake ready signal.
    pub fn ready() -> Self {
        Self {
            kind: Some(READY_TYPE.to_string()),
            result: Some(Json::String(READY_RESULT.to_string())),
            message_id: None,
            error: None,
        }
    }

    /// Handshake failure: the worker could not load its runtime.
    pub fn startup_failed(error: ErrorInfo) -> Self {
        Self {
            kind: Some(READY_TYPE.to_string()),
            result: None,
            message_id: None,
            error: Some(error),
        }
    }
}

/// An inbound message, decoded once at the channel boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The worker finished loading and accepts requests.
    Ready,
    /// The worker could not start.
    StartupFailed(ErrorInfo),
    /// A request succeeded.
    Response { message_id: String, result: Json },
    /// A request failed inside the engine.
    ErrorResponse { message_id: String, error: ErrorInfo },
}

impl Inbound {
    /// Decode a raw message from the worker.
    pub fn decode(raw: Json) -> Result<Self, TransportError> {
        let envelope: ResponseEnvelope =
            serde_json::from_value(raw).map_err(|e| TransportError::Malformed(e.to_string()))?;

        match envelope {
            ResponseEnvelope {
                message_id: Some(message_id),
                error: Some(error),
                ..
            } => Ok(Self::ErrorResponse { message_id, error }),
            ResponseEnvelope {
                message_id: Some(message_id),
                result,
                ..
            } => Ok(Self::Response {
                message_id,
                result: result.unwrap_or(Json::Null),
            }),
            ResponseEnvelope {
                message_id: None,
                error: Some(error),
                ..
            } => Ok(Self::StartupFailed(error)),
            ResponseEnvelope {
                message_id: None,
                kind: Some(kind),
                result: Some(Json::String(result)),
                ..
            } if kind == READY_TYPE && result == READY_RESULT => Ok(Self::Ready),
            _ => Err(TransportError::Malformed(
                "message carries neither a messageId nor a handshake signal".to_string(),
            )),
        }
    }
}

// ============================================================================
// Operation Arguments
// ============================================================================

/// Arguments for `open`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenArgs {
    /// Database filename inside the durable store.
    pub filename: String,
    /// Storage driver; always [`DURABLE_VFS`] when sent by this crate.
    pub vfs: String,
}

/// Arguments for `exec`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecArgs {
    /// SQL text.
    pub sql: String,
    /// Positional array or named object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<Json>,
    /// Row shape; always `"object"`.
    pub row_mode: String,
    /// Present (and empty) when the caller wants rows back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_rows: Option<Vec<Row>>,
}

impl ExecArgs {
    pub fn new(sql: impl Into<String>, bind: Option<Json>, collect_rows: bool) -> Self {
        Self {
            sql: sql.into(),
            bind,
            row_mode: "object".to_string(),
            result_rows: collect_rows.then(Vec::new),
        }
    }

    /// Whether the worker should collect result rows.
    pub fn collects_rows(&self) -> bool {
        self.result_rows.is_some()
    }
}

/// Result of `open`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenResult {
    pub filename: String,
    pub vfs: String,
    #[serde(default)]
    pub persistent: bool,
}

/// Result of `exec`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResult {
    /// Collected rows when the request asked for them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_rows: Option<Vec<Row>>,
    /// Rows changed by the statement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_count: Option<u64>,
    /// Rowid of the inserted row, when the statement inserted one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_insert_rowid: Option<i64>,
}
