//! Background side of the protocol.
//!
//! Runs on the worker thread: receives request envelopes, drives the engine
//! one request at a time in arrival order, and posts one reply per request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value as Json};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use super::protocol::{
    ExecArgs, OpenArgs, OpenResult, OperationKind, RequestEnvelope, ResponseEnvelope,
    DURABLE_VFS,
};
use crate::engine::{EngineRuntime, RuntimeLoader, SqliteDatabase};
use crate::error::ErrorInfo;

/// Worker-side state: the loaded runtime and the open database, if any.
#[derive(Debug)]
pub(crate) struct Agent {
    loader: Arc<RuntimeLoader>,
    runtime: Option<Arc<EngineRuntime>>,
    db: Option<SqliteDatabase>,
}

impl Agent {
    pub(crate) fn new(loader: Arc<RuntimeLoader>) -> Self {
        Self {
            loader,
            runtime: None,
            db: None,
        }
    }

    /// Process messages until the caller hangs up or the worker is terminated.
    pub(crate) fn run(
        mut self,
        mut inbox: UnboundedReceiver<Json>,
        outbox: UnboundedSender<Json>,
        terminated: Arc<AtomicBool>,
    ) {
        while let Some(raw) = inbox.blocking_recv() {
            if terminated.load(Ordering::Acquire) {
                break;
            }
            let reply = self.handle(raw);
            let reply = match serde_json::to_value(&reply) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode reply");
                    continue;
                }
            };
            if outbox.send(reply).is_err() {
                break;
            }
        }

        if let Some(db) = self.db.take() {
            if let Err(e) = db.close() {
                tracing::warn!(error = %e, "failed to close database on worker exit");
            }
        }
        tracing::debug!("worker stopped");
    }

    /// Handle one raw request and build its reply.
    pub(crate) fn handle(&mut self, raw: Json) -> ResponseEnvelope {
        let message_id = raw
            .get("messageId")
            .and_then(Json::as_str)
            .map(str::to_string);

        let request: RequestEnvelope = match serde_json::from_value(raw) {
            Ok(request) => request,
            Err(e) => {
                return ResponseEnvelope::failure(
                    message_id,
                    ErrorInfo::new(format!("malformed request: {e}")),
                )
            }
        };

        let (kind, message_id) = match (request.kind, request.message_id) {
            (OperationKind::Start, _) => return self.start(),
            (kind, None) => {
                return ResponseEnvelope::failure(
                    None,
                    ErrorInfo::new(format!("{} request without messageId", kind.as_str())),
                )
            }
            (kind, Some(message_id)) => (kind, message_id),
        };

        let outcome = match kind {
            OperationKind::Open => self.open(request.args),
            OperationKind::Exec => self.exec(request.args),
            OperationKind::Close => self.close(),
            OperationKind::Start => return self.start(),
        };

        match outcome {
            Ok(result) => ResponseEnvelope::success(kind, message_id, result),
            Err(mut error) => {
                error.operation = Some(kind.as_str().to_string());
                ResponseEnvelope::failure(Some(message_id), error)
            }
        }
    }

    fn start(&mut self) -> ResponseEnvelope {
        match futures::executor::block_on(self.loader.load()) {
            Ok(runtime) => {
                self.runtime = Some(runtime);
                ResponseEnvelope::ready()
            }
            Err(error) => ResponseEnvelope::startup_failed(error),
        }
    }

    fn open(&mut self, args: Json) -> Result<Json, ErrorInfo> {
        let args: OpenArgs = parse_args(args)?;
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| ErrorInfo::new("worker has not been started"))?;

        if args.vfs != DURABLE_VFS {
            return Err(ErrorInfo::new(format!(
                "unsupported vfs {:?}; only {DURABLE_VFS:?} is available",
                args.vfs
            )));
        }
        if let Some(db) = &self.db {
            return Err(ErrorInfo::new(format!(
                "database {:?} is already open in this worker",
                db.filename()
            )));
        }

        self.db = Some(SqliteDatabase::open(runtime, &args.filename)?);
        to_result(&OpenResult {
            filename: args.filename,
            vfs: args.vfs,
            persistent: true,
        })
    }

    fn exec(&mut self, args: Json) -> Result<Json, ErrorInfo> {
        let args: ExecArgs = parse_args(args)?;
        let db = self
            .db
            .as_ref()
            .ok_or_else(|| ErrorInfo::new("no database is open"))?;
        to_result(&db.exec(&args)?)
    }

    fn close(&mut self) -> Result<Json, ErrorInfo> {
        let Some(db) = self.db.take() else {
            return Ok(json!({ "filename": null }));
        };
        let filename = db.filename().to_string();
        db.close()?;
        Ok(json!({ "filename": filename }))
    }
}

fn parse_args<T: DeserializeOwned>(args: Json) -> Result<T, ErrorInfo> {
    serde_json::from_value(args).map_err(|e| ErrorInfo::new(format!("invalid arguments: {e}")))
}

fn to_result<T: serde::Serialize>(value: &T) -> Result<Json, ErrorInfo> {
    serde_json::to_value(value).map_err(|e| ErrorInfo::new(format!("cannot encode result: {e}")))
}
