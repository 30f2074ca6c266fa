//! Typed database surface over a worker session.
//!
//! A [`Database`] is one open session: it owns exactly one worker and the
//! transport to it, and must be closed with [`Database::close`] to release
//! the worker (dropping it also terminates the worker).
//!
//! Each typed operation checks that the statement's [`Category`] fits the
//! operation before anything is sent:
//!
//! | Operation   | Accepts                     | Returns                      |
//! |-------------|-----------------------------|------------------------------|
//! | `read_many` | `SELECT`                    | all rows                     |
//! | `read_one`  | `SELECT`                    | first row, if any            |
//! | `mutate`    | `INSERT`/`UPDATE`/`DELETE`  | [`ModificationResult`]       |
//! | `run`       | anything but `SELECT`       | nothing                      |

mod transaction;

pub use transaction::{Statement, StatementKind, StatementResult};

use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::classify::{classify, Category, Requirement};
use crate::config::{Settings, WorkerSettings};
use crate::error::{Error, Result, TransportError};
use crate::params::Params;
use crate::worker::protocol::{
    ExecArgs, ExecResult, OpenArgs, OpenResult, OperationKind, Row, DURABLE_VFS,
};
use crate::worker::{handshake, ChannelTransport, Host, ThreadHost};

/// Outcome of an insert, update or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModificationResult {
    /// Rows changed by the statement.
    pub changes: u64,
    /// Rowid of the inserted row, if the statement inserted one.
    pub last_insert_id: Option<i64>,
}

impl From<&ExecResult> for ModificationResult {
    fn from(result: &ExecResult) -> Self {
        Self {
            changes: result.change_count.unwrap_or(0),
            last_insert_id: result.last_insert_rowid,
        }
    }
}

/// An open database session.
#[derive(Debug)]
pub struct Database {
    transport: ChannelTransport,
    filename: String,
    open: AtomicBool,
}

impl Database {
    /// Open `filename` using settings from the default config locations.
    pub async fn open(filename: &str) -> Result<Self> {
        let settings = Settings::load()?;
        Self::open_with_settings(filename, &settings).await
    }

    /// Open `filename` on a thread host configured by `settings`.
    pub async fn open_with_settings(filename: &str, settings: &Settings) -> Result<Self> {
        let host = ThreadHost::from_settings(settings)?;
        Self::open_with_host(&host, filename, &settings.worker).await
    }

    /// Open `filename` on a worker spawned by `host`.
    ///
    /// The file is created in durable storage if it does not exist yet.
    pub async fn open_with_host(
        host: &dyn Host,
        filename: &str,
        settings: &WorkerSettings,
    ) -> Result<Self> {
        if filename.trim().is_empty() {
            return Err(Error::Validation("filename must not be empty".to_string()));
        }
        host.capabilities().check()?;

        let channel = host.spawn().await?;
        let transport = ChannelTransport::new(channel, settings.request_timeout());
        handshake::start(&transport, settings.startup_timeout()).await?;

        let opened: OpenResult = transport
            .request(
                OperationKind::Open,
                &OpenArgs {
                    filename: filename.to_string(),
                    vfs: DURABLE_VFS.to_string(),
                },
            )
            .await?;
        tracing::info!(filename = %opened.filename, vfs = %opened.vfs, "database opened");

        Ok(Self {
            transport,
            filename: filename.to_string(),
            open: AtomicBool::new(true),
        })
    }

    /// Filename the session was opened with.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Whether the session is still open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Close the database and release the worker.
    ///
    /// Closing an already closed session does nothing. The worker is released
    /// even when the engine reports a close failure; that failure is returned.
    pub async fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let outcome = self
            .transport
            .send(OperationKind::Close, serde_json::json!({}))
            .await;
        self.transport.close();

        match outcome {
            Ok(_) => {
                tracing::info!(filename = %self.filename, "database closed");
                Ok(())
            }
            Err(e) if e.is_closed() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Run a `SELECT` and return every row.
    pub async fn read_many<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<Vec<T>> {
        let result = self
            .dispatch("read_many", Some(Requirement::Read), sql, params.into(), true)
            .await?;
        decode_rows(result.result_rows.unwrap_or_default())
    }

    /// Run a `SELECT` and return the first row, if any.
    pub async fn read_one<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<Option<T>> {
        let result = self
            .dispatch("read_one", Some(Requirement::Read), sql, params.into(), true)
            .await?;
        result
            .result_rows
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(decode_row)
            .transpose()
    }

    /// Run an `INSERT`, `UPDATE` or `DELETE`.
    pub async fn mutate(&self, sql: &str, params: impl Into<Params>) -> Result<ModificationResult> {
        let result = self
            .dispatch("mutate", Some(Requirement::Mutation), sql, params.into(), false)
            .await?;
        Ok(ModificationResult::from(&result))
    }

    /// Run any statement that is not a `SELECT`, discarding its outcome.
    pub async fn run(&self, sql: &str, params: impl Into<Params>) -> Result<()> {
        self.dispatch("run", Some(Requirement::NotRead), sql, params.into(), false)
            .await?;
        Ok(())
    }

    /// Validate and send one `exec` request.
    ///
    /// `requirement` is `None` only for the transaction control statements.
    async fn dispatch(
        &self,
        operation: &'static str,
        requirement: Option<Requirement>,
        sql: &str,
        params: Params,
        collect_rows: bool,
    ) -> Result<ExecResult> {
        self.ensure_open()?;

        if sql.trim().is_empty() {
            return Err(Error::Validation("sql must not be empty".to_string()));
        }
        if let Some(expected) = requirement {
            let detected = classify(sql);
            if !expected.admits(detected) {
                return Err(Error::OperationMismatch {
                    operation,
                    expected,
                    detected,
                });
            }
        }
        params.validate()?;

        let bind = if params.is_empty() { None } else { params.to_json() };
        let args = ExecArgs::new(sql, bind, collect_rows);
        // A reply without a result means the engine reported nothing.
        let result: Option<ExecResult> = self.transport.request(OperationKind::Exec, &args).await?;
        Ok(result.unwrap_or_default())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TransportError::Closed.into())
        }
    }
}

fn decode_row<T: DeserializeOwned>(row: Row) -> Result<T> {
    serde_json::from_value(Json::Object(row)).map_err(Error::Decode)
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>> {
    rows.into_iter().map(decode_row).collect()
}

/// Kind used for a transaction statement that declares none.
pub(crate) fn default_kind(category: Category) -> StatementKind {
    match category {
        Category::Read => StatementKind::Query,
        c if c.is_mutation() => StatementKind::Execute,
        _ => StatementKind::Run,
    }
}
