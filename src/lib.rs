//! # opfs-sql
//!
//! A persistent, file-backed SQL database driven from a background worker.
//!
//! ## Architecture
//!
//! All engine work happens off the caller's task, on a worker that speaks a
//! small request/response protocol:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │          Database (typed operations, transactions)       │
//! │   read_many / read_one / mutate / run / transaction      │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [classify + validate params]
//! ┌─────────────────────────────────────────────────────────┐
//! │      ChannelTransport (handshake, correlation IDs,       │
//! │               per-request timeouts)                      │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [JSON envelopes]
//! ┌─────────────────────────────────────────────────────────┐
//! │        Worker (engine runtime + one open database)       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use opfs_sql::{params, Database};
//!
//! let db = Database::open("app.db").await?;
//! db.run("CREATE TABLE IF NOT EXISTS t (x INTEGER)", ()).await?;
//! let inserted = db.mutate("INSERT INTO t (x) VALUES (?)", params![1]).await?;
//! let rows: Vec<serde_json::Value> = db.read_many("SELECT x FROM t", ()).await?;
//! db.close().await?;
//! ```

pub mod classify;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod params;
pub mod worker;

pub use classify::{classify, Category, Requirement};
pub use config::Settings;
pub use database::{Database, ModificationResult, Statement, StatementKind, StatementResult};
pub use error::{Error, ErrorInfo, Result, TransportError};
pub use params::{Params, Value};
