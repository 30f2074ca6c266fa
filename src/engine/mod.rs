//! The database engine driven by the worker.
//!
//! The caller side never touches anything in here; it only sees the
//! protocol messages the worker agent produces from it.
//!
//! # Runtime loading
//!
//! The engine runtime is loaded once per [`RuntimeLoader`] and shared by every
//! worker spawned from it. The first caller performs the load; concurrent
//! callers await the same in-flight initialization. A failed load is not
//! remembered, so the next caller retries.

mod sqlite;

pub use sqlite::SqliteDatabase;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::error::ErrorInfo;

/// A loaded engine runtime bound to a durable storage root.
#[derive(Debug)]
pub struct EngineRuntime {
    storage_root: PathBuf,
    sqlite_version: &'static str,
}

impl EngineRuntime {
    /// Directory holding database files.
    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Version of the linked SQLite library.
    pub fn sqlite_version(&self) -> &'static str {
        self.sqlite_version
    }
}

/// Once-initialized engine runtime.
#[derive(Debug)]
pub struct RuntimeLoader {
    storage_root: PathBuf,
    runtime: OnceCell<Arc<EngineRuntime>>,
}

impl RuntimeLoader {
    /// Create a loader for databases stored under `storage_root`.
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            runtime: OnceCell::new(),
        }
    }

    /// Directory the runtime will store databases in.
    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Load the runtime, or return the one already loaded.
    pub async fn load(&self) -> Result<Arc<EngineRuntime>, ErrorInfo> {
        self.runtime
            .get_or_try_init(|| async {
                fs::create_dir_all(&self.storage_root).map_err(|e| {
                    ErrorInfo::new(format!(
                        "cannot prepare storage root {}: {e}",
                        self.storage_root.display()
                    ))
                })?;

                let runtime = EngineRuntime {
                    storage_root: self.storage_root.clone(),
                    sqlite_version: rusqlite::version(),
                };
                tracing::info!(
                    storage_root = %runtime.storage_root.display(),
                    sqlite_version = runtime.sqlite_version,
                    "engine runtime loaded"
                );
                Ok::<_, ErrorInfo>(Arc::new(runtime))
            })
            .await
            .cloned()
    }

    /// Whether the runtime has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.runtime.initialized()
    }
}
