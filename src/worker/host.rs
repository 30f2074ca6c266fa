//! Host execution environment: where workers come from.
//!
//! A [`Host`] reports which primitives it offers and spawns workers, each
//! connected to the caller by a pair of unbounded JSON message channels.
//! [`ThreadHost`] runs each worker on a dedicated OS thread over SQLite
//! files in a storage root directory.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as Json;
use tokio::sync::mpsc;

use super::agent::Agent;
use crate::config::Settings;
use crate::engine::RuntimeLoader;
use crate::error::{Error, Result};

/// Primitives a host makes available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Background execution contexts can be spawned.
    pub workers: bool,
    /// An origin-scoped durable file store is reachable from workers.
    pub durable_storage: bool,
}

impl Capabilities {
    /// Fail with a capability error naming the first missing primitive.
    pub fn check(&self) -> Result<()> {
        if !self.workers {
            return Err(Error::Capability(
                "background workers are not available in this environment".to_string(),
            ));
        }
        if !self.durable_storage {
            return Err(Error::Capability(
                "durable file storage is not available in this environment".to_string(),
            ));
        }
        Ok(())
    }
}

/// Handle used to stop a spawned worker.
pub trait WorkerHandle: Send + Sync + fmt::Debug {
    /// Stop the worker. Pending work may be discarded.
    fn terminate(&self);
}

/// Both ends of a freshly spawned worker, as seen by the caller.
#[derive(Debug)]
pub struct WorkerChannel {
    /// Messages to the worker.
    pub outbound: mpsc::UnboundedSender<Json>,
    /// Messages from the worker.
    pub inbound: mpsc::UnboundedReceiver<Json>,
    /// Handle for terminating the worker.
    pub handle: Box<dyn WorkerHandle>,
}

/// A source of workers.
#[async_trait]
pub trait Host: Send + Sync + fmt::Debug {
    /// Which primitives this host offers.
    fn capabilities(&self) -> Capabilities;

    /// Spawn one worker.
    async fn spawn(&self) -> Result<WorkerChannel>;
}

/// Host that runs each worker on its own OS thread.
#[derive(Debug, Clone)]
pub struct ThreadHost {
    loader: Arc<RuntimeLoader>,
}

impl ThreadHost {
    /// Create a host storing databases under `storage_root`.
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self::with_loader(Arc::new(RuntimeLoader::new(storage_root)))
    }

    /// Create a host sharing an existing runtime loader.
    pub fn with_loader(loader: Arc<RuntimeLoader>) -> Self {
        Self { loader }
    }

    /// Create a host from settings.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(settings.storage.resolved_root()?))
    }

    /// The runtime loader shared by this host's workers.
    pub fn loader(&self) -> &Arc<RuntimeLoader> {
        &self.loader
    }
}

#[async_trait]
impl Host for ThreadHost {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            workers: true,
            durable_storage: storage_reachable(self.loader.storage_root()),
        }
    }

    async fn spawn(&self) -> Result<WorkerChannel> {
        let (to_worker, inbox) = mpsc::unbounded_channel();
        let (outbox, from_worker) = mpsc::unbounded_channel();
        let terminated = Arc::new(AtomicBool::new(false));

        let agent = Agent::new(Arc::clone(&self.loader));
        let flag = Arc::clone(&terminated);
        std::thread::Builder::new()
            .name("opfs-sql-worker".to_string())
            .spawn(move || agent.run(inbox, outbox, flag))
            .map_err(|e| Error::Capability(format!("failed to spawn worker thread: {e}")))?;

        Ok(WorkerChannel {
            outbound: to_worker,
            inbound: from_worker,
            handle: Box::new(ThreadWorker { terminated }),
        })
    }
}

/// Termination flag for a worker thread.
///
/// The thread exits once the flag is set and its next message arrives, or as
/// soon as the caller drops its outbound sender.
#[derive(Debug)]
struct ThreadWorker {
    terminated: Arc<AtomicBool>,
}

impl WorkerHandle for ThreadWorker {
    fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
    }
}

/// The storage root exists as a writable directory, or can be created.
fn storage_reachable(root: &Path) -> bool {
    let mut candidate = Some(root);
    while let Some(path) = candidate {
        if let Ok(meta) = fs::metadata(path) {
            return meta.is_dir() && !meta.permissions().readonly();
        }
        candidate = path.parent();
    }
    false
}
