//! Configuration module for opfs-sql.
//!
//! Handles worker timings, the storage root and environment variable expansion.

mod settings;

pub use settings::{expand_env_vars, Settings, SettingsError, StorageSettings, WorkerSettings};
