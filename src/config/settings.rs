//! TOML-based configuration for opfs-sql.
//!
//! Supports a config file (opfs-sql.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [worker]
//! request_timeout_ms = 30000
//! startup_timeout_ms = 10000
//!
//! [storage]
//! root = "${HOME}/.local/share/opfs-sql"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Worker configuration.
    pub worker: WorkerSettings,

    /// Durable storage configuration.
    pub storage: StorageSettings,
}

/// Worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// How long a dispatched request may wait for its response.
    pub request_timeout_ms: u64,

    /// How long the handshake may wait for the worker's ready signal.
    pub startup_timeout_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            startup_timeout_ms: 10_000,
        }
    }
}

impl WorkerSettings {
    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Startup timeout as a duration.
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.request_timeout_ms == 0 {
            return Err(SettingsError::InvalidConfig(
                "worker.request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.startup_timeout_ms == 0 {
            return Err(SettingsError::InvalidConfig(
                "worker.startup_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Durable storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory holding database files (supports ${ENV_VAR} expansion).
    pub root: Option<String>,
}

impl StorageSettings {
    /// Resolve the storage root directory.
    ///
    /// Falls back to `<data_dir>/opfs-sql` when no root is configured.
    pub fn resolved_root(&self) -> Result<PathBuf, SettingsError> {
        if let Some(root) = &self.root {
            return Ok(PathBuf::from(expand_env_vars(root)?));
        }

        dirs::data_dir()
            .map(|dir| dir.join("opfs-sql"))
            .ok_or_else(|| {
                SettingsError::InvalidConfig(
                    "could not determine a data directory; set storage.root".to_string(),
                )
            })
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.worker.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `OPFS_SQL_CONFIG`
    /// 2. `./opfs-sql.toml`
    /// 3. `~/.config/opfs-sql/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("OPFS_SQL_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("opfs-sql.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("opfs-sql").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Settings with storage rooted at `root` and default worker timings.
    pub fn with_storage_root(root: impl AsRef<Path>) -> Self {
        Self {
            storage: StorageSettings {
                root: Some(root.as_ref().to_string_lossy().into_owned()),
            },
            ..Self::default()
        }
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if !(ch.is_alphanumeric() || ch == '_') {
                    break;
                }
                var_name.push(ch);
                chars.next();
            }
            if var_name.is_empty() {
                // Lone $
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
