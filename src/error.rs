//! Error types for cfgsnap.
//!
//! Device-facing failures (`FetchError`) and filesystem failures (`WriteError`)
//! are kept apart so a job result can say which side of the backup broke.
//! Config and inventory errors are fatal to the process and never reach a job.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to retrieve a running configuration from a device.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("device unreachable: {0}")]
    Unreachable(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The device answered but the payload was not usable configuration text.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("no fetch command configured for platform '{0}'")]
    UnsupportedPlatform(String),

    #[error("failed to launch fetch command: {0}")]
    Spawn(String),
}

impl FetchError {
    /// Transient failures worth another attempt.
    ///
    /// Bad credentials, garbage output and missing platform commands will not
    /// fix themselves between attempts.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Unreachable(_) | FetchError::Timeout(_) | FetchError::Protocol(_)
        )
    }
}

/// Failure to persist an artifact or summary.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("device id '{0}' cannot be used as a file name")]
    InvalidDeviceId(String),

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("destination already exists: {0}. Refusing to overwrite.")]
    Collision(PathBuf),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("blocking write task failed: {0}")]
    Task(String),
}

/// Invalid or unreadable application configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration value for '{key}': {message}")]
    Invalid { key: &'static str, message: String },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

/// The device inventory could not be loaded.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("failed to read inventory {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse inventory: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("inventory entry {index}: {message}")]
    Invalid { index: usize, message: String },
}
