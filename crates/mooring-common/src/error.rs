//! Error types for mooring
//!
//! Errors fall into three families:
//!
//! - [`ConfigError`]: fatal, raised while a driver is being built and never retried
//! - [`MooringError::Harvester`]: kills one data source's harvester task
//! - [`SampleDecodeError`]: local to a single record; the stream keeps going

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mooring operations
pub type Result<T> = std::result::Result<T, MooringError>;

/// Main error type for mooring
#[derive(Error, Debug)]
pub enum MooringError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Harvester failed reading {}: {source}", path.display())]
    Harvester {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Sample decode error: {0}")]
    SampleDecode(#[from] SampleDecodeError),

    #[error("Invalid resource parameter '{name}': {reason}")]
    Resource { name: String, reason: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Background task failed: {0}")]
    TaskJoin(String),
}

impl MooringError {
    /// Wrap an I/O failure on a harvested path.
    pub fn harvester(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MooringError::Harvester {
            path: path.into(),
            source,
        }
    }

    pub fn resource(name: impl Into<String>, reason: impl Into<String>) -> Self {
        MooringError::Resource {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error should stop sampling for the whole source.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, MooringError::SampleDecode(_) | MooringError::Resource { .. })
    }
}

/// Configuration validation failures.
///
/// Every variant names the offending key so an operator can fix the file
/// without reading a backtrace.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required section '{0}'")]
    MissingSection(&'static str),

    #[error("data source '{key}' is configured in '{present_in}' but missing from '{missing_from}'")]
    UnmatchedSourceKey {
        key: String,
        present_in: &'static str,
        missing_from: &'static str,
    },

    #[error("data source '{key}': invalid value for '{field}': {reason}")]
    InvalidValue {
        key: String,
        field: &'static str,
        reason: String,
    },

    #[error("data source '{key}': invalid file pattern '{pattern}': {reason}")]
    InvalidPattern {
        key: String,
        pattern: String,
        reason: String,
    },

    #[error("data sources '{first}' and '{second}' watch the same target")]
    DuplicateTarget { first: String, second: String },

    #[error("'{0}' is reserved and cannot be used as a data source key")]
    ReservedKey(String),

    #[error("failed to load configuration: {0}")]
    Load(String),
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.into(),
            field,
            reason: reason.into(),
        }
    }
}

/// A single record could not be decoded.
///
/// `position` is the stream offset of the offending chunk.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("at offset {position}: {message}")]
pub struct SampleDecodeError {
    pub position: u64,
    pub message: String,
}

impl SampleDecodeError {
    pub fn new(position: u64, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}
