//! Collaborator callbacks the driver calls out to.

use mooring_common::types::{DriverState, Sample};
use mooring_common::MooringError;
use serde::Serialize;
use std::fmt;

/// Everything the driver hands back to its host.
///
/// Calls come from the driver's tasks and must not block for long. None of
/// them can fail: once `on_data` returns, the batch counts as delivered and
/// the state that follows it is persisted.
pub trait DriverCallbacks: Send + Sync {
    /// Decoded samples for one data source, in stream order.
    fn on_data(&self, key: &str, samples: Vec<Sample>);

    /// The memento changed. Persist it to resume from here.
    ///
    /// Calls arrive in commit order. They are made while the driver holds
    /// its state lock, so implementations must not call back into
    /// [`DatasetDriver::state`](super::DatasetDriver::state).
    fn on_state_change(&self, state: &DriverState);

    /// A non-fatal, operator-visible notification.
    fn on_event(&self, event: DriverEvent);

    /// A data source failed and stopped.
    fn on_exception(&self, exception: DriverException);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverEvent {
    NewFile {
        key: String,
        file: String,
        size: u64,
    },
    SampleDecodeError {
        key: String,
        file: String,
        position: u64,
        message: String,
    },
    ModifiedAfterIngestion {
        key: String,
        file: String,
        ingested_checksum: String,
        current_checksum: String,
        size: u64,
    },
    UnexpectedData {
        key: String,
        file: String,
        start: u64,
        end: u64,
    },
    FileTruncated {
        key: String,
        file: String,
        size: u64,
    },
    FileGrowth {
        key: String,
        file: String,
        previous_size: u64,
        size: u64,
    },
}

impl DriverEvent {
    pub fn key(&self) -> &str {
        match self {
            DriverEvent::NewFile { key, .. }
            | DriverEvent::SampleDecodeError { key, .. }
            | DriverEvent::ModifiedAfterIngestion { key, .. }
            | DriverEvent::UnexpectedData { key, .. }
            | DriverEvent::FileTruncated { key, .. }
            | DriverEvent::FileGrowth { key, .. } => key,
        }
    }
}

/// A fatal failure of one data source, or of the driver when `key` is `None`.
#[derive(Debug)]
pub struct DriverException {
    pub key: Option<String>,
    pub error: MooringError,
}

impl DriverException {
    pub fn for_source(key: impl Into<String>, error: MooringError) -> Self {
        Self {
            key: Some(key.into()),
            error,
        }
    }
}

impl fmt::Display for DriverException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "data source '{key}': {}", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}
