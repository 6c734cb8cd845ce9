use super::FileRecord;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema version written into every memento.
pub const DRIVER_STATE_VERSION: f64 = 0.1;

fn default_version() -> f64 {
    DRIVER_STATE_VERSION
}

/// The driver memento: `{version, <data source key>: {<file name>: FileRecord}}`.
///
/// Only the driver mutates it. Entries are inserted or updated, never removed,
/// so a restart always sees every file it has ever parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverState {
    #[serde(default = "default_version")]
    pub version: f64,

    #[serde(flatten)]
    sources: BTreeMap<String, BTreeMap<String, FileRecord>>,
}

impl Default for DriverState {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverState {
    pub fn new() -> Self {
        Self {
            version: DRIVER_STATE_VERSION,
            sources: BTreeMap::new(),
        }
    }

    /// Make sure `key` has an (initially empty) file map.
    pub fn ensure_source(&mut self, key: &str) {
        self.sources.entry(key.to_string()).or_default();
    }

    pub fn source_keys(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn files(&self, key: &str) -> Option<&BTreeMap<String, FileRecord>> {
        self.sources.get(key)
    }

    pub fn file(&self, key: &str, name: &str) -> Option<&FileRecord> {
        self.sources.get(key).and_then(|files| files.get(name))
    }

    /// Insert or replace the record for `record.name` under `key`.
    pub fn upsert(&mut self, key: &str, record: FileRecord) {
        self.sources
            .entry(key.to_string())
            .or_default()
            .insert(record.name.clone(), record);
    }

    /// Apply `f` to an existing record. Returns false when the record is unknown.
    pub fn update_file(&mut self, key: &str, name: &str, f: impl FnOnce(&mut FileRecord)) -> bool {
        match self.sources.get_mut(key).and_then(|files| files.get_mut(name)) {
            Some(record) => {
                f(record);
                true
            },
            None => false,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
