use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A decoded instrument sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Logical stream the sample belongs to (e.g. "ctdbp_cd_dcl_instrument")
    pub stream: String,

    /// Instrument time of the sample, when the record carries one
    pub internal_timestamp: Option<DateTime<Utc>>,

    /// Decoded field values
    pub values: serde_json::Map<String, serde_json::Value>,

    /// Source file this came from
    #[serde(default)]
    pub source_file: Option<String>,

    /// Offset of the record in the (unescaped) source stream
    pub source_offset: u64,
}

impl Sample {
    pub fn new(stream: impl Into<String>, source_offset: u64) -> Self {
        Self {
            stream: stream.into(),
            internal_timestamp: None,
            values: serde_json::Map::new(),
            source_file: None,
            source_offset,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.internal_timestamp = Some(timestamp);
        self
    }

    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn value(&self, name: &str) -> Option<&serde_json::Value> {
        self.values.get(name)
    }
}
