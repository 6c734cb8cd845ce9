use super::CursorState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One tracked input file.
///
/// Created when the harvester first discovers the file, updated by the driver
/// after every parse batch, and never deleted, so rediscovering the same
/// content is always recognized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// File name relative to the harvested directory
    pub name: String,

    pub size: u64,

    pub mod_time: DateTime<Utc>,

    /// Hex-encoded content hash
    pub checksum: String,

    /// Whether the parser has drained the file
    #[serde(default)]
    pub ingested: bool,

    /// Cursor to resume parsing from
    #[serde(default)]
    pub parser_state: Option<CursorState>,

    /// Set when an ingested file changes on disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_state: Option<ModifiedState>,
}

/// Metadata captured when an already-ingested file changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedState {
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    pub checksum: String,
    pub detected_at: DateTime<Utc>,
}

impl FileRecord {
    /// A freshly discovered, never parsed file.
    pub fn discovered(
        name: impl Into<String>,
        size: u64,
        mod_time: DateTime<Utc>,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            mod_time,
            checksum: checksum.into(),
            ingested: false,
            parser_state: None,
            modified_state: None,
        }
    }

    /// Same size and checksum as `other`.
    pub fn same_content(&self, other: &FileRecord) -> bool {
        self.size == other.size && self.checksum == other.checksum
    }

    /// Record that the on-disk file no longer matches what was ingested.
    pub fn mark_modified(&mut self, current: &FileRecord) {
        self.modified_state = Some(ModifiedState {
            size: current.size,
            mod_time: current.mod_time,
            checksum: current.checksum.clone(),
            detected_at: Utc::now(),
        });
    }

    /// Adopt a newer snapshot of the same file, keeping parse progress.
    pub fn refresh_from(&mut self, snapshot: &FileRecord) {
        self.size = snapshot.size;
        self.mod_time = snapshot.mod_time;
        self.checksum = snapshot.checksum.clone();
    }
}
