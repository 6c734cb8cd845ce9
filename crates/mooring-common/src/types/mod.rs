//! Common types used across mooring
//!
//! These are the pieces of state that cross component boundaries: the
//! harvester produces [`FileRecord`]s, parsers produce [`Sample`]s and
//! [`CursorState`]s, and the driver persists everything as a [`DriverState`]
//! memento.

mod cursor;
mod driver_state;
mod file_record;
mod location;
mod sample;

pub use cursor::{ByteRange, CursorState, InProcessBlock, RangeSetState};
pub use driver_state::{DriverState, DRIVER_STATE_VERSION};
pub use file_record::{FileRecord, ModifiedState};
pub use location::DataSourceLocation;
pub use sample::Sample;

use serde::{Deserialize, Serialize};

/// Checksum algorithm type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}
