//! Parser cursor state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Half-open byte range `[start, end)` within a stream.
pub type ByteRange = (u64, u64);

/// Minimal state needed to resume parsing a stream without re-emitting data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CursorState {
    /// Everything before `position` has been consumed.
    ///
    /// Used for line-per-record files and single logical streams.
    ByteOffset { position: u64 },

    /// Consumption tracked as a set of ranges, for multiplexed streams whose
    /// records can be confirmed out of read order.
    RangeSet(RangeSetState),
}

impl CursorState {
    pub fn start_of_stream() -> Self {
        CursorState::ByteOffset { position: 0 }
    }

    /// The byte offset, if this is an offset cursor.
    pub fn position(&self) -> Option<u64> {
        match self {
            CursorState::ByteOffset { position } => Some(*position),
            CursorState::RangeSet(_) => None,
        }
    }
}

/// A block that has been decoded but whose samples have not all been handed
/// off yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InProcessBlock {
    pub start: u64,
    pub end: u64,
    /// Samples decoded from the block
    pub samples: usize,
    /// Samples already returned to the caller
    pub returned: usize,
}

impl InProcessBlock {
    pub fn range(&self) -> ByteRange {
        (self.start, self.end)
    }

    pub fn is_complete(&self) -> bool {
        self.returned >= self.samples
    }
}

/// Range-set cursor.
///
/// `unprocessed` is kept sorted and disjoint. A range only leaves it once every
/// record inside has been decoded and returned, or explicitly skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RangeSetState {
    #[serde(default)]
    pub in_process: Vec<InProcessBlock>,
    #[serde(default)]
    pub unprocessed: Vec<ByteRange>,
    /// Timestamp of the most recent block confirmed
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Stream length the ranges were computed against
    #[serde(default)]
    pub stream_length: u64,
}

impl RangeSetState {
    /// State for a stream of `len` bytes that has never been read.
    pub fn fresh(len: u64) -> Self {
        Self {
            in_process: Vec::new(),
            unprocessed: if len > 0 { vec![(0, len)] } else { Vec::new() },
            timestamp: None,
            stream_length: len,
        }
    }

    /// Total bytes not yet consumed.
    pub fn unprocessed_bytes(&self) -> u64 {
        self.unprocessed.iter().map(|(s, e)| e - s).sum()
    }
}
