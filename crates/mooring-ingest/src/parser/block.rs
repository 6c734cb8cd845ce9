use crate::chunker::SioHeader;
use std::collections::HashSet;

/// Identity of a block in a multiplexed stream.
///
/// Block numbers roll over after 255, so the number alone is not enough;
/// the embedded timestamp tells two blocks with the same number apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockIdentity {
    pub number: u8,
    pub timestamp: u32,
}

impl From<&SioHeader> for BlockIdentity {
    fn from(header: &SioHeader) -> Self {
        Self {
            number: header.block_number,
            timestamp: header.timestamp,
        }
    }
}

/// Blocks seen in this session. Only ever grows.
#[derive(Debug, Default)]
pub struct ProcessedBlocks {
    seen: HashSet<BlockIdentity>,
}

impl ProcessedBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `identity`; `true` when it had not been seen before.
    pub fn insert(&mut self, identity: BlockIdentity) -> bool {
        self.seen.insert(identity)
    }

    pub fn contains(&self, identity: &BlockIdentity) -> bool {
        self.seen.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Forget everything. Only for a parser that restarts its scan from 0.
    pub(crate) fn clear(&mut self) {
        self.seen.clear();
    }
}
