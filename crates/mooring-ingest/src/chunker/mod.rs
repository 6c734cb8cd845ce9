//! Chunk sieving
//!
//! A [`Chunker`] buffers bytes as they are read from a stream, asks its
//! [`Sieve`] where the complete records are, and hands out [`Chunk`]s in
//! stream order. Bytes between records come out as [`ChunkKind::NonData`] so
//! callers can report them. Bytes after the last complete record stay
//! buffered until more data arrives.
//!
//! Offsets on every chunk are absolute stream offsets, starting from the base
//! the chunker was created or reset with.

pub mod escape;
pub mod ranges;
pub mod sieve;

use std::collections::VecDeque;

pub use ranges::RangeSet;
pub use sieve::{LineSieve, Sieve, Sieved, SioHeader, SioSieve};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// A complete record recognized by the sieve
    Data,
    /// Bytes between records that match no frame
    NonData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub kind: ChunkKind,
    pub start: u64,
    pub end: u64,
    pub bytes: Vec<u8>,
}

impl Chunk {
    pub fn range(&self) -> (u64, u64) {
        (self.start, self.end)
    }

    pub fn is_data(&self) -> bool {
        self.kind == ChunkKind::Data
    }
}

pub struct Chunker<S> {
    sieve: S,
    buffer: Vec<u8>,
    /// Stream offset of `buffer[0]`
    base: u64,
    /// Offset in `buffer` the next sieve pass starts from
    scanned: usize,
    ready: VecDeque<Chunk>,
}

impl<S: Sieve> Chunker<S> {
    pub fn new(sieve: S) -> Self {
        Self::with_base(sieve, 0)
    }

    pub fn with_base(sieve: S, base: u64) -> Self {
        Self {
            sieve,
            buffer: Vec::new(),
            base,
            scanned: 0,
            ready: VecDeque::new(),
        }
    }

    /// Append bytes and queue every chunk that is now complete.
    pub fn add(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);

        let sieved = self.sieve.sieve_from(&self.buffer, self.scanned);
        let mut consumed = 0usize;
        for range in sieved.ranges {
            if range.start > consumed {
                self.push(ChunkKind::NonData, consumed, range.start);
            }
            self.push(ChunkKind::Data, range.start, range.end);
            consumed = range.end;
        }

        self.scanned = sieved.resume.saturating_sub(consumed);
        if consumed > 0 {
            self.buffer.drain(..consumed);
            self.base += consumed as u64;
        }
    }

    fn push(&mut self, kind: ChunkKind, start: usize, end: usize) {
        self.ready.push_back(Chunk {
            kind,
            start: self.base + start as u64,
            end: self.base + end as u64,
            bytes: self.buffer[start..end].to_vec(),
        });
    }

    pub fn next_chunk(&mut self) -> Option<Chunk> {
        self.ready.pop_front()
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Bytes held back because they do not form a complete record yet.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Hand out the held-back tail as a final data chunk, for streams that
    /// are known to be complete.
    pub fn flush(&mut self) -> Option<Chunk> {
        if self.buffer.is_empty() {
            return None;
        }
        let end = self.buffer.len();
        let chunk = Chunk {
            kind: ChunkKind::Data,
            start: self.base,
            end: self.base + end as u64,
            bytes: std::mem::take(&mut self.buffer),
        };
        self.base += end as u64;
        self.scanned = 0;
        Some(chunk)
    }

    /// Drop everything buffered and restart at stream offset `base`.
    pub fn reset(&mut self, base: u64) {
        self.buffer.clear();
        self.ready.clear();
        self.base = base;
        self.scanned = 0;
    }
}
