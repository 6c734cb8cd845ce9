//! Parser for multiplexed SIO streams, with a range-set cursor.
//!
//! One physical file interleaves blocks from several instruments. Each
//! parser keeps only the blocks carrying its own instrument id and drops the
//! rest from its `unprocessed` set, so several data sources can consume the
//! same file independently.
//!
//! Offsets are positions in the unescaped stream. Because escape sequences
//! change lengths, a parser can never seek into the middle of the file:
//! every resume re-reads from offset 0 and skips what the cursor says is
//! already consumed. Block identities are rebuilt during that scan.

use super::block::{BlockIdentity, ProcessedBlocks};
use super::{ParseBatch, Parser, Stream};
use crate::chunker::escape::Unescaper;
use crate::chunker::{Chunk, ChunkKind, Chunker, RangeSet, SioHeader, SioSieve};
use crate::decoder::{DecodeInput, Decoder};
use chrono::{DateTime, Utc};
use mooring_common::types::{ByteRange, CursorState, InProcessBlock, RangeSetState, Sample};
use mooring_common::{MooringError, Result};
use std::collections::VecDeque;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use tracing::{debug, trace};

pub struct SioParser {
    stream: Stream,
    decoder: Arc<dyn Decoder>,
    instrument_id: String,
    file_name: String,
    read_size: usize,
    chunker: Chunker<SioSieve>,
    unescaper: Unescaper,
    eof: bool,
    /// Unescaped bytes handed to the chunker so far
    absorbed: u64,

    unprocessed: RangeSet,
    in_process: Vec<InProcessBlock>,
    timestamp: Option<DateTime<Utc>>,
    stream_length: u64,

    processed: ProcessedBlocks,
    /// Decoded samples not yet returned, with the start of their block
    pending: VecDeque<(u64, Sample)>,
}

impl SioParser {
    /// Parser for a stream that has never been read.
    pub fn new(
        stream: Stream,
        decoder: Arc<dyn Decoder>,
        instrument_id: &str,
        file_name: &str,
        read_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            stream,
            decoder,
            instrument_id: instrument_id.to_string(),
            file_name: file_name.to_string(),
            read_size: read_size.max(1),
            chunker: Chunker::new(SioSieve::new()?),
            unescaper: Unescaper::new(),
            eof: false,
            absorbed: 0,
            unprocessed: RangeSet::new(),
            in_process: Vec::new(),
            timestamp: None,
            stream_length: 0,
            processed: ProcessedBlocks::new(),
            pending: VecDeque::new(),
        })
    }

    fn fill(&mut self) -> Result<()> {
        let mut buf = vec![0u8; self.read_size];
        let read = self.stream.read(&mut buf)?;
        if read == 0 {
            self.eof = true;
            return Ok(());
        }

        let plain = self.unescaper.feed(&buf[..read]);
        let before = self.absorbed;
        self.absorbed += plain.len() as u64;

        // bytes past the length the cursor was computed against are new
        if self.absorbed > self.stream_length {
            self.unprocessed
                .insert((self.stream_length.max(before), self.absorbed));
            self.stream_length = self.absorbed;
        }

        self.chunker.add(&plain);
        Ok(())
    }

    fn handle_chunk(&mut self, chunk: Chunk, batch: &mut ParseBatch) {
        let header = match chunk.kind {
            ChunkKind::Data => SioHeader::parse(&chunk.bytes),
            ChunkKind::NonData => None,
        };
        match header {
            Some(header) => self.handle_block(&chunk, &header, batch),
            None => self.skip_unexpected(chunk.range(), batch),
        }
    }

    fn skip_unexpected(&mut self, range: ByteRange, batch: &mut ParseBatch) {
        for gap in self.unprocessed.intersection(range) {
            trace!(file = %self.file_name, start = gap.0, end = gap.1, "unexpected data");
            self.unprocessed.remove(gap);
            batch.unexpected.push(gap);
        }
    }

    fn handle_block(&mut self, chunk: &Chunk, header: &SioHeader, batch: &mut ParseBatch) {
        let range = chunk.range();
        let ours = header.instrument_id == self.instrument_id;
        let identity = BlockIdentity::from(header);

        if let Some(block) = self.in_process.iter().find(|b| b.start == chunk.start).copied() {
            self.processed.insert(identity);
            match self.decoder.decode(&DecodeInput::block(&chunk.bytes, chunk.start, header)) {
                Ok(samples) => self.enqueue(chunk.start, samples, block.returned),
                Err(e) => {
                    batch.errors.push(e);
                    self.in_process.retain(|b| b.start != chunk.start);
                    self.unprocessed.remove(range);
                }
            }
            return;
        }

        if !self.unprocessed.contains(range) {
            if ours {
                self.processed.insert(identity);
            }
            if self.unprocessed.overlaps(range) {
                debug!(file = %self.file_name, start = range.0, end = range.1, "dropping partially consumed block");
                self.unprocessed.remove(range);
            }
            return;
        }

        if !ours {
            self.unprocessed.remove(range);
            return;
        }

        if !self.processed.insert(identity) {
            debug!(
                file = %self.file_name,
                block = identity.number,
                timestamp = identity.timestamp,
                "duplicate block dropped"
            );
            self.unprocessed.remove(range);
            return;
        }

        match self.decoder.decode(&DecodeInput::block(&chunk.bytes, chunk.start, header)) {
            Ok(samples) if !samples.is_empty() => {
                self.in_process.push(InProcessBlock {
                    start: range.0,
                    end: range.1,
                    samples: samples.len(),
                    returned: 0,
                });
                self.enqueue(chunk.start, samples, 0);
            }
            Ok(_) => {
                self.unprocessed.remove(range);
                self.timestamp = header.time().or(self.timestamp);
            }
            Err(e) => {
                trace!(file = %self.file_name, position = chunk.start, error = %e, "block skipped");
                batch.errors.push(e);
                self.unprocessed.remove(range);
            }
        }
    }

    fn enqueue(&mut self, block_start: u64, samples: Vec<Sample>, skip: usize) {
        let file_name = &self.file_name;
        self.pending
            .extend(samples.into_iter().skip(skip).map(|mut sample| {
                sample.source_file = Some(file_name.clone());
                (block_start, sample)
            }));
    }

    /// Count one sample of the block at `block_start` as returned, retiring
    /// the block once all of its samples are out.
    fn mark_returned(&mut self, block_start: u64, timestamp: Option<DateTime<Utc>>) {
        let Some(index) = self.in_process.iter().position(|b| b.start == block_start) else {
            return;
        };
        self.in_process[index].returned += 1;
        if self.in_process[index].is_complete() {
            let block = self.in_process.remove(index);
            self.unprocessed.remove(block.range());
            self.timestamp = timestamp.or(self.timestamp);
        }
    }
}

impl Parser for SioParser {
    fn get_records(&mut self, n: usize) -> Result<ParseBatch> {
        let mut batch = ParseBatch::new(self.state());

        loop {
            while batch.samples.len() < n {
                let Some((block_start, sample)) = self.pending.pop_front() else {
                    break;
                };
                self.mark_returned(block_start, sample.internal_timestamp);
                batch.samples.push(sample);
            }
            if batch.samples.len() >= n {
                break;
            }

            if let Some(chunk) = self.chunker.next_chunk() {
                self.handle_chunk(chunk, &mut batch);
                continue;
            }
            if self.eof {
                break;
            }
            self.fill()?;
        }

        batch.exhausted = self.eof && !self.chunker.has_ready() && self.pending.is_empty();
        batch.cursor = self.state();
        Ok(batch)
    }

    fn set_state(&mut self, cursor: CursorState) -> Result<()> {
        let state = match cursor {
            CursorState::RangeSet(state) => state,
            CursorState::ByteOffset { position: 0 } => RangeSetState::default(),
            CursorState::ByteOffset { position } => {
                return Err(MooringError::InvalidState(format!(
                    "{}: a multiplexed parser cannot resume from byte offset {position}",
                    self.file_name
                )))
            }
        };

        self.stream.seek(SeekFrom::Start(0))?;
        self.chunker.reset(0);
        self.unescaper.reset();
        self.processed.clear();
        self.pending.clear();
        self.eof = false;
        self.absorbed = 0;

        self.unprocessed = RangeSet::from_ranges(state.unprocessed);
        self.in_process = state.in_process;
        self.timestamp = state.timestamp;
        self.stream_length = state.stream_length;
        Ok(())
    }

    fn state(&self) -> CursorState {
        CursorState::RangeSet(RangeSetState {
            in_process: self.in_process.clone(),
            unprocessed: self.unprocessed.as_slice().to_vec(),
            timestamp: self.timestamp,
            stream_length: self.stream_length,
        })
    }
}
