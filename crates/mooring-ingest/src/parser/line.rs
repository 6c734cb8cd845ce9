//! Line-per-record parser with a byte-offset cursor.

use super::{ParseBatch, Parser, Stream};
use crate::chunker::{Chunk, ChunkKind, Chunker, LineSieve};
use crate::decoder::{DecodeInput, Decoder};
use mooring_common::types::CursorState;
use mooring_common::{MooringError, Result};
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use tracing::trace;

pub struct LineParser {
    stream: Stream,
    decoder: Arc<dyn Decoder>,
    file_name: String,
    chunker: Chunker<LineSieve>,
    /// End of the last consumed line
    position: u64,
    read_size: usize,
    eof: bool,
    /// Treat an unterminated last line as a record once the stream ends
    flush_tail: bool,
}

impl LineParser {
    /// Parser positioned at the start of `stream`.
    pub fn new(stream: Stream, decoder: Arc<dyn Decoder>, file_name: &str, read_size: usize) -> Self {
        Self {
            stream,
            decoder,
            file_name: file_name.to_string(),
            chunker: Chunker::new(LineSieve),
            position: 0,
            read_size: read_size.max(1),
            eof: false,
            flush_tail: false,
        }
    }

    /// Deliver an unterminated last line at end of stream instead of holding
    /// it back. For files that are complete when parsed; a file that keeps
    /// growing must leave this off.
    pub fn flush_tail_at_eof(mut self, flush: bool) -> Self {
        self.flush_tail = flush;
        self
    }

    fn tail(&mut self) -> Option<Chunk> {
        if self.flush_tail {
            self.chunker.flush()
        } else {
            None
        }
    }

    fn fill(&mut self) -> Result<()> {
        let mut buf = vec![0u8; self.read_size];
        let read = self.stream.read(&mut buf)?;
        if read == 0 {
            self.eof = true;
        } else {
            self.chunker.add(&buf[..read]);
        }
        Ok(())
    }
}

impl Parser for LineParser {
    fn get_records(&mut self, n: usize) -> Result<ParseBatch> {
        let mut batch = ParseBatch::new(self.state());

        while batch.samples.len() < n {
            let chunk = match self.chunker.next_chunk() {
                Some(chunk) => chunk,
                None if !self.eof => {
                    self.fill()?;
                    continue;
                }
                None => match self.tail() {
                    Some(chunk) => chunk,
                    None => break,
                },
            };

            match chunk.kind {
                ChunkKind::Data => match self.decoder.decode(&DecodeInput::line(&chunk.bytes, chunk.start)) {
                    Ok(samples) => batch.samples.extend(samples.into_iter().map(|mut sample| {
                        sample.source_file = Some(self.file_name.clone());
                        sample
                    })),
                    Err(e) => {
                        trace!(file = %self.file_name, position = chunk.start, error = %e, "line skipped");
                        batch.errors.push(e);
                    }
                },
                ChunkKind::NonData => batch.unexpected.push(chunk.range()),
            }
            self.position = chunk.end;
        }

        batch.exhausted = self.eof
            && !self.chunker.has_ready()
            && (!self.flush_tail || self.chunker.pending_bytes() == 0);
        batch.cursor = self.state();
        Ok(batch)
    }

    fn set_state(&mut self, cursor: CursorState) -> Result<()> {
        let CursorState::ByteOffset { position } = cursor else {
            return Err(MooringError::InvalidState(format!(
                "{}: a line parser cannot resume from a range-set cursor",
                self.file_name
            )));
        };

        self.stream.seek(SeekFrom::Start(position))?;
        self.chunker.reset(position);
        self.position = position;
        self.eof = false;
        Ok(())
    }

    fn state(&self) -> CursorState {
        CursorState::ByteOffset {
            position: self.position,
        }
    }
}
