//! Stateful chunking parsers
//!
//! A parser owns one open stream. Each [`Parser::get_records`] call reads
//! more bytes when it needs them, sieves them into chunks, decodes the chunks
//! it has not consumed yet, and returns the samples together with the cursor
//! that resumes right after them.
//!
//! Two cursor forms exist:
//!
//! - [`LineParser`] keeps a byte offset and seeks straight to it on resume.
//! - [`SioParser`] keeps a range set and always re-reads from the start of
//!   the stream, skipping ranges already consumed.

pub mod block;
pub mod line;
pub mod multiplexed;

use crate::config::{DecoderConfig, DriverConfig, ParserConfig, Topology};
use crate::decoder::{Decoder, DecoderKind};
use mooring_common::types::{ByteRange, CursorState, Sample};
use mooring_common::{ConfigError, MooringError, Result, SampleDecodeError};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Seek};
use std::sync::Arc;

pub use block::{BlockIdentity, ProcessedBlocks};
pub use line::LineParser;
pub use multiplexed::SioParser;

/// Anything a parser can read from.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

pub type Stream = Box<dyn ReadSeek>;

/// Result of one [`Parser::get_records`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseBatch {
    pub samples: Vec<Sample>,
    /// Cursor positioned right after the last returned sample
    pub cursor: CursorState,
    /// Records that could not be decoded. They are consumed all the same.
    pub errors: Vec<SampleDecodeError>,
    /// Byte ranges that matched no record frame
    pub unexpected: Vec<ByteRange>,
    /// The stream has nothing more to give right now
    pub exhausted: bool,
}

impl ParseBatch {
    pub fn new(cursor: CursorState) -> Self {
        Self {
            samples: Vec::new(),
            cursor,
            errors: Vec::new(),
            unexpected: Vec::new(),
            exhausted: false,
        }
    }
}

pub trait Parser: Send {
    /// Return up to `n` samples, fewer at end of stream. Never blocks waiting
    /// for data to be appended.
    fn get_records(&mut self, n: usize) -> Result<ParseBatch>;

    /// Reposition the parser to resume from `cursor`.
    fn set_state(&mut self, cursor: CursorState) -> Result<()>;

    /// Cursor after the last sample returned.
    fn state(&self) -> CursorState;
}

/// Builds the parser for one file of one data source.
pub trait ParserFactory: Send + Sync {
    fn create(
        &self,
        key: &str,
        cursor: Option<CursorState>,
        stream: Stream,
        file_name: &str,
    ) -> Result<Box<dyn Parser>>;
}

/// Parser factory driven by the `parser` section of the configuration.
#[derive(Debug, Clone)]
pub struct ConfiguredParserFactory {
    parsers: BTreeMap<String, ParserConfig>,
    /// Keys whose files are complete once discovered
    complete_files: BTreeSet<String>,
}

impl ConfiguredParserFactory {
    /// Factory that treats every file as possibly still growing.
    pub fn new(parsers: BTreeMap<String, ParserConfig>) -> Self {
        Self {
            parsers,
            complete_files: BTreeSet::new(),
        }
    }

    /// Factory for a whole driver configuration. Files of single-directory
    /// sources are complete when harvested, so their last record does not
    /// need a terminator.
    pub fn from_config(config: &DriverConfig) -> Self {
        let complete_files = config
            .harvester
            .iter()
            .filter(|(_, harvester)| harvester.topology == Topology::SingleDirectory)
            .map(|(key, _)| key.clone())
            .collect();
        Self {
            parsers: config.parser.clone(),
            complete_files,
        }
    }
}

impl ParserFactory for ConfiguredParserFactory {
    fn create(
        &self,
        key: &str,
        cursor: Option<CursorState>,
        stream: Stream,
        file_name: &str,
    ) -> Result<Box<dyn Parser>> {
        let config = self.parsers.get(key).ok_or_else(|| {
            MooringError::Configuration(ConfigError::UnmatchedSourceKey {
                key: key.to_string(),
                present_in: "harvester",
                missing_from: "parser",
            })
        })?;
        let decoder: Arc<dyn Decoder> = Arc::new(DecoderKind::from_config(&config.decoder));

        let mut parser: Box<dyn Parser> = match &config.decoder {
            DecoderConfig::Delimited(_) => Box::new(
                LineParser::new(stream, decoder, file_name, config.read_size)
                    .flush_tail_at_eof(self.complete_files.contains(key)),
            ),
            DecoderConfig::Sio(options) => Box::new(SioParser::new(
                stream,
                decoder,
                &options.instrument_id,
                file_name,
                config.read_size,
            )?),
        };

        if let Some(cursor) = cursor {
            parser.set_state(cursor)?;
        }
        Ok(parser)
    }
}
