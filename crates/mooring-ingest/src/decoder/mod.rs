//! Record decoders
//!
//! A decoder turns the bytes of one complete record into zero or more
//! [`Sample`]s. Decoders are picked from configuration through
//! [`DecoderKind`]; nothing is loaded by name at runtime.

pub mod delimited;
pub mod sio_payload;

use crate::chunker::SioHeader;
use crate::config::DecoderConfig;
use mooring_common::types::Sample;
use mooring_common::SampleDecodeError;

pub use delimited::DelimitedDecoder;
pub use sio_payload::SioPayloadDecoder;

pub type DecodeResult = std::result::Result<Vec<Sample>, SampleDecodeError>;

/// One record handed to a decoder.
#[derive(Debug, Clone, Copy)]
pub struct DecodeInput<'a> {
    /// Complete record bytes, framing included
    pub bytes: &'a [u8],
    /// Stream offset of `bytes[0]`
    pub offset: u64,
    /// Parsed block header for framed streams
    pub header: Option<&'a SioHeader>,
}

impl<'a> DecodeInput<'a> {
    pub fn line(bytes: &'a [u8], offset: u64) -> Self {
        Self {
            bytes,
            offset,
            header: None,
        }
    }

    pub fn block(bytes: &'a [u8], offset: u64, header: &'a SioHeader) -> Self {
        Self {
            bytes,
            offset,
            header: Some(header),
        }
    }
}

pub trait Decoder: Send + Sync {
    /// Decode one record.
    ///
    /// An empty vector means the record carries no samples (comments,
    /// status blocks) and is consumed without error.
    fn decode(&self, input: &DecodeInput<'_>) -> DecodeResult;

    /// Stream name stamped on every sample
    fn stream(&self) -> &str;
}

/// Every decoder this crate ships, selected by the `decoder` tag of a
/// parser's configuration.
#[derive(Debug, Clone)]
pub enum DecoderKind {
    Delimited(DelimitedDecoder),
    SioPayload(SioPayloadDecoder),
}

impl DecoderKind {
    pub fn from_config(config: &DecoderConfig) -> Self {
        match config {
            DecoderConfig::Delimited(options) => DecoderKind::Delimited(DelimitedDecoder::new(options)),
            DecoderConfig::Sio(options) => DecoderKind::SioPayload(SioPayloadDecoder::new(options)),
        }
    }
}

impl Decoder for DecoderKind {
    fn decode(&self, input: &DecodeInput<'_>) -> DecodeResult {
        match self {
            DecoderKind::Delimited(decoder) => decoder.decode(input),
            DecoderKind::SioPayload(decoder) => decoder.decode(input),
        }
    }

    fn stream(&self) -> &str {
        match self {
            DecoderKind::Delimited(decoder) => decoder.stream(),
            DecoderKind::SioPayload(decoder) => decoder.stream(),
        }
    }
}
