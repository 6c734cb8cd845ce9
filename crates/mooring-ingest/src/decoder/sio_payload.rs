//! Fixed-size binary records carried in the payload of an SIO block.

use super::{DecodeInput, DecodeResult, Decoder};
use crate::config::SioConfig;
use mooring_common::types::Sample;
use mooring_common::SampleDecodeError;

#[derive(Debug, Clone)]
pub struct SioPayloadDecoder {
    stream: String,
    record_size: usize,
}

impl SioPayloadDecoder {
    pub fn new(config: &SioConfig) -> Self {
        Self {
            stream: config.stream.clone(),
            record_size: config.record_size.max(1),
        }
    }
}

/// Sum of the payload bytes modulo 2^16.
pub fn payload_checksum(payload: &[u8]) -> u16 {
    payload
        .iter()
        .fold(0u16, |acc, byte| acc.wrapping_add(u16::from(*byte)))
}

impl Decoder for SioPayloadDecoder {
    fn decode(&self, input: &DecodeInput<'_>) -> DecodeResult {
        let offset = input.offset;
        let header = input
            .header
            .ok_or_else(|| SampleDecodeError::new(offset, "record has no block header"))?;
        let payload = header.payload(input.bytes);

        let computed = payload_checksum(payload);
        if computed != header.checksum {
            return Err(SampleDecodeError::new(
                offset,
                format!(
                    "checksum mismatch in block {:02X}: header {:04X}, computed {:04X}",
                    header.block_number, header.checksum, computed
                ),
            ));
        }

        if payload.len() % self.record_size != 0 {
            return Err(SampleDecodeError::new(
                offset,
                format!(
                    "payload length {} is not a multiple of record size {}",
                    payload.len(),
                    self.record_size
                ),
            ));
        }

        let time = header.time();
        let samples = payload
            .chunks(self.record_size)
            .enumerate()
            .map(|(index, record)| {
                let sample = Sample::new(&self.stream, offset)
                    .with_value("instrument_id", header.instrument_id.as_str())
                    .with_value("controller_id", header.controller_id.as_str())
                    .with_value("block_number", header.block_number)
                    .with_value("record_index", index)
                    .with_value("raw", hex::encode(record));
                match time {
                    Some(time) => sample.with_timestamp(time),
                    None => sample,
                }
            })
            .collect();

        Ok(samples)
    }

    fn stream(&self) -> &str {
        &self.stream
    }
}
