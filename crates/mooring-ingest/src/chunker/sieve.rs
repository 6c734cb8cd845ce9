//! Sieves: find complete, well-formed records in a raw buffer.

use chrono::{DateTime, TimeZone, Utc};
use mooring_common::{MooringError, Result};
use regex::bytes::Regex;
use std::ops::Range;

/// Result of one sieve pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sieved {
    /// Complete records, sorted and non-overlapping
    pub ranges: Vec<Range<usize>>,
    /// Offset in the scanned buffer where the next pass must start looking.
    /// Never before the end of the last range.
    pub resume: usize,
}

/// Scans a buffer for complete record boundaries.
pub trait Sieve: Send + Sync {
    /// Complete records in `buf`, looking no earlier than `from`.
    ///
    /// The caller guarantees that `buf[..from]` was already scanned by a
    /// previous pass that returned `from` as its resume offset, with only
    /// whole records removed from the front since. Bytes after the last
    /// returned range may belong to a record that is still being written
    /// and must be kept for the next call.
    fn sieve_from(&self, buf: &[u8], from: usize) -> Sieved;

    /// Complete records in `buf`, scanning all of it.
    fn sieve(&self, buf: &[u8]) -> Vec<Range<usize>> {
        self.sieve_from(buf, 0).ranges
    }
}

/// One record per `\n`-terminated line. The terminator is part of the record.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineSieve;

impl Sieve for LineSieve {
    fn sieve_from(&self, buf: &[u8], from: usize) -> Sieved {
        // nothing before `from` holds a newline, so the first line starts at 0
        let mut ranges = Vec::new();
        let mut start = 0;
        let from = from.min(buf.len());
        for (i, byte) in buf[from..].iter().enumerate() {
            if *byte == b'\n' {
                let end = from + i + 1;
                ranges.push(start..end);
                start = end;
            }
        }
        Sieved {
            ranges,
            resume: buf.len(),
        }
    }
}

pub const BLOCK_START: u8 = 0x01;
pub const HEADER_END: u8 = 0x02;
pub const BLOCK_END: u8 = 0x03;

const HEADER_PATTERN: &str = r"(?-u)\x01[A-Z]{2}[0-9]{7}_[0-9A-Fa-f]{4}[A-Za-z][0-9A-Fa-f]{8}_[0-9A-Fa-f]{2}_[0-9A-Fa-f]{4}\x02";

/// Header of one block of a multiplexed SIO stream.
///
/// Layout (33 bytes): `0x01`, instrument id (2), controller id (7 digits),
/// `_`, payload length (4 hex), flag (1), POSIX timestamp (8 hex), `_`,
/// block number (2 hex), `_`, payload checksum (4 hex), `0x02`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SioHeader {
    pub instrument_id: String,
    pub controller_id: String,
    pub length: usize,
    pub flag: char,
    pub timestamp: u32,
    pub block_number: u8,
    pub checksum: u16,
}

impl SioHeader {
    pub const LEN: usize = 33;

    /// Parse the header at the start of `block`.
    pub fn parse(block: &[u8]) -> Option<Self> {
        if block.len() < Self::LEN || block[0] != BLOCK_START || block[Self::LEN - 1] != HEADER_END {
            return None;
        }
        let text = std::str::from_utf8(&block[1..Self::LEN - 1]).ok()?;
        let (instrument_id, rest) = text.split_at(2);
        let (controller_id, rest) = rest.split_at(7);
        let rest = rest.strip_prefix('_')?;
        let (length, rest) = rest.split_at(4);
        let flag = rest.chars().next()?;
        let rest = &rest[1..];
        let (timestamp, rest) = rest.split_at(8);
        let rest = rest.strip_prefix('_')?;
        let (block_number, rest) = rest.split_at(2);
        let checksum = rest.strip_prefix('_')?;

        Some(Self {
            instrument_id: instrument_id.to_string(),
            controller_id: controller_id.to_string(),
            length: usize::from_str_radix(length, 16).ok()?,
            flag,
            timestamp: u32::from_str_radix(timestamp, 16).ok()?,
            block_number: u8::from_str_radix(block_number, 16).ok()?,
            checksum: u16::from_str_radix(checksum, 16).ok()?,
        })
    }

    /// Total block length including header and trailer.
    pub fn block_len(&self) -> usize {
        Self::LEN + self.length + 1
    }

    /// Payload slice of a complete block.
    pub fn payload<'a>(&self, block: &'a [u8]) -> &'a [u8] {
        let end = (Self::LEN + self.length).min(block.len());
        &block[Self::LEN.min(end)..end]
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(i64::from(self.timestamp), 0).single()
    }

    /// Serialize a header. Used to build fixtures and by instrument simulators.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.push(BLOCK_START);
        out.extend_from_slice(
            format!(
                "{}{}_{:04X}{}{:08X}_{:02X}_{:04X}",
                self.instrument_id,
                self.controller_id,
                self.length,
                self.flag,
                self.timestamp,
                self.block_number,
                self.checksum
            )
            .as_bytes(),
        );
        out.push(HEADER_END);
        out
    }
}

/// Finds complete SIO blocks: a valid header, `length` payload bytes, and
/// the `0x03` trailer.
#[derive(Debug, Clone)]
pub struct SioSieve {
    header: Regex,
}

impl SioSieve {
    pub fn new() -> Result<Self> {
        let header = Regex::new(HEADER_PATTERN)
            .map_err(|e| MooringError::Parse(format!("invalid SIO header pattern: {e}")))?;
        Ok(Self { header })
    }
}

impl Sieve for SioSieve {
    fn sieve_from(&self, buf: &[u8], from: usize) -> Sieved {
        let mut ranges = Vec::new();
        let mut search_from = from.min(buf.len());
        // earliest header after the last complete block whose block is not
        // fully buffered yet
        let mut incomplete = None;

        while let Some(found) = self.header.find_at(buf, search_from) {
            let start = found.start();
            let Some(header) = SioHeader::parse(&buf[start..]) else {
                search_from = start + 1;
                continue;
            };
            let end = start + header.block_len();
            if end > buf.len() {
                // either still being written or a corrupt length field; keep
                // looking so a bad length cannot hide the blocks after it
                incomplete.get_or_insert(start);
                search_from = start + 1;
                continue;
            }
            if buf[end - 1] == BLOCK_END {
                ranges.push(start..end);
                search_from = end;
                incomplete = None;
            } else {
                search_from = start + 1;
            }
        }

        let last_end = ranges.last().map_or(0, |r| r.end);
        // a header may straddle the end of the buffer
        let tail = buf.len().saturating_sub(SioHeader::LEN - 1);
        Sieved {
            resume: incomplete.unwrap_or(tail).max(last_end),
            ranges,
        }
    }
}
