//! Wire-level byte stuffing used by multiplexed (SIO) streams.
//!
//! Framing bytes that occur inside a payload are escaped on the wire with a
//! lead byte `0x18` followed by a substitute. Unescaping is a single left to
//! right pass; substituted output is never rescanned, so the result does not
//! depend on the order of the table.

pub const ESCAPE_LEAD: u8 = 0x18;

/// `(byte after ESCAPE_LEAD, unescaped byte)`
const SUBSTITUTIONS: [(u8, u8); 2] = [(0x6B, 0x2B), (0x58, 0x18)];

fn substitute(next: u8) -> Option<u8> {
    SUBSTITUTIONS
        .iter()
        .find(|(escaped, _)| *escaped == next)
        .map(|(_, plain)| *plain)
}

/// Incremental unescaper.
///
/// A lead byte at the very end of a fill is held back until the next fill,
/// so a sequence split across two reads is still substituted.
#[derive(Debug, Default)]
pub struct Unescaper {
    held_lead: bool,
}

impl Unescaper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.held_lead = false;
    }

    /// Bytes held back and not yet emitted.
    pub fn pending(&self) -> usize {
        usize::from(self.held_lead)
    }

    /// Unescape one buffer fill.
    pub fn feed(&mut self, raw: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(raw.len() + 1);
        let mut i = 0;

        if self.held_lead {
            self.held_lead = false;
            match raw.first().copied().and_then(substitute) {
                Some(plain) => {
                    out.push(plain);
                    i = 1;
                },
                None if raw.is_empty() => {
                    self.held_lead = true;
                    return out;
                },
                None => out.push(ESCAPE_LEAD),
            }
        }

        while i < raw.len() {
            let byte = raw[i];
            if byte == ESCAPE_LEAD {
                match raw.get(i + 1) {
                    None => {
                        self.held_lead = true;
                        break;
                    },
                    Some(&next) => {
                        if let Some(plain) = substitute(next) {
                            out.push(plain);
                            i += 2;
                            continue;
                        }
                    },
                }
            }
            out.push(byte);
            i += 1;
        }

        out
    }
}

/// Unescape a complete buffer in one go. A trailing lone lead byte is kept.
pub fn unescape(raw: &[u8]) -> Vec<u8> {
    let mut unescaper = Unescaper::new();
    let mut out = unescaper.feed(raw);
    if unescaper.pending() > 0 {
        out.push(ESCAPE_LEAD);
    }
    out
}
