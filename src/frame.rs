//! Frame decoder: byte-level parsing of one telemetry datagram
//!
//! Each UDP datagram carries exactly one frame:
//!
//! - bytes `[0..4]`   reserved
//! - bytes `[4..6]`   day of year (two BCD bytes)
//! - byte  `[6]`      hour, `[7]` minute, `[8]` second (one BCD byte each)
//! - bytes `[9..11]`  millisecond counter (two BCD bytes)
//! - bytes `[11..]`   word region; word at table position `p` occupies wire
//!   bytes `[2p+11]` (low) and `[2p+12]` (high)
//!
//! Each wire word is byte-swapped into a 16-bit value and shifted right by
//! one bit to discard the trailing parity bit, leaving a 0..=32767 magnitude.
//! Decoding is a pure transformation with no state.

use std::collections::HashMap;

use crate::words::WordTable;
use crate::{Result, TelemetryError};

/// First byte of the word region.
pub const WORD_REGION_OFFSET: usize = 11;

/// Frame timestamp decoded from the BCD header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTimestamp {
    /// Day of year.
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    /// Sub-second counter; 864 000 000 counts per day.
    pub millisecond: u32,
}

impl FrameTimestamp {
    /// Fractional day-of-year time, the unit used throughout the history
    /// store and snapshot filtering.
    pub fn fractional_day(&self) -> f64 {
        self.day as f64
            + self.hour as f64 / 24.0
            + self.minute as f64 / 1_440.0
            + self.second as f64 / 86_400.0
            + self.millisecond as f64 / 864_000_000.0
    }
}

/// One frame's worth of extracted values at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSample {
    pub timestamp: FrameTimestamp,
    /// Extracted word magnitudes (parity bit already removed).
    pub words: HashMap<String, u16>,
}

/// Decode the BCD digits of a byte sequence as a base-10 integer.
///
/// Each byte carries two decimal digits in its nibbles. A corrupted nibble
/// above 9 saturates to 9 so a single bad digit degrades the value instead
/// of rejecting the whole frame.
fn bcd_field(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| {
        let hi = ((b >> 4) & 0xF).min(9) as u32;
        let lo = (b & 0xF).min(9) as u32;
        acc * 100 + hi * 10 + lo
    })
}

/// Extract the word at table position `p`, swapping the wire bytes and
/// stripping the parity bit.
fn word_at(frame: &[u8], position: usize) -> Result<u16> {
    let low = 2 * position + WORD_REGION_OFFSET;
    let high = low + 1;
    if frame.len() <= high {
        return Err(TelemetryError::FrameTooShort {
            needed: high + 1,
            got: frame.len(),
        });
    }
    Ok((u16::from(frame[high]) << 8 | u16::from(frame[low])) >> 1)
}

/// Decode one raw frame into a timestamped sample carrying the requested
/// words.
///
/// Fails with [`TelemetryError::FrameTooShort`] when the frame cannot cover
/// the header or any requested word, and with
/// [`TelemetryError::UnknownWord`] when a requested name is not defined in
/// the table. Word *values* are accepted as-is; there is no range check.
pub fn decode_frame(
    frame: &[u8],
    table: &WordTable,
    names: &[String],
) -> Result<DecodedSample> {
    if frame.len() < WORD_REGION_OFFSET {
        return Err(TelemetryError::FrameTooShort {
            needed: WORD_REGION_OFFSET,
            got: frame.len(),
        });
    }

    let timestamp = FrameTimestamp {
        day: bcd_field(&frame[4..6]),
        hour: bcd_field(&frame[6..7]),
        minute: bcd_field(&frame[7..8]),
        second: bcd_field(&frame[8..9]),
        millisecond: bcd_field(&frame[9..11]),
    };

    let mut words = HashMap::with_capacity(names.len());
    for name in names {
        let position = table
            .position(name)
            .ok_or_else(|| TelemetryError::UnknownWord(name.clone()))?;
        words.insert(name.clone(), word_at(frame, position)?);
    }

    Ok(DecodedSample { timestamp, words })
}
