//! Heart Rate Measurement decoding
//!
//! Turns the raw value of the Heart Rate Measurement characteristic (0x2A37)
//! into a beats-per-minute figure.
//!
//! # Payload Layout
//!
//! ```text
//! len == 1 : [bpm]                      raw 8-bit value, no flags byte
//! len >= 2 : [flags][bpm]               flags bit 0 clear -> 8-bit value
//! len >= 3 : [flags][bpm lo][bpm hi]    flags bit 0 set   -> u16 little-endian
//! ```
//!
//! Anything that decodes outside [`MIN_BPM`, `MAX_BPM`] is treated as
//! transport noise and rejected.

use std::fmt;

/// Lowest value that is delivered
pub const MIN_BPM: u16 = 0;
/// Highest value that is delivered
pub const MAX_BPM: u16 = 299;

/// Flags bit 0: heart rate value is 16 bits wide
const FLAG_VALUE_FORMAT_U16: u8 = 0x01;

/// Why a payload did not produce a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Empty buffer
    TooShort,
    /// Decoded, but not a plausible heart rate
    OutOfRange(u16),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::TooShort => write!(f, "payload too short"),
            Rejection::OutOfRange(v) => write!(f, "value {} outside [{}, {}]", v, MIN_BPM, MAX_BPM),
        }
    }
}

/// Decode a measurement payload into beats per minute.
pub fn decode_measurement(bytes: &[u8]) -> Result<u16, Rejection> {
    let value = match bytes {
        [] => return Err(Rejection::TooShort),
        [single] => u16::from(*single),
        [flags, lo, hi, ..] if flags & FLAG_VALUE_FORMAT_U16 != 0 => u16::from_le_bytes([*lo, *hi]),
        [_, value, ..] => u16::from(*value),
    };

    if !(MIN_BPM..=MAX_BPM).contains(&value) {
        return Err(Rejection::OutOfRange(value));
    }

    Ok(value)
}
