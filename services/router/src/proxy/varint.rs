//! Variable-length integer codec used by the game handshake framing.
//!
//! Wire format:
//! - 7 data bits per byte, least-significant group first
//! - bit 7 set means another byte follows
//!
//! Handshake varints are at most 5 bytes; in practice lengths fit in 1-3.

use thiserror::Error;

/// Maximum number of bytes a 32-bit varint can occupy.
pub const MAX_VARINT_LEN: usize = 5;

const SEGMENT_BITS: u8 = 0x7F;
const CONTINUE_BIT: u8 = 0x80;

/// Errors returned by [`decode_varint`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VarintError {
    /// No terminating byte within the scan window.
    ///
    /// Either not enough bytes are buffered yet, or the input is malformed.
    #[error("truncated varint: no terminator within {scanned} bytes")]
    Truncated { scanned: usize },
}

/// Decode one varint from `buf` starting at `offset`.
///
/// At most `max_len` bytes are scanned (and never past the end of `buf`).
/// Returns the value and the offset of the first byte after the varint.
/// Bits beyond the 32nd are dropped.
pub fn decode_varint(buf: &[u8], offset: usize, max_len: usize) -> Result<(u32, usize), VarintError> {
    let window = buf
        .get(offset..)
        .map(|rest| &rest[..rest.len().min(max_len)])
        .unwrap_or_default();

    let mut value = 0u32;
    for (i, &byte) in window.iter().enumerate() {
        let shift = 7 * i as u32;
        let segment = u32::from(byte & SEGMENT_BITS);
        value |= segment.checked_shl(shift).unwrap_or(0);

        if byte & CONTINUE_BIT == 0 {
            return Ok((value, offset + i + 1));
        }
    }

    Err(VarintError::Truncated {
        scanned: window.len(),
    })
}

/// Append the varint encoding of `value` to `out`.
pub fn encode_varint(mut value: u32, out: &mut Vec<u8>) {
    loop {
        let byte = (value as u8) & SEGMENT_BITS;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | CONTINUE_BIT);
    }
}

/// Number of bytes [`encode_varint`] produces for `value`.
pub fn varint_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}
