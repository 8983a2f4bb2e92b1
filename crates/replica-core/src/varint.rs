//! Unsigned LEB128 varints used by the run-length codec headers.

use crate::error::CodecError;

/// Maximum encoded length of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Number of bytes `value` occupies when encoded.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    (bits + 6) / 7
}

/// Append `value` to `out`.
pub fn encode(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Decode a varint starting at `offset`.
///
/// Returns the value and the offset just past it.
pub fn decode(buf: &[u8], offset: usize) -> Result<(u64, usize), CodecError> {
    let mut value = 0u64;
    let mut pos = offset;
    for shift in (0..MAX_VARINT_LEN * 7).step_by(7) {
        let byte = *buf
            .get(pos)
            .ok_or_else(|| CodecError::corrupt(pos, "truncated varint"))?;
        pos += 1;

        let bits = (byte & 0x7f) as u64;
        if shift == 63 && bits > 1 {
            return Err(CodecError::corrupt(offset, "varint overflows u64"));
        }
        value |= bits << shift;

        if byte & 0x80 == 0 {
            return Ok((value, pos));
        }
    }
    Err(CodecError::corrupt(offset, "varint too long"))
}
