//! Run-length codec for bitfield words.
//!
//! Peers advertise large bitfields before they are directly connected, so the
//! encoding exploits the same run structure the sparse bitfield does: long
//! stretches of `0x00` or `0xff` bytes collapse into a single varint header.
//!
//! ## Format
//!
//! The words are serialized little-endian into bytes, then split into chunks,
//! each introduced by a varint header:
//!
//! ```text
//! run:      (length << 2) | (set << 1) | 1      `length` copies of 0x00 (set=0) or 0xff (set=1)
//! literal:  length << 1, then `length` raw bytes
//! ```
//!
//! The encoder is greedy: a run of uniform bytes is emitted as a run only when
//! its header is strictly shorter than the bytes it replaces; otherwise the
//! bytes are folded into the current literal.
//!
//! Decoding pads the output with zeros to a whole number of words.

use crate::error::CodecError;
use crate::varint;

/// Default cap on decoded size: enough bytes for 2^32 bits.
pub const DEFAULT_MAX_DECODED_BYTES: u64 = 1 << 29;

/// Encode 32-bit words.
pub fn encode(words: &[u32]) -> Vec<u8> {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    encode_bytes(&bytes)
}

/// Encode a raw little-endian bitfield byte buffer.
pub fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let byte = bytes[i];
        if byte != 0x00 && byte != 0xff {
            i += 1;
            continue;
        }

        let run_end = bytes[i..]
            .iter()
            .position(|b| *b != byte)
            .map_or(bytes.len(), |n| i + n);
        let run = (run_end - i) as u64;
        let header = (run << 2) | if byte == 0xff { 0b11 } else { 0b01 };

        if varint::encoded_len(header) < run as usize {
            push_literal(&bytes[literal_start..i], &mut out);
            varint::encode(header, &mut out);
            literal_start = run_end;
        }
        i = run_end;
    }

    push_literal(&bytes[literal_start..], &mut out);
    out
}

fn push_literal(literal: &[u8], out: &mut Vec<u8>) {
    if literal.is_empty() {
        return;
    }
    varint::encode((literal.len() as u64) << 1, out);
    out.extend_from_slice(literal);
}

/// Decode into words, capped at [`DEFAULT_MAX_DECODED_BYTES`].
pub fn decode(buf: &[u8]) -> Result<Vec<u32>, CodecError> {
    decode_with_limit(buf, DEFAULT_MAX_DECODED_BYTES)
}

/// Decode into words, rejecting streams that expand beyond `max_bytes`.
///
/// The stream is validated completely before anything is allocated.
pub fn decode_with_limit(buf: &[u8], max_bytes: u64) -> Result<Vec<u32>, CodecError> {
    let len = decoded_len(buf)?;
    if len > max_bytes {
        return Err(CodecError::TooLarge {
            len,
            limit: max_bytes,
        });
    }

    let padded = len.div_ceil(4) * 4;
    let mut bytes = Vec::with_capacity(padded as usize);
    let mut pos = 0;

    while pos < buf.len() {
        let (header, next) = varint::decode(buf, pos)?;
        if header & 1 == 1 {
            let fill = if header & 2 != 0 { 0xff } else { 0x00 };
            bytes.resize(bytes.len() + (header >> 2) as usize, fill);
            pos = next;
        } else {
            let end = next + (header >> 1) as usize;
            bytes.extend_from_slice(&buf[next..end]);
            pos = end;
        }
    }
    bytes.resize(padded as usize, 0);

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Number of bytes `buf` decodes to, before word padding.
///
/// Fails on any structural problem: truncated headers, empty chunks, literals
/// reading past the end of the buffer, or lengths that overflow.
pub fn decoded_len(buf: &[u8]) -> Result<u64, CodecError> {
    let mut total = 0u64;
    let mut pos = 0;

    while pos < buf.len() {
        let (header, next) = varint::decode(buf, pos)?;
        let len = if header & 1 == 1 { header >> 2 } else { header >> 1 };
        if len == 0 {
            return Err(CodecError::corrupt(pos, "empty chunk"));
        }

        if header & 1 == 1 {
            pos = next;
        } else {
            pos = (next as u64)
                .checked_add(len)
                .filter(|end| *end <= buf.len() as u64)
                .ok_or_else(|| CodecError::corrupt(pos, "literal runs past end of stream"))?
                as usize;
        }

        total = total
            .checked_add(len)
            .ok_or_else(|| CodecError::corrupt(pos, "decoded length overflows"))?;
    }
    Ok(total)
}
