//! Pre-have wire message.
//!
//! Before two peers connect directly, a third party may relay a peer's
//! bitfield as a rumor. The payload is one segment of the bitfield at most,
//! run-length encoded.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use replica_core::{rle, LogId, SparseBitfield, BITS_PER_SEGMENT};

use crate::error::{Result, SyncError};

/// Message size limits.
pub mod limits {
    use replica_core::BITS_PER_SEGMENT;

    /// Max decoded payload: one segment of bits.
    pub const MAX_DECODED_BYTES: u64 = BITS_PER_SEGMENT / 8;
    /// Max encoded payload.
    ///
    /// The encoder only grows its input where a run splits a literal. A split
    /// costs one extra byte when the literal needs a two-byte header (at least
    /// 64 bytes) and the run saves one byte (at least 2 bytes), so at most one
    /// byte per 64 input bytes, plus the headers at either end.
    pub const MAX_ENCODED_BYTES: usize =
        MAX_DECODED_BYTES as usize + MAX_DECODED_BYTES as usize / 64 + 16;
}

/// A rumored bitfield fragment for one log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreHaveMessage {
    /// The log the fragment belongs to.
    pub log_id: LogId,
    /// Bit offset of the first encoded word. Always a multiple of 32.
    pub start: u32,
    /// Run-length encoded words.
    pub encoded: Bytes,
}

impl PreHaveMessage {
    /// Encode `words` starting at bit `start`.
    pub fn new(log_id: LogId, start: u32, words: &[u32]) -> Result<Self> {
        if start % 32 != 0 {
            return Err(SyncError::InvalidMessage(format!(
                "pre-have start {} is not word aligned",
                start
            )));
        }
        Ok(Self {
            log_id,
            start,
            encoded: Bytes::from(rle::encode(words)),
        })
    }

    /// Split the first `length` bits of `bitfield` into messages.
    ///
    /// One message per segment holding at least one set bit. Bits at or beyond
    /// `length` are not sent, nor is anything past the u32 offset range.
    pub fn from_bitfield(log_id: LogId, bitfield: &SparseBitfield, length: u64) -> Vec<Self> {
        let length = length.min(u64::from(u32::MAX) + 1);
        let mut out = Vec::new();
        let mut pos = 0;

        while let Some(next) = bitfield.find_first(true, pos) {
            if next >= length {
                break;
            }
            let seg_start = next - next % BITS_PER_SEGMENT;
            let seg_end = (seg_start + BITS_PER_SEGMENT).min(length);
            let count = (seg_end - seg_start).div_ceil(32) as usize;

            let mut words = bitfield.words(seg_start / 32, count);
            let tail = seg_end % 32;
            if tail != 0 {
                if let Some(last) = words.last_mut() {
                    *last &= (1u32 << tail) - 1;
                }
            }

            // seg_start < length <= 2^32, so it fits
            out.push(Self {
                log_id,
                start: seg_start as u32,
                encoded: Bytes::from(rle::encode(&words)),
            });
            pos = seg_start + BITS_PER_SEGMENT;
        }
        out
    }

    /// Check alignment and payload size.
    pub fn validate_limits(&self) -> Result<()> {
        if self.start % 32 != 0 {
            return Err(SyncError::InvalidMessage(format!(
                "pre-have start {} is not word aligned",
                self.start
            )));
        }
        if self.encoded.len() > limits::MAX_ENCODED_BYTES {
            return Err(SyncError::InvalidMessage(format!(
                "pre-have payload of {} bytes exceeds {}",
                self.encoded.len(),
                limits::MAX_ENCODED_BYTES
            )));
        }
        Ok(())
    }

    /// Validate and decode the payload.
    pub fn decode_words(&self) -> Result<Vec<u32>> {
        self.validate_limits()?;
        Ok(rle::decode_with_limit(
            &self.encoded,
            limits::MAX_DECODED_BYTES,
        )?)
    }

    /// Serialize to CBOR.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| SyncError::Encoding(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| SyncError::Decoding(e.to_string()))
    }
}
