//! # Replica Core
//!
//! Pure primitives for replica sync: identities, the sparse bitfield, and the
//! run-length codec used to ship bitfields between peers.
//!
//! This crate contains no I/O, no async, no networking. It is pure computation
//! over bit-vectors.
//!
//! ## Key Types
//!
//! - [`SparseBitfield`] - A lazily allocated bit-vector for logs with tens of millions of blocks
//! - [`PeerId`] - Stable identifier for a remote party, derived from its public key
//! - [`LogId`] - Identifier of an append-only log (its public key)
//!
//! ## Word Layout
//!
//! Bits are grouped into 32-bit words. Bit `i` lives in word `i / 32` at bit
//! position `i % 32` (least-significant bit first). The [`rle`] codec shares
//! this layout and always writes words little-endian.

pub mod bitfield;
pub mod error;
pub mod ids;
pub mod rle;
pub mod varint;

pub use bitfield::{
    BitfieldView, SparseBitfield, BITS_PER_PAGE, BITS_PER_SEGMENT, PAGES_PER_SEGMENT,
    WORDS_PER_PAGE,
};
pub use error::{BitfieldError, CodecError};
pub use ids::{LogId, PeerId};
