//! # Replica Testkit
//!
//! Testing utilities for replica sync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Known codec encodings every peer must reproduce
//! - **Generators**: Proptest strategies for bitfield operations
//! - **Fixtures**: The three-peer scenario, deterministic ids, and a dense
//!   reference bitfield
//!
//! ## Golden Vectors
//!
//! ```rust
//! use replica_testkit::vectors::verify_all_vectors;
//!
//! for (name, matches, actual) in verify_all_vectors() {
//!     assert!(matches, "{name}: {actual}");
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use replica_testkit::fixtures::ThreePeerFixture;
//!
//! let fixture = ThreePeerFixture::new();
//! let derived = fixture.state.get_state();
//! assert_eq!(derived.local.wanted, 2);
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{log_id, parties, peer_id, DenseBitfield, Party, ThreePeerFixture};
pub use generators::{bit_op, bit_ops, BitOp};
pub use vectors::{all_vectors, verify_all_vectors, CodecVector};
