//! Golden vectors for the run-length codec.
//!
//! Every peer must encode a bitfield to exactly these bytes, so the vectors
//! pin the wire format independently of the encoder's tests.

use serde::{Deserialize, Serialize};

use replica_core::rle;

/// A golden encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecVector {
    /// Human-readable name for the vector.
    pub name: String,
    /// Words to encode: `pattern` repeated `repeat` times.
    pub pattern: Vec<u32>,
    pub repeat: usize,
    /// Expected encoding (hex).
    pub encoded: String,
}

impl CodecVector {
    fn new(name: &str, pattern: &[u32], repeat: usize, encoded: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_vec(),
            repeat,
            encoded: encoded.to_string(),
        }
    }

    /// The input words.
    pub fn words(&self) -> Vec<u32> {
        self.pattern.repeat(self.repeat)
    }
}

/// Get all encoding vectors.
pub fn all_vectors() -> Vec<CodecVector> {
    vec![
        CodecVector::new("empty", &[], 0, ""),
        CodecVector::new("zero word", &[0], 1, "11"),
        CodecVector::new("full word", &[u32::MAX], 1, "13"),
        CodecVector::new("lowest bit", &[1], 1, "02010d"),
        CodecVector::new("half word set", &[0x0000_ffff, 0], 1, "0b19"),
        CodecVector::new("second byte set", &[0x0000_0100], 1, "04000109"),
        CodecVector::new("zero page", &[0], 1024, "818001"),
        CodecVector::new("full page", &[u32::MAX], 1024, "838001"),
    ]
}

/// Streams that must decode to the given words after padding.
pub fn padding_vectors() -> Vec<(&'static str, Vec<u32>)> {
    vec![
        ("06010203", vec![0x0003_0201]),
        ("17", vec![u32::MAX, 0x0000_00ff]),
    ]
}

/// Streams every decoder must reject as corrupt.
pub fn corrupt_vectors() -> Vec<&'static str> {
    vec![
        // literal longer than the stream
        "0801",
        // truncated varint header
        "1180",
        // empty chunk
        "1100",
    ]
}

/// Vectors as pretty-printed JSON, for sharing with other implementations.
pub fn vectors_json() -> serde_json::Result<String> {
    serde_json::to_string_pretty(&all_vectors())
}

/// Check every vector. Returns `(name, matches, actual_hex)` per vector.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|v| {
            let actual = hex::encode(rle::encode(&v.words()));
            (v.name.clone(), actual == v.encoded, actual)
        })
        .collect()
}
