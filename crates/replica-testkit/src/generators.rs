//! Proptest generators for property-based testing.

use proptest::prelude::*;

use replica_core::{LogId, PeerId, SparseBitfield, BITS_PER_PAGE, BITS_PER_SEGMENT};

use crate::fixtures::DenseBitfield;

/// Generate a random PeerId.
pub fn peer_id() -> impl Strategy<Value = PeerId> {
    any::<[u8; 32]>().prop_map(PeerId::from_bytes)
}

/// Generate a random LogId.
pub fn log_id() -> impl Strategy<Value = LogId> {
    any::<[u8; 32]>().prop_map(LogId::from_bytes)
}

/// A bit index biased towards page and segment boundaries.
pub fn bit_index() -> impl Strategy<Value = u64> {
    prop_oneof![
        0u64..256,
        (BITS_PER_PAGE - 64)..(BITS_PER_PAGE + 64),
        (BITS_PER_SEGMENT - 64)..(BITS_PER_SEGMENT + 64),
        0u64..(BITS_PER_SEGMENT + BITS_PER_PAGE),
    ]
}

/// A word biased towards the uniform values runs are made of.
pub fn word() -> impl Strategy<Value = u32> {
    prop_oneof![Just(0u32), Just(u32::MAX), any::<u32>()]
}

/// A word sequence with long uniform stretches.
pub fn words(max_len: usize) -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(word(), 0..=max_len)
}

/// A single bitfield mutation.
#[derive(Debug, Clone)]
pub enum BitOp {
    Set { index: u64, value: bool },
    SetRange { start: u64, length: u64, value: bool },
}

impl BitOp {
    pub fn apply_sparse(&self, bits: &mut SparseBitfield) {
        match *self {
            BitOp::Set { index, value } => {
                bits.set(index, value);
            }
            BitOp::SetRange {
                start,
                length,
                value,
            } => bits.set_range(start, length, value),
        }
    }

    pub fn apply_dense(&self, bits: &mut DenseBitfield) {
        match *self {
            BitOp::Set { index, value } => bits.set(index, value),
            BitOp::SetRange {
                start,
                length,
                value,
            } => bits.set_range(start, length, value),
        }
    }
}

/// Generate a bitfield mutation.
pub fn bit_op() -> impl Strategy<Value = BitOp> {
    prop_oneof![
        (bit_index(), any::<bool>()).prop_map(|(index, value)| BitOp::Set { index, value }),
        (bit_index(), 0u64..70_000, any::<bool>()).prop_map(|(start, length, value)| {
            BitOp::SetRange {
                start,
                length,
                value,
            }
        }),
    ]
}

/// Generate a sequence of mutations.
pub fn bit_ops(max_len: usize) -> impl Strategy<Value = Vec<BitOp>> {
    prop::collection::vec(bit_op(), 0..=max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_sparse_matches_dense(ops in bit_ops(12), probes in prop::collection::vec(bit_index(), 1..8)) {
            let mut sparse = SparseBitfield::new();
            let mut dense = DenseBitfield::new();
            for op in &ops {
                op.apply_sparse(&mut sparse);
                op.apply_dense(&mut dense);
            }

            prop_assert_eq!(sparse.last_set(), dense.last_set());
            for &probe in &probes {
                prop_assert_eq!(sparse.get(probe), dense.get(probe));
                for value in [true, false] {
                    prop_assert_eq!(sparse.find_first(value, probe), dense.find_first(value, probe));
                    prop_assert_eq!(sparse.find_last(value, probe), dense.find_last(value, probe));
                }
                prop_assert_eq!(sparse.count_ones(0, probe), dense.count_ones(0, probe));
            }
        }

        #[test]
        fn test_insert_matches_per_bit(word_offset in 0u64..70_000, ws in words(80)) {
            let start = word_offset * 32;
            let mut inserted = SparseBitfield::new();
            inserted.insert(start, &ws).unwrap();

            let mut dense = DenseBitfield::new();
            for (i, w) in ws.iter().enumerate() {
                for b in 0..32 {
                    dense.set(start + i as u64 * 32 + b, w & (1 << b) != 0);
                }
            }

            let end = start + ws.len() as u64 * 32;
            prop_assert_eq!(inserted.count_ones(start, end), dense.count_ones(start, end));
            prop_assert_eq!(inserted.last_set(), dense.last_set());
            prop_assert_eq!(inserted.words(word_offset, ws.len()), ws);
        }
    }

    #[test]
    fn test_far_single_bit() {
        let mut sparse = SparseBitfield::new();
        sparse.set(1_000_000, true);
        assert_eq!(sparse.find_first(true, 0), Some(1_000_000));
        assert_eq!(sparse.find_last(true, 2_000_000), Some(1_000_000));
        assert_eq!(sparse.page_count(), 1);
    }
}
