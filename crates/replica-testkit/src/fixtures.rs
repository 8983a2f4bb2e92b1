//! Test fixtures and helpers.
//!
//! Common setup code for sync state tests.

use std::sync::Arc;

use ed25519_dalek::SigningKey;

use replica_core::{LogId, PeerId};
use replica_sync::log::memory::MemoryLog;
use replica_sync::{CoreSyncState, LogEvent};

/// Deterministic peer id with every byte set to `n`.
pub fn peer_id(n: u8) -> PeerId {
    PeerId::from_bytes([n; 32])
}

/// Deterministic log id with every byte set to `n`.
pub fn log_id(n: u8) -> LogId {
    LogId::from_bytes([n; 32])
}

/// A party with a real signing key.
pub struct Party {
    pub signing_key: SigningKey,
    pub peer_id: PeerId,
}

impl Party {
    /// Create with a deterministic key from seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let peer_id = PeerId::derive(&signing_key.verifying_key());
        Self {
            signing_key,
            peer_id,
        }
    }

    /// The id of a log this party writes.
    pub fn log_id(&self) -> LogId {
        LogId::from_public_key(&self.signing_key.verifying_key())
    }
}

/// Create multiple parties for multi-party tests.
pub fn parties(count: usize) -> Vec<Party> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[0] = i as u8;
            Party::with_seed(seed)
        })
        .collect()
}

/// The three-peer scenario.
///
/// A log of length 4. The local replica holds blocks `0b0111`; peers A, B and
/// C hold `0b0011`, `0b0101` and `0b0001`, all connected and wanting
/// everything.
pub struct ThreePeerFixture {
    pub log: Arc<MemoryLog>,
    pub state: CoreSyncState,
    pub peers: [PeerId; 3],
}

impl ThreePeerFixture {
    pub const LENGTH: u64 = 4;
    pub const LOCAL: u32 = 0b0111;
    pub const PEERS: [u32; 3] = [0b0011, 0b0101, 0b0001];

    pub fn new() -> Self {
        let log_id = log_id(0x10);
        let log = MemoryLog::new(log_id);
        log.append(3);
        log.set_length(Self::LENGTH);

        let mut state = CoreSyncState::new(log_id);
        state
            .attach_local(log.clone())
            .expect("fixture log id matches its state");

        let peers = [peer_id(0xa), peer_id(0xb), peer_id(0xc)];
        for (peer, bits) in peers.iter().zip(Self::PEERS) {
            connect(&mut state, *peer, Self::LENGTH);
            state
                .apply_event(&LogEvent::RemoteBitfield {
                    peer: *peer,
                    start: 0,
                    words: vec![bits],
                })
                .expect("word-aligned fixture bitfield");
        }

        Self { log, state, peers }
    }
}

impl Default for ThreePeerFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Move a peer through connecting to connected.
pub fn connect(state: &mut CoreSyncState, peer: PeerId, length: u64) {
    state.add_peer(peer);
    state.peer_length_resolved(&peer, length);
}

/// A dense `Vec<bool>` bitfield, the obvious way.
///
/// Reference model for [`replica_core::SparseBitfield`]. Bits past the end of
/// the vector read as `false`.
#[derive(Debug, Clone, Default)]
pub struct DenseBitfield {
    bits: Vec<bool>,
}

impl DenseBitfield {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: u64) -> bool {
        self.bits.get(index as usize).copied().unwrap_or(false)
    }

    pub fn set(&mut self, index: u64, value: bool) {
        let i = index as usize;
        if i >= self.bits.len() {
            if !value {
                return;
            }
            self.bits.resize(i + 1, false);
        }
        self.bits[i] = value;
    }

    pub fn set_range(&mut self, start: u64, length: u64, value: bool) {
        for i in start..start + length {
            self.set(i, value);
        }
    }

    pub fn find_first(&self, value: bool, from: u64) -> Option<u64> {
        (from..self.bits.len() as u64)
            .find(|i| self.get(*i) == value)
            .or_else(|| (!value).then(|| from.max(self.bits.len() as u64)))
    }

    pub fn find_last(&self, value: bool, from: u64) -> Option<u64> {
        if !value && from >= self.bits.len() as u64 {
            return Some(from);
        }
        let top = from.min((self.bits.len() as u64).saturating_sub(1));
        if self.bits.is_empty() {
            return None;
        }
        (0..=top).rev().find(|i| self.get(*i) == value)
    }

    pub fn count_ones(&self, start: u64, end: u64) -> u64 {
        (start..end).filter(|i| self.get(*i)).count() as u64
    }

    pub fn last_set(&self) -> Option<u64> {
        self.bits.iter().rposition(|b| *b).map(|i| i as u64)
    }
}
