//! Per-log sync state.
//!
//! A [`CoreSyncState`] tracks, for one log, the local replica plus every known
//! remote party: what each has, what each wants, and whether it is connected.
//! Aggregates are never stored. [`CoreSyncState::derive_state`] recomputes
//! them from the current bitfields every time it is called.
//!
//! ## Derivation
//!
//! The log is processed 32 blocks at a time. For each word:
//!
//! ```text
//! have_p   = pre_haves_p | haves_p            (masked to the log length)
//! lack_p   = wants_p & !have_p                (wants_p is all ones by default)
//! local.want    += popcnt(!have_local & OR(have_peers))
//! local.wanted  += popcnt(have_local & OR(lack_peers))
//! local.missing += popcnt(!(have_local | OR(have_peers)))
//! peer.want     += popcnt(lack_p & OR(have_others))
//! peer.wanted   += popcnt(have_p & OR(lack_others))
//! ```
//!
//! "Others" always includes the local replica, which wants every block.
//! Per-peer "others" unions come from prefix/suffix ORs, so a word costs
//! O(peers) rather than O(peers²).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use replica_core::{LogId, PeerId};

use crate::error::{Result, SyncError};
use crate::log::{LogEvent, LogHandle};
use crate::peer::{PeerState, PeerStatus, WantRange};

/// Aggregate counts for the local replica of one log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSyncState {
    /// Blocks held locally.
    pub have: u64,
    /// Blocks not held locally that at least one peer has.
    pub want: u64,
    /// Blocks held locally that at least one peer wants and lacks.
    pub wanted: u64,
    /// Blocks no tracked party has.
    pub missing: u64,
}

impl LocalSyncState {
    /// Progress towards holding every block some party has.
    pub fn progress(&self) -> SyncProgress {
        SyncProgress {
            have: self.have,
            reachable: self.have + self.want,
        }
    }

    pub(crate) fn accumulate(&mut self, other: &LocalSyncState) {
        self.have += other.have;
        self.want += other.want;
        self.wanted += other.wanted;
        self.missing += other.missing;
    }
}

/// Local download progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Blocks held locally.
    pub have: u64,
    /// Blocks held locally or obtainable from a peer.
    pub reachable: u64,
}

impl SyncProgress {
    /// Percentage of reachable blocks held. 100 when nothing is reachable.
    pub fn percent(&self) -> f64 {
        if self.reachable == 0 {
            return 100.0;
        }
        self.have as f64 * 100.0 / self.reachable as f64
    }

    pub fn is_complete(&self) -> bool {
        self.have >= self.reachable
    }
}

/// Aggregate counts for one remote party of one log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSyncState {
    /// Blocks the peer has, confirmed or rumored.
    pub have: u64,
    /// Blocks the peer wants, lacks, and some other party has.
    pub want: u64,
    /// Blocks the peer has that some other party wants and lacks.
    pub wanted: u64,
    pub status: PeerStatus,
}

impl PeerSyncState {
    pub(crate) fn accumulate(&mut self, other: &PeerSyncState) {
        self.have += other.have;
        self.want += other.want;
        self.wanted += other.wanted;
        self.status = self.status.merge(other.status);
    }
}

/// Derived state of one log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedState {
    /// Length the counts were computed over.
    pub length: u64,
    pub local: LocalSyncState,
    /// Unblocked peers.
    pub peers: BTreeMap<PeerId, PeerSyncState>,
}

impl DerivedState {
    /// Whether replication has converged.
    ///
    /// True when the local replica wants nothing any peer has, and no
    /// connected peer wants anything another party has.
    pub fn is_synced(&self) -> bool {
        self.local.want == 0
            && self
                .peers
                .values()
                .filter(|p| p.status.is_active())
                .all(|p| p.want == 0)
    }

    /// Number of connected peers.
    pub fn connected_peers(&self) -> usize {
        self.peers.values().filter(|p| p.status.is_active()).count()
    }

    pub(crate) fn accumulate(&mut self, other: &DerivedState) {
        self.length += other.length;
        self.local.accumulate(&other.local);
        for (peer, state) in &other.peers {
            self.peers.entry(*peer).or_default().accumulate(state);
        }
    }
}

/// Sync state of a single log.
pub struct CoreSyncState {
    log_id: LogId,
    local: Option<Arc<dyn LogHandle>>,
    peers: BTreeMap<PeerId, PeerState>,
}

impl CoreSyncState {
    /// Create state for a log with no local handle and no peers.
    pub fn new(log_id: LogId) -> Self {
        Self {
            log_id,
            local: None,
            peers: BTreeMap::new(),
        }
    }

    pub fn log_id(&self) -> LogId {
        self.log_id
    }

    /// Bind the live local log.
    ///
    /// Returns false if a handle is already attached.
    pub fn attach_local(&mut self, handle: Arc<dyn LogHandle>) -> Result<bool> {
        let actual = handle.log_id();
        if actual != self.log_id {
            return Err(SyncError::LogMismatch {
                expected: self.log_id,
                actual,
            });
        }
        if self.local.is_some() {
            return Ok(false);
        }
        tracing::debug!(log = %self.log_id, "attached local log");
        self.local = Some(handle);
        Ok(true)
    }

    pub fn is_attached(&self) -> bool {
        self.local.is_some()
    }

    /// The attached local handle, if any.
    pub fn local(&self) -> Option<&Arc<dyn LogHandle>> {
        self.local.as_ref()
    }

    /// Confirmed local length, or 0 before a handle is attached.
    pub fn local_length(&self) -> u64 {
        self.local.as_ref().map_or(0, |h| h.length())
    }

    /// Length used for derivation.
    ///
    /// The maximum of the local length and, per peer, the length implied by
    /// its pre-haves and the length it reported. Lengths of connecting peers
    /// are not final, so this may still grow.
    pub fn length(&self) -> u64 {
        self.length_excluding(|_| false)
    }

    /// Like [`length`](Self::length), ignoring peers for which `is_blocked`
    /// is true.
    pub fn length_excluding(&self, is_blocked: impl Fn(&PeerId) -> bool) -> u64 {
        self.peers
            .iter()
            .filter(|(id, _)| !is_blocked(id))
            .map(|(_, p)| p.pre_have_length().max(p.remote_length().unwrap_or(0)))
            .fold(self.local_length(), u64::max)
    }

    pub fn peer(&self, peer: &PeerId) -> Option<&PeerState> {
        self.peers.get(peer)
    }

    pub fn peers(&self) -> impl Iterator<Item = (&PeerId, &PeerState)> {
        self.peers.iter()
    }

    fn peer_mut(&mut self, peer: PeerId) -> &mut PeerState {
        self.peers.entry(peer).or_insert_with(|| {
            tracing::trace!(peer = %peer, "tracking new peer");
            PeerState::new()
        })
    }

    /// Merge a rumored bitfield fragment for a peer.
    ///
    /// `start` is a bit offset and must be a multiple of 32.
    pub fn insert_pre_haves(&mut self, peer: PeerId, start: u64, words: &[u32]) -> Result<()> {
        self.peer_mut(peer).insert_pre_haves(start, words)?;
        Ok(())
    }

    /// Restrict a peer's wants to explicit ranges.
    pub fn set_peer_wants(&mut self, peer: PeerId, ranges: &[WantRange]) {
        let state = self.peer_mut(peer);
        for range in ranges {
            state.add_want_range(*range);
        }
    }

    /// A peer opened replication; its length refresh is now pending.
    ///
    /// Returns false if the peer was already connecting or connected.
    pub fn add_peer(&mut self, peer: PeerId) -> bool {
        let added = self.peer_mut(peer).begin_connect();
        if added {
            tracing::debug!(log = %self.log_id, peer = %peer, "peer connecting");
        }
        added
    }

    /// A peer's length refresh resolved.
    ///
    /// Ignored unless the peer is still connecting, so a refresh that
    /// completes after a disconnect cannot bring the peer back.
    pub fn peer_length_resolved(&mut self, peer: &PeerId, length: u64) -> bool {
        let Some(state) = self.peers.get_mut(peer) else {
            return false;
        };
        let connected = state.finish_connect(length);
        if connected {
            tracing::debug!(log = %self.log_id, peer = %peer, length, "peer connected");
        }
        connected
    }

    /// A peer stopped replicating.
    ///
    /// The peer stays listed as disconnected with its last known haves.
    pub fn disconnect_peer(&mut self, peer: &PeerId) -> bool {
        let Some(state) = self.peers.get_mut(peer) else {
            return false;
        };
        let disconnected = state.disconnect();
        if disconnected {
            tracing::debug!(log = %self.log_id, peer = %peer, "peer disconnected");
        }
        disconnected
    }

    /// Apply an event from the log handle.
    ///
    /// Returns whether derived state may have changed.
    pub fn apply_event(&mut self, event: &LogEvent) -> Result<bool> {
        match event {
            // The local bitfield is read through the handle.
            LogEvent::Append { .. } | LogEvent::Download { .. } | LogEvent::Clear { .. } => {
                Ok(true)
            }
            LogEvent::PeerAdd { peer } => Ok(self.add_peer(*peer)),
            LogEvent::PeerRemove { peer } => Ok(self.disconnect_peer(peer)),
            LogEvent::RemoteBitfield { peer, start, words } => {
                self.peer_mut(*peer).apply_bitfield(*start, words)?;
                Ok(true)
            }
            LogEvent::RemoteRange {
                peer,
                start,
                length,
                value,
            } => {
                self.peer_mut(*peer).apply_range(*start, *length, *value);
                Ok(true)
            }
            LogEvent::RemoteLength { peer, length } => {
                self.peer_mut(*peer).set_remote_length(*length);
                Ok(true)
            }
        }
    }

    /// Derive aggregate state with every peer included.
    pub fn get_state(&self) -> DerivedState {
        self.derive_state(|_| false)
    }

    /// Derive aggregate state, leaving out peers for which `is_blocked` is true.
    ///
    /// Blocked peers are neither counted nor listed.
    pub fn derive_state(&self, is_blocked: impl Fn(&PeerId) -> bool) -> DerivedState {
        let length = self.length_excluding(&is_blocked);
        let peers: Vec<(&PeerId, &PeerState)> =
            self.peers.iter().filter(|(id, _)| !is_blocked(id)).collect();
        let n = peers.len();

        let mut local = LocalSyncState::default();
        let mut counts: Vec<PeerSyncState> = peers
            .iter()
            .map(|(_, p)| PeerSyncState {
                status: p.status(),
                ..Default::default()
            })
            .collect();

        let mut haves = vec![0u32; n];
        let mut lacks = vec![0u32; n];
        let mut prefix_have = vec![0u32; n + 1];
        let mut prefix_lack = vec![0u32; n + 1];
        let mut suffix_have = vec![0u32; n + 1];
        let mut suffix_lack = vec![0u32; n + 1];

        for word in 0..length.div_ceil(32) {
            let remaining = length - word * 32;
            let mask = if remaining >= 32 {
                u32::MAX
            } else {
                (1u32 << remaining) - 1
            };

            let local_have = self.local.as_ref().map_or(0, |h| h.local_word(word)) & mask;
            let local_lack = !local_have & mask;

            for (j, (_, peer)) in peers.iter().enumerate() {
                let have = peer.have_word(word) & mask;
                haves[j] = have;
                lacks[j] = peer.want_word(word) & !have & mask;
                prefix_have[j + 1] = prefix_have[j] | have;
                prefix_lack[j + 1] = prefix_lack[j] | lacks[j];
            }
            for j in (0..n).rev() {
                suffix_have[j] = suffix_have[j + 1] | haves[j];
                suffix_lack[j] = suffix_lack[j + 1] | lacks[j];
            }

            let peers_have = prefix_have[n];
            let peers_lack = prefix_lack[n];
            local.have += local_have.count_ones() as u64;
            local.want += (local_lack & peers_have).count_ones() as u64;
            local.wanted += (local_have & peers_lack).count_ones() as u64;
            local.missing += (!(local_have | peers_have) & mask).count_ones() as u64;

            for (j, count) in counts.iter_mut().enumerate() {
                let others_have = local_have | prefix_have[j] | suffix_have[j + 1];
                let others_lack = local_lack | prefix_lack[j] | suffix_lack[j + 1];
                count.have += haves[j].count_ones() as u64;
                count.want += (lacks[j] & others_have).count_ones() as u64;
                count.wanted += (haves[j] & others_lack).count_ones() as u64;
            }
        }

        DerivedState {
            length,
            local,
            peers: peers
                .into_iter()
                .map(|(id, _)| *id)
                .zip(counts)
                .collect(),
        }
    }
}

impl std::fmt::Debug for CoreSyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreSyncState")
            .field("log_id", &self.log_id)
            .field("attached", &self.is_attached())
            .field("length", &self.length())
            .field("peers", &self.peers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::memory::MemoryLog;
    use proptest::prelude::*;

    fn log_id() -> LogId {
        LogId::from_bytes([7; 32])
    }

    fn peer(n: u8) -> PeerId {
        PeerId::from_bytes([n; 32])
    }

    fn connected(state: &mut CoreSyncState, id: PeerId, words: &[u32], length: u64) {
        state.add_peer(id);
        state.peer_length_resolved(&id, length);
        state
            .apply_event(&LogEvent::RemoteBitfield {
                peer: id,
                start: 0,
                words: words.to_vec(),
            })
            .unwrap();
    }

    /// Bit-at-a-time derivation, the obvious way.
    fn derive_per_bit(state: &CoreSyncState) -> DerivedState {
        let length = state.length();
        let local_has = |i: u64| {
            state
                .local()
                .map_or(false, |h| h.local_word(i / 32) & (1 << (i % 32)) != 0)
        };
        let peers: Vec<_> = state.peers().collect();
        let mut out = DerivedState {
            length,
            ..Default::default()
        };
        for (id, p) in &peers {
            out.peers.insert(
                **id,
                PeerSyncState {
                    status: p.status(),
                    ..Default::default()
                },
            );
        }

        for i in 0..length {
            let has: Vec<bool> = peers.iter().map(|(_, p)| p.has(i)).collect();
            let lacks: Vec<bool> = peers
                .iter()
                .zip(&has)
                .map(|((_, p), h)| p.wants().get(i) && !h)
                .collect();
            let mine = local_has(i);
            let any_peer_has = has.iter().any(|h| *h);
            let any_peer_lacks = lacks.iter().any(|l| *l);

            out.local.have += mine as u64;
            out.local.want += (!mine && any_peer_has) as u64;
            out.local.wanted += (mine && any_peer_lacks) as u64;
            out.local.missing += (!mine && !any_peer_has) as u64;

            for (j, (id, _)) in peers.iter().enumerate() {
                let others_have = mine || has.iter().enumerate().any(|(k, h)| k != j && *h);
                let others_lack = !mine || lacks.iter().enumerate().any(|(k, l)| k != j && *l);
                let entry = out.peers.get_mut(*id).unwrap();
                entry.have += has[j] as u64;
                entry.want += (lacks[j] && others_have) as u64;
                entry.wanted += (has[j] && others_lack) as u64;
            }
        }
        out
    }

    #[test]
    fn test_three_peer_fixture() {
        let log = MemoryLog::new(log_id());
        log.append(3);
        log.set_length(4);

        let mut state = CoreSyncState::new(log_id());
        state.attach_local(log.clone()).unwrap();
        connected(&mut state, peer(0xa), &[0b0011], 4);
        connected(&mut state, peer(0xb), &[0b0101], 4);
        connected(&mut state, peer(0xc), &[0b0001], 4);

        let derived = state.get_state();
        assert_eq!(derived.length, 4);
        assert_eq!(
            derived.local,
            LocalSyncState {
                have: 3,
                want: 0,
                wanted: 2,
                missing: 1
            }
        );

        let expect = |have, want, wanted| PeerSyncState {
            have,
            want,
            wanted,
            status: PeerStatus::Connected,
        };
        assert_eq!(derived.peers[&peer(0xa)], expect(2, 1, 1));
        assert_eq!(derived.peers[&peer(0xb)], expect(2, 1, 1));
        assert_eq!(derived.peers[&peer(0xc)], expect(1, 2, 0));
        assert_eq!(derived, derive_per_bit(&state));
    }

    #[test]
    fn test_pre_have_only_peer() {
        let mut state = CoreSyncState::new(log_id());
        state.insert_pre_haves(peer(1), 0, &[u32::MAX, 0b111]).unwrap();

        assert_eq!(state.length(), 35);
        let derived = state.get_state();
        let p = derived.peers[&peer(1)];
        assert_eq!(p.have, 35);
        assert_eq!(p.status, PeerStatus::Disconnected);
        assert_eq!(derived.local.want, 35);
        assert_eq!(derived.local.missing, 0);
    }

    #[test]
    fn test_attaching_haves_never_decreases_have() {
        let mut state = CoreSyncState::new(log_id());
        state.insert_pre_haves(peer(1), 0, &[0b1111]).unwrap();
        let before = state.get_state().peers[&peer(1)].have;

        connected(&mut state, peer(1), &[0b0001], 4);
        let after = state.get_state().peers[&peer(1)].have;
        assert_eq!(before, 4);
        assert!(after >= before);
    }

    #[test]
    fn test_want_defaulting() {
        let log = MemoryLog::new(log_id());
        log.append(64);
        let mut state = CoreSyncState::new(log_id());
        state.attach_local(log).unwrap();
        connected(&mut state, peer(1), &[], 64);

        assert_eq!(state.get_state().peers[&peer(1)].want, 64);
        assert_eq!(state.get_state().local.wanted, 64);

        state.set_peer_wants(peer(1), &[WantRange::new(10, 5)]);
        assert_eq!(state.get_state().peers[&peer(1)].want, 5);
        assert_eq!(state.get_state().local.wanted, 5);
    }

    #[test]
    fn test_reattach_is_idempotent() {
        let log = MemoryLog::new(log_id());
        log.append(10);
        let mut state = CoreSyncState::new(log_id());
        assert!(state.attach_local(log.clone()).unwrap());
        assert!(!state.attach_local(log).unwrap());
        assert_eq!(state.get_state().local.have, 10);
    }

    #[test]
    fn test_attach_wrong_log_is_rejected() {
        let log = MemoryLog::new(LogId::from_bytes([9; 32]));
        let mut state = CoreSyncState::new(log_id());
        assert!(matches!(
            state.attach_local(log),
            Err(SyncError::LogMismatch { .. })
        ));
        assert!(!state.is_attached());
    }

    #[test]
    fn test_readding_peer_does_not_double_count() {
        let mut state = CoreSyncState::new(log_id());
        connected(&mut state, peer(1), &[0b11], 2);
        let once = state.get_state();

        assert!(!state.add_peer(peer(1)));
        assert_eq!(state.get_state(), once);
        assert_eq!(once.peers.len(), 1);
    }

    #[test]
    fn test_peer_is_connecting_until_length_resolves() {
        let mut state = CoreSyncState::new(log_id());
        assert!(state.apply_event(&LogEvent::PeerAdd { peer: peer(1) }).unwrap());
        assert_eq!(
            state.get_state().peers[&peer(1)].status,
            PeerStatus::Connecting
        );

        assert!(state.peer_length_resolved(&peer(1), 100));
        assert_eq!(state.get_state().peers[&peer(1)].status, PeerStatus::Connected);
        assert_eq!(state.length(), 100);
    }

    #[test]
    fn test_disconnect_retains_peer_and_blocks_stale_refresh() {
        let mut state = CoreSyncState::new(log_id());
        connected(&mut state, peer(1), &[0b1010], 4);
        state.add_peer(peer(2));

        assert!(state.disconnect_peer(&peer(1)));
        assert!(state.disconnect_peer(&peer(2)));
        assert!(!state.peer_length_resolved(&peer(2), 10));

        let derived = state.get_state();
        assert_eq!(derived.peers[&peer(1)].status, PeerStatus::Disconnected);
        assert_eq!(derived.peers[&peer(1)].have, 2);
        assert_eq!(derived.peers[&peer(2)].status, PeerStatus::Disconnected);
        assert_eq!(state.length(), 4);
    }

    #[test]
    fn test_unknown_peer_operations_are_harmless() {
        let mut state = CoreSyncState::new(log_id());
        assert!(!state.disconnect_peer(&peer(9)));
        assert!(!state.peer_length_resolved(&peer(9), 3));
        assert!(state.get_state().peers.is_empty());
    }

    #[test]
    fn test_blocked_peer_is_hidden_and_not_counted() {
        let log = MemoryLog::new(log_id());
        log.set_length(4);
        let mut state = CoreSyncState::new(log_id());
        state.attach_local(log).unwrap();
        connected(&mut state, peer(1), &[0b1111], 4);
        connected(&mut state, peer(2), &[0b0001], 4);

        let derived = state.derive_state(|p| *p == peer(1));
        assert!(!derived.peers.contains_key(&peer(1)));
        assert_eq!(derived.local.want, 1);
        assert_eq!(derived.local.missing, 3);
        assert_eq!(derived.peers[&peer(2)].want, 0);
    }

    #[test]
    fn test_blocked_peer_does_not_extend_length() {
        let log = MemoryLog::new(log_id());
        log.append(4);
        let mut state = CoreSyncState::new(log_id());
        state.attach_local(log).unwrap();

        let mut far = vec![0u32; 31_250];
        far[31_249] = 1;
        state.insert_pre_haves(peer(9), 0, &far).unwrap();
        state
            .apply_event(&LogEvent::RemoteLength {
                peer: peer(9),
                length: 2_000_000,
            })
            .unwrap();

        let derived = state.derive_state(|p| *p == peer(9));
        assert_eq!(derived.length, 4);
        assert_eq!(derived.local.missing, 0);
        assert_eq!(state.length(), 2_000_000);
        assert_eq!(state.get_state().local.missing, 2_000_000 - 4 - 1);
    }

    #[test]
    fn test_remote_range_updates() {
        let mut state = CoreSyncState::new(log_id());
        connected(&mut state, peer(1), &[], 100);
        state
            .apply_event(&LogEvent::RemoteRange {
                peer: peer(1),
                start: 10,
                length: 50,
                value: true,
            })
            .unwrap();
        state
            .apply_event(&LogEvent::RemoteRange {
                peer: peer(1),
                start: 20,
                length: 5,
                value: false,
            })
            .unwrap();
        assert_eq!(state.get_state().peers[&peer(1)].have, 45);
    }

    #[test]
    fn test_unaligned_remote_bitfield_is_rejected() {
        let mut state = CoreSyncState::new(log_id());
        let err = state
            .apply_event(&LogEvent::RemoteBitfield {
                peer: peer(1),
                start: 3,
                words: vec![1],
            })
            .unwrap_err();
        assert!(err.is_malformed_message());
    }

    #[test]
    fn test_progress() {
        let mut state = CoreSyncState::new(log_id());
        let log = MemoryLog::new(log_id());
        log.append(1);
        state.attach_local(log).unwrap();
        connected(&mut state, peer(1), &[0b1111], 4);

        let progress = state.get_state().local.progress();
        assert_eq!(progress.reachable, 4);
        assert_eq!(progress.percent(), 25.0);
        assert!(!progress.is_complete());
        assert_eq!(SyncProgress::default().percent(), 100.0);
    }

    #[test]
    fn test_is_synced() {
        let log = MemoryLog::new(log_id());
        log.append(4);
        let mut state = CoreSyncState::new(log_id());
        state.attach_local(log).unwrap();
        connected(&mut state, peer(1), &[0b0011], 4);
        assert!(!state.get_state().is_synced());

        state.set_peer_wants(peer(1), &[WantRange::new(0, 2)]);
        assert!(state.get_state().is_synced());
    }

    #[test]
    fn test_derivation_across_segment_boundary() {
        let length = replica_core::BITS_PER_SEGMENT + 40;
        let log = MemoryLog::new(log_id());
        log.append(length);
        let mut state = CoreSyncState::new(log_id());
        state.attach_local(log.clone()).unwrap();
        state.add_peer(peer(1));
        state.peer_length_resolved(&peer(1), length);
        state
            .apply_event(&LogEvent::RemoteRange {
                peer: peer(1),
                start: 0,
                length: length - 10,
                value: true,
            })
            .unwrap();

        let derived = state.get_state();
        assert_eq!(derived.local.have, length);
        assert_eq!(derived.local.wanted, 10);
        assert_eq!(derived.peers[&peer(1)].want, 10);
        assert_eq!(derived.peers[&peer(1)].have, length - 10);
    }

    prop_compose! {
        fn scenario()(
            length in 1u64..200,
            local in prop::collection::vec(any::<u32>(), 7),
            peers in prop::collection::vec(
                (
                    prop::collection::vec(any::<u32>(), 7),
                    prop::collection::vec(any::<u32>(), 7),
                    prop::option::of((0u64..200, 0u64..64)),
                    any::<bool>(),
                ),
                0..5,
            ),
        ) -> (u64, Vec<u32>, Vec<(Vec<u32>, Vec<u32>, Option<(u64, u64)>, bool)>) {
            (length, local, peers)
        }
    }

    proptest! {
        #[test]
        fn test_word_parallel_matches_per_bit((length, local_words, peers) in scenario()) {
            let log = MemoryLog::new(log_id());
            log.set_length(length);
            for i in 0..length {
                if local_words[(i / 32) as usize] & (1 << (i % 32)) != 0 {
                    log.download(i);
                }
            }

            let mut state = CoreSyncState::new(log_id());
            state.attach_local(log).unwrap();
            for (n, (pre, live, wants, is_connected)) in peers.iter().enumerate() {
                let id = peer(n as u8 + 1);
                state.insert_pre_haves(id, 0, pre).unwrap();
                if *is_connected {
                    connected(&mut state, id, live, length);
                }
                if let Some((start, len)) = wants {
                    state.set_peer_wants(id, &[WantRange::new(*start, *len)]);
                }
            }

            prop_assert_eq!(state.get_state(), derive_per_bit(&state));
        }
    }
}
