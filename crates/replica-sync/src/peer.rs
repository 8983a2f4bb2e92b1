//! Per-peer have/want tracking for a single log.

use serde::{Deserialize, Serialize};

use replica_core::{BitfieldError, SparseBitfield};

/// Connection status of a remote party for one log.
///
/// Ordered so that merging statuses across logs keeps the most active one.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum PeerStatus {
    /// Not connected. Only rumored (pre-have) information is known.
    #[default]
    Disconnected,
    /// Connected, but the peer's length is still being refreshed.
    Connecting,
    /// Connected with a resolved length.
    Connected,
}

impl PeerStatus {
    /// Whether the peer is connected for this log.
    pub fn is_active(&self) -> bool {
        matches!(self, PeerStatus::Connected)
    }

    /// Combine statuses from several logs, keeping the most active.
    pub fn merge(self, other: PeerStatus) -> PeerStatus {
        self.max(other)
    }
}

/// A contiguous range of blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WantRange {
    /// First block in the range.
    pub start: u64,
    /// Number of blocks.
    pub length: u64,
}

impl WantRange {
    pub fn new(start: u64, length: u64) -> Self {
        Self { start, length }
    }
}

/// The set of blocks a peer wants.
#[derive(Debug, Clone, Default)]
pub enum Wants {
    /// No want ranges declared: the peer wants every block.
    #[default]
    All,
    /// Only the blocks set in the bitfield are wanted.
    Explicit(SparseBitfield),
}

impl Wants {
    /// The want word at `word_index`.
    pub fn word(&self, word_index: u64) -> u32 {
        match self {
            Wants::All => u32::MAX,
            Wants::Explicit(bits) => bits.get_word(word_index),
        }
    }

    /// Whether block `index` is wanted.
    pub fn get(&self, index: u64) -> bool {
        match self {
            Wants::All => true,
            Wants::Explicit(bits) => bits.get(index),
        }
    }

    /// Add a wanted range.
    ///
    /// The first range flips the set from "everything" to "only explicit ranges".
    pub fn add_range(&mut self, range: WantRange) {
        if let Wants::All = self {
            *self = Wants::Explicit(SparseBitfield::new());
        }
        if let Wants::Explicit(bits) = self {
            bits.set_range(range.start, range.length, true);
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Wants::All)
    }
}

/// Everything known about one remote party for one log.
#[derive(Debug, Clone, Default)]
pub struct PeerState {
    /// Rumored haves, received before a direct connection.
    pre_haves: SparseBitfield,
    /// Confirmed haves from a live connection.
    haves: Option<SparseBitfield>,
    wants: Wants,
    status: PeerStatus,
    remote_length: Option<u64>,
}

impl PeerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> PeerStatus {
        self.status
    }

    pub fn wants(&self) -> &Wants {
        &self.wants
    }

    /// Length last reported by the peer, if any.
    pub fn remote_length(&self) -> Option<u64> {
        self.remote_length
    }

    /// Whether confirmed haves have been received on the current connection.
    pub fn has_confirmed_haves(&self) -> bool {
        self.haves.is_some()
    }

    /// Have word at `word_index`: confirmed haves unioned with pre-haves.
    pub fn have_word(&self, word_index: u64) -> u32 {
        let rumored = self.pre_haves.get_word(word_index);
        match &self.haves {
            Some(haves) => haves.get_word(word_index) | rumored,
            None => rumored,
        }
    }

    /// Want word at `word_index`.
    pub fn want_word(&self, word_index: u64) -> u32 {
        self.wants.word(word_index)
    }

    /// Whether the peer has block `index`, confirmed or rumored.
    pub fn has(&self, index: u64) -> bool {
        self.pre_haves.get(index) || self.haves.as_ref().map_or(false, |h| h.get(index))
    }

    /// Number of blocks implied by the pre-haves (highest set bit + 1).
    pub fn pre_have_length(&self) -> u64 {
        self.pre_haves.last_set().map_or(0, |last| last + 1)
    }

    /// Merge a rumored bitfield fragment.
    pub fn insert_pre_haves(&mut self, start: u64, words: &[u32]) -> Result<(), BitfieldError> {
        self.pre_haves.insert(start, words)
    }

    /// Install a fragment of the peer's live bitfield.
    pub fn apply_bitfield(&mut self, start: u64, words: &[u32]) -> Result<(), BitfieldError> {
        self.haves
            .get_or_insert_with(SparseBitfield::new)
            .insert(start, words)
    }

    /// Apply a live range update (`value` = now has / no longer has).
    pub fn apply_range(&mut self, start: u64, length: u64, value: bool) {
        self.haves
            .get_or_insert_with(SparseBitfield::new)
            .set_range(start, length, value);
    }

    pub fn add_want_range(&mut self, range: WantRange) {
        self.wants.add_range(range);
    }

    pub fn set_remote_length(&mut self, length: u64) {
        self.remote_length = Some(self.remote_length.map_or(length, |l| l.max(length)));
    }

    /// Mark the peer as connected but still refreshing its length.
    ///
    /// Returns false if the peer was already connecting or connected.
    pub fn begin_connect(&mut self) -> bool {
        if self.status != PeerStatus::Disconnected {
            return false;
        }
        self.status = PeerStatus::Connecting;
        true
    }

    /// Finish a length refresh. Ignored unless the peer is connecting.
    pub fn finish_connect(&mut self, length: u64) -> bool {
        if self.status != PeerStatus::Connecting {
            return false;
        }
        self.set_remote_length(length);
        self.status = PeerStatus::Connected;
        true
    }

    /// Stop tracking the live connection.
    ///
    /// Confirmed haves are folded into the retained pre-haves so the peer's
    /// last known state still counts towards aggregates.
    pub fn disconnect(&mut self) -> bool {
        if let Some(haves) = self.haves.take() {
            self.pre_haves.union_with(&haves);
        }
        let was_connected = self.status != PeerStatus::Disconnected;
        self.status = PeerStatus::Disconnected;
        was_connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wants_default_to_all() {
        let peer = PeerState::new();
        assert!(peer.wants().is_all());
        assert_eq!(peer.want_word(0), u32::MAX);
        assert_eq!(peer.want_word(1_000_000), u32::MAX);
    }

    #[test]
    fn test_first_want_range_flips_default() {
        let mut peer = PeerState::new();
        peer.add_want_range(WantRange::new(4, 4));
        assert!(!peer.wants().is_all());
        assert_eq!(peer.want_word(0), 0b1111_0000);
        assert_eq!(peer.want_word(1), 0);

        peer.add_want_range(WantRange::new(32, 1));
        assert_eq!(peer.want_word(0), 0b1111_0000);
        assert_eq!(peer.want_word(1), 1);
    }

    #[test]
    fn test_haves_union_pre_haves() {
        let mut peer = PeerState::new();
        peer.insert_pre_haves(0, &[0b0011]).unwrap();
        assert_eq!(peer.have_word(0), 0b0011);

        peer.apply_bitfield(0, &[0b0100]).unwrap();
        assert_eq!(peer.have_word(0), 0b0111);
        assert!(peer.has(0));
        assert!(peer.has(2));
        assert!(!peer.has(3));
    }

    #[test]
    fn test_pre_have_length() {
        let mut peer = PeerState::new();
        assert_eq!(peer.pre_have_length(), 0);
        peer.insert_pre_haves(64, &[0, 0b1000]).unwrap();
        assert_eq!(peer.pre_have_length(), 100);
    }

    #[test]
    fn test_connect_lifecycle() {
        let mut peer = PeerState::new();
        assert_eq!(peer.status(), PeerStatus::Disconnected);
        assert!(!peer.finish_connect(10));

        assert!(peer.begin_connect());
        assert!(!peer.begin_connect());
        assert_eq!(peer.status(), PeerStatus::Connecting);

        assert!(peer.finish_connect(10));
        assert_eq!(peer.status(), PeerStatus::Connected);
        assert_eq!(peer.remote_length(), Some(10));
    }

    #[test]
    fn test_disconnect_retains_last_known_haves() {
        let mut peer = PeerState::new();
        peer.begin_connect();
        peer.finish_connect(8);
        peer.apply_range(0, 5, true);

        assert!(peer.disconnect());
        assert_eq!(peer.status(), PeerStatus::Disconnected);
        assert!(!peer.has_confirmed_haves());
        assert_eq!(peer.have_word(0), 0b1_1111);
        assert!(!peer.disconnect());
    }

    #[test]
    fn test_status_merge() {
        assert_eq!(
            PeerStatus::Disconnected.merge(PeerStatus::Connecting),
            PeerStatus::Connecting
        );
        assert_eq!(
            PeerStatus::Connected.merge(PeerStatus::Connecting),
            PeerStatus::Connected
        );
    }
}
