//! Log handle abstraction.
//!
//! Sync state never owns log storage. It reads the local bitfield through a
//! [`LogHandle`] and learns about changes from the [`LogEvent`] stream the
//! handle publishes. Implementations may wrap an on-disk log, a network
//! replicator, or the in-memory [`memory::MemoryLog`] used in tests.

use async_trait::async_trait;
use tokio::sync::broadcast;

use replica_core::{LogId, PeerId};

use crate::error::Result;

/// Something that happened to a log or to one of its replication peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// Blocks were appended locally. Carries the new length.
    Append { length: u64 },
    /// A block was downloaded from a peer.
    Download { index: u64 },
    /// Local blocks were cleared.
    Clear { start: u64, length: u64 },
    /// A peer opened replication of this log.
    PeerAdd { peer: PeerId },
    /// A peer closed replication of this log.
    PeerRemove { peer: PeerId },
    /// A peer sent part of its bitfield. `start` is a bit offset, multiple of 32.
    RemoteBitfield {
        peer: PeerId,
        start: u64,
        words: Vec<u32>,
    },
    /// A peer announced it gained (`value`) or dropped a range of blocks.
    RemoteRange {
        peer: PeerId,
        start: u64,
        length: u64,
        value: bool,
    },
    /// A peer announced a new length.
    RemoteLength { peer: PeerId, length: u64 },
}

impl LogEvent {
    /// The peer this event concerns, if it is a remote event.
    pub fn peer(&self) -> Option<&PeerId> {
        match self {
            LogEvent::PeerAdd { peer }
            | LogEvent::PeerRemove { peer }
            | LogEvent::RemoteBitfield { peer, .. }
            | LogEvent::RemoteRange { peer, .. }
            | LogEvent::RemoteLength { peer, .. } => Some(peer),
            LogEvent::Append { .. } | LogEvent::Download { .. } | LogEvent::Clear { .. } => None,
        }
    }
}

/// A live local log.
#[async_trait]
pub trait LogHandle: Send + Sync {
    /// The log's identifier.
    fn log_id(&self) -> LogId;

    /// Current confirmed local length.
    fn length(&self) -> u64;

    /// Word `word_index` of the local bitfield (read-through view).
    fn local_word(&self, word_index: u64) -> u32;

    /// Subscribe to local and remote events for this log.
    fn subscribe(&self) -> broadcast::Receiver<LogEvent>;

    /// Ask a peer for its current length.
    ///
    /// While this is pending the peer is reported as connecting.
    async fn refresh_peer_length(&self, peer: &PeerId) -> Result<u64>;
}

/// A simple in-memory log for testing.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
    use std::time::Duration;

    use replica_core::SparseBitfield;

    use crate::error::SyncError;

    const EVENT_CAPACITY: usize = 1024;

    #[derive(Default)]
    struct Inner {
        bitfield: SparseBitfield,
        length: u64,
        peer_lengths: HashMap<PeerId, u64>,
    }

    /// In-memory log handle.
    ///
    /// Local mutations update the bitfield and publish the matching event;
    /// the `remote_*` methods only publish events, as a replicator would.
    pub struct MemoryLog {
        log_id: LogId,
        inner: RwLock<Inner>,
        events: broadcast::Sender<LogEvent>,
        refresh_delay: Duration,
    }

    impl MemoryLog {
        /// Create an empty log.
        pub fn new(log_id: LogId) -> Arc<Self> {
            Self::with_refresh_delay(log_id, Duration::ZERO)
        }

        /// Create an empty log whose peer length refreshes take `delay`.
        pub fn with_refresh_delay(log_id: LogId, delay: Duration) -> Arc<Self> {
            let (events, _) = broadcast::channel(EVENT_CAPACITY);
            Arc::new(Self {
                log_id,
                inner: RwLock::new(Inner::default()),
                events,
                refresh_delay: delay,
            })
        }

        fn read(&self) -> RwLockReadGuard<'_, Inner> {
            self.inner.read().unwrap_or_else(PoisonError::into_inner)
        }

        fn write(&self) -> RwLockWriteGuard<'_, Inner> {
            self.inner.write().unwrap_or_else(PoisonError::into_inner)
        }

        fn emit(&self, event: LogEvent) {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }

        /// Append `count` locally written blocks. Returns the new length.
        pub fn append(&self, count: u64) -> u64 {
            let length = {
                let mut inner = self.write();
                let start = inner.length;
                inner.bitfield.set_range(start, count, true);
                inner.length += count;
                inner.length
            };
            self.emit(LogEvent::Append { length });
            length
        }

        /// Record a downloaded block.
        pub fn download(&self, index: u64) {
            {
                let mut inner = self.write();
                inner.bitfield.set(index, true);
                inner.length = inner.length.max(index + 1);
            }
            self.emit(LogEvent::Download { index });
        }

        /// Clear local blocks, keeping the length.
        pub fn clear(&self, start: u64, length: u64) {
            self.write().bitfield.set_range(start, length, false);
            self.emit(LogEvent::Clear { start, length });
        }

        /// Extend the known length without holding the blocks (a sparse replica).
        pub fn set_length(&self, length: u64) {
            let mut inner = self.write();
            inner.length = inner.length.max(length);
        }

        /// A peer starts replicating with the given remote length.
        pub fn connect_peer(&self, peer: PeerId, remote_length: u64) {
            self.write().peer_lengths.insert(peer, remote_length);
            self.emit(LogEvent::PeerAdd { peer });
        }

        /// A peer stops replicating.
        pub fn disconnect_peer(&self, peer: PeerId) {
            self.write().peer_lengths.remove(&peer);
            self.emit(LogEvent::PeerRemove { peer });
        }

        pub fn remote_bitfield(&self, peer: PeerId, start: u64, words: Vec<u32>) {
            self.emit(LogEvent::RemoteBitfield { peer, start, words });
        }

        pub fn remote_range(&self, peer: PeerId, start: u64, length: u64, value: bool) {
            self.emit(LogEvent::RemoteRange {
                peer,
                start,
                length,
                value,
            });
        }

        pub fn remote_length(&self, peer: PeerId, length: u64) {
            self.write().peer_lengths.insert(peer, length);
            self.emit(LogEvent::RemoteLength { peer, length });
        }

        /// Number of live event subscriptions.
        pub fn subscriber_count(&self) -> usize {
            self.events.receiver_count()
        }
    }

    #[async_trait]
    impl LogHandle for MemoryLog {
        fn log_id(&self) -> LogId {
            self.log_id
        }

        fn length(&self) -> u64 {
            self.read().length
        }

        fn local_word(&self, word_index: u64) -> u32 {
            self.read().bitfield.get_word(word_index)
        }

        fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
            self.events.subscribe()
        }

        async fn refresh_peer_length(&self, peer: &PeerId) -> Result<u64> {
            if !self.refresh_delay.is_zero() {
                tokio::time::sleep(self.refresh_delay).await;
            }
            let length = self.read().peer_lengths.get(peer).copied();
            length.ok_or_else(|| SyncError::Log {
                log_id: self.log_id,
                message: format!("peer {} is not replicating", peer),
            })
        }
    }
}
