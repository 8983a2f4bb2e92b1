//! # Replica Sync
//!
//! Have/want tracking for replicated append-only logs.
//!
//! ## Overview
//!
//! For every log, the sync state keeps one bitfield per tracked party: the
//! local replica (read through a [`LogHandle`]) and each remote peer. From
//! those it derives, on demand, how many blocks each party has, wants, and
//! can offer, and whether replication has converged.
//!
//! ## Key Properties
//!
//! - **Pull-based**: aggregates are recomputed on every read, never cached
//! - **Sparse**: memory follows the ranges actually set, not the log length
//! - **Rumor-aware**: pre-haves relayed before a direct connection count
//!   towards accounting until the peer connects, and keep counting after
//! - **Idempotent**: re-attaching a log or re-adding a peer changes nothing
//!
//! ## Peer Lifecycle
//!
//! ```text
//! Disconnected --add_peer--> Connecting --length resolved--> Connected
//!      ^                          |                              |
//!      +-------disconnect---------+-----------disconnect---------+
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use replica_core::{LogId, PeerId};
//! use replica_sync::{log::memory::MemoryLog, CoreSyncState, LogEvent};
//!
//! let log_id = LogId::from_bytes([1; 32]);
//! let peer = PeerId::from_bytes([2; 32]);
//!
//! let log = MemoryLog::new(log_id);
//! log.append(4);
//!
//! let mut state = CoreSyncState::new(log_id);
//! state.attach_local(log).unwrap();
//! state.add_peer(peer);
//! state.peer_length_resolved(&peer, 4);
//! state
//!     .apply_event(&LogEvent::RemoteBitfield { peer, start: 0, words: vec![0b0011] })
//!     .unwrap();
//!
//! let derived = state.get_state();
//! assert_eq!(derived.local.wanted, 2);
//! assert_eq!(derived.peers[&peer].want, 2);
//! ```

pub mod access;
pub mod error;
pub mod log;
pub mod messages;
pub mod namespace;
pub mod peer;
pub mod state;

pub use access::{AccessControl, AllowAll, BlockList};
pub use error::{Result, SyncError};
pub use log::{LogEvent, LogHandle};
pub use messages::{limits, PreHaveMessage};
pub use namespace::{Namespace, NamespaceState, NamespaceSyncState};
pub use peer::{PeerState, PeerStatus, WantRange, Wants};
pub use state::{CoreSyncState, DerivedState, LocalSyncState, PeerSyncState, SyncProgress};
