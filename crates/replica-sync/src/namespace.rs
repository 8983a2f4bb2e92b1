//! Namespace-level sync state.
//!
//! A namespace groups the logs that serve one purpose (authorization,
//! configuration, data, blobs). Each log gets its own [`CoreSyncState`],
//! created the first time the log is referenced.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use replica_core::{LogId, PeerId};

use crate::access::AccessControl;
use crate::error::Result;
use crate::log::{LogEvent, LogHandle};
use crate::messages::PreHaveMessage;
use crate::peer::WantRange;
use crate::state::{CoreSyncState, DerivedState, LocalSyncState, PeerSyncState, SyncProgress};

/// The namespaces logs are grouped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Namespace {
    Auth,
    Config,
    Data,
    BlobIndex,
    Blob,
}

impl Namespace {
    pub const ALL: [Namespace; 5] = [
        Namespace::Auth,
        Namespace::Config,
        Namespace::Data,
        Namespace::BlobIndex,
        Namespace::Blob,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Auth => "auth",
            Namespace::Config => "config",
            Namespace::Data => "data",
            Namespace::BlobIndex => "blobIndex",
            Namespace::Blob => "blob",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate state of a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceState {
    pub namespace: Namespace,
    /// Sum of log lengths.
    pub length: u64,
    /// Local counts summed over every log.
    pub local: LocalSyncState,
    /// Per-peer counts summed over every log, with the most active status.
    pub peers: BTreeMap<PeerId, PeerSyncState>,
    /// Per-log derived state.
    pub logs: BTreeMap<LogId, DerivedState>,
}

impl NamespaceState {
    fn empty(namespace: Namespace) -> Self {
        Self {
            namespace,
            length: 0,
            local: LocalSyncState::default(),
            peers: BTreeMap::new(),
            logs: BTreeMap::new(),
        }
    }

    /// Whether every log in the namespace has converged.
    pub fn is_synced(&self) -> bool {
        self.logs.values().all(DerivedState::is_synced)
    }

    pub fn progress(&self) -> SyncProgress {
        self.local.progress()
    }
}

/// Sync state of every log in one namespace.
#[derive(Debug)]
pub struct NamespaceSyncState {
    namespace: Namespace,
    cores: BTreeMap<LogId, CoreSyncState>,
}

impl NamespaceSyncState {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            cores: BTreeMap::new(),
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn core(&self, log_id: &LogId) -> Option<&CoreSyncState> {
        self.cores.get(log_id)
    }

    /// Ids of every tracked log.
    pub fn log_ids(&self) -> impl Iterator<Item = &LogId> {
        self.cores.keys()
    }

    fn core_mut(&mut self, log_id: LogId) -> &mut CoreSyncState {
        let namespace = self.namespace;
        self.cores.entry(log_id).or_insert_with(|| {
            tracing::debug!(namespace = %namespace, log = %log_id, "tracking new log");
            CoreSyncState::new(log_id)
        })
    }

    /// Bind a local log, creating its state if needed.
    pub fn attach_local(&mut self, handle: Arc<dyn LogHandle>) -> Result<bool> {
        let log_id = handle.log_id();
        self.core_mut(log_id).attach_local(handle)
    }

    pub fn insert_pre_haves(
        &mut self,
        peer: PeerId,
        log_id: LogId,
        start: u64,
        words: &[u32],
    ) -> Result<()> {
        self.core_mut(log_id).insert_pre_haves(peer, start, words)
    }

    /// Decode a pre-have rumor and merge it.
    ///
    /// A malformed message is rejected without touching any state.
    pub fn handle_pre_have(&mut self, peer: PeerId, message: &PreHaveMessage) -> Result<()> {
        let words = message.decode_words()?;
        self.insert_pre_haves(peer, message.log_id, u64::from(message.start), &words)
    }

    pub fn set_peer_wants(&mut self, peer: PeerId, log_id: LogId, ranges: &[WantRange]) {
        self.core_mut(log_id).set_peer_wants(peer, ranges);
    }

    pub fn add_peer(&mut self, peer: PeerId, log_id: LogId) -> bool {
        self.core_mut(log_id).add_peer(peer)
    }

    pub fn peer_length_resolved(&mut self, peer: &PeerId, log_id: &LogId, length: u64) -> bool {
        self.cores
            .get_mut(log_id)
            .map_or(false, |core| core.peer_length_resolved(peer, length))
    }

    /// Disconnect a peer from every log. Returns how many logs it left.
    pub fn disconnect_peer(&mut self, peer: &PeerId) -> usize {
        self.cores
            .values_mut()
            .map(|core| core.disconnect_peer(peer))
            .filter(|left| *left)
            .count()
    }

    pub fn apply_event(&mut self, log_id: LogId, event: &LogEvent) -> Result<bool> {
        self.core_mut(log_id).apply_event(event)
    }

    /// Stop tracking a log.
    pub fn remove_core(&mut self, log_id: &LogId) -> bool {
        let removed = self.cores.remove(log_id).is_some();
        if removed {
            tracing::debug!(namespace = %self.namespace, log = %log_id, "stopped tracking log");
        }
        removed
    }

    /// Derive the aggregate state, leaving out blocked peers.
    pub fn get_state(&self, access: &dyn AccessControl) -> NamespaceState {
        let namespace = self.namespace;
        let mut state = NamespaceState::empty(namespace);
        let mut total = DerivedState::default();

        for (log_id, core) in &self.cores {
            let derived = core.derive_state(|peer| access.is_blocked(peer, namespace));
            total.accumulate(&derived);
            state.logs.insert(*log_id, derived);
        }

        state.length = total.length;
        state.local = total.local;
        state.peers = total.peers;
        state
    }
}
