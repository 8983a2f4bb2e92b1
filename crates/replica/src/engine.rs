//! The sync engine: one actor task owning every namespace's sync state.
//!
//! Sync state is synchronous and single-owner. The engine wraps it in a task
//! that receives commands from any number of [`SyncHandle`]s, forwards events
//! from attached logs, resolves peer length refreshes, and publishes
//! throttled [`SyncSnapshot`]s.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use replica_core::{LogId, PeerId};
use replica_sync::{
    AccessControl, LogEvent, LogHandle, Namespace, NamespaceState, NamespaceSyncState,
    PeerStatus, PreHaveMessage, WantRange,
};

use crate::error::{EngineError, Result};
use crate::notify::Throttle;

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum time between published snapshots.
    pub throttle_interval: Duration,
    /// Capacity of the command queue shared by all handles.
    pub command_buffer: usize,
    /// Capacity of the queue carrying log events and refresh results.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            throttle_interval: Duration::from_millis(200),
            command_buffer: 256,
            event_buffer: 1024,
        }
    }
}

/// State of every namespace at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    /// Increments with every published snapshot.
    pub sequence: u64,
    pub namespaces: BTreeMap<Namespace, NamespaceState>,
}

impl SyncSnapshot {
    pub fn namespace(&self, namespace: Namespace) -> Option<&NamespaceState> {
        self.namespaces.get(&namespace)
    }

    /// Whether every tracked namespace has converged.
    pub fn is_synced(&self) -> bool {
        self.namespaces.values().all(NamespaceState::is_synced)
    }
}

enum Command {
    AttachLocal {
        namespace: Namespace,
        handle: Arc<dyn LogHandle>,
        reply: oneshot::Sender<Result<bool>>,
    },
    PreHave {
        namespace: Namespace,
        peer: PeerId,
        message: PreHaveMessage,
        reply: oneshot::Sender<Result<()>>,
    },
    InsertPreHaves {
        namespace: Namespace,
        peer: PeerId,
        log_id: LogId,
        start: u64,
        words: Vec<u32>,
        reply: oneshot::Sender<Result<()>>,
    },
    SetPeerWants {
        namespace: Namespace,
        peer: PeerId,
        log_id: LogId,
        ranges: Vec<WantRange>,
        reply: oneshot::Sender<()>,
    },
    AddPeer {
        namespace: Namespace,
        peer: PeerId,
        log_id: LogId,
        reply: oneshot::Sender<bool>,
    },
    DisconnectPeer {
        peer: PeerId,
        reply: oneshot::Sender<usize>,
    },
    RemoveLog {
        namespace: Namespace,
        log_id: LogId,
        reply: oneshot::Sender<bool>,
    },
    State {
        namespace: Namespace,
        reply: oneshot::Sender<NamespaceState>,
    },
    Snapshot {
        reply: oneshot::Sender<SyncSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Messages from tasks the engine spawned.
enum Internal {
    Event {
        namespace: Namespace,
        log_id: LogId,
        event: LogEvent,
    },
    Lagged {
        namespace: Namespace,
        log_id: LogId,
        missed: u64,
    },
    PeerLength {
        namespace: Namespace,
        log_id: LogId,
        peer: PeerId,
        generation: u64,
        result: replica_sync::Result<u64>,
    },
}

type RefreshKey = (Namespace, LogId, PeerId);

/// Entry point for starting the engine.
pub struct SyncEngine;

impl SyncEngine {
    /// Spawn the engine task on the current tokio runtime.
    pub fn spawn(config: EngineConfig, access: Arc<dyn AccessControl>) -> SyncHandle {
        let (commands_tx, commands_rx) = mpsc::channel(config.command_buffer.max(1));
        let (internal_tx, internal_rx) = mpsc::channel(config.event_buffer.max(1));
        let (snapshots_tx, snapshots_rx) = watch::channel(SyncSnapshot::default());

        let actor = Actor {
            access,
            namespaces: BTreeMap::new(),
            commands: commands_rx,
            internal_tx,
            internal_rx,
            snapshots: snapshots_tx,
            throttle: Throttle::new(config.throttle_interval),
            sequence: 0,
            forwarders: HashMap::new(),
            refreshes: HashMap::new(),
            next_generation: 0,
        };
        tokio::spawn(actor.run());

        SyncHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
        }
    }
}

/// Cloneable handle to a running engine.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SyncSnapshot>,
}

impl SyncHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| EngineError::Shutdown)?;
        rx.await.map_err(|_| EngineError::Shutdown)
    }

    /// Bind a local log and start following its events.
    ///
    /// Returns false if the log was already attached.
    pub async fn attach_local(
        &self,
        namespace: Namespace,
        handle: Arc<dyn LogHandle>,
    ) -> Result<bool> {
        self.request(|reply| Command::AttachLocal {
            namespace,
            handle,
            reply,
        })
        .await?
    }

    /// Merge a pre-have rumor received from `peer`.
    pub async fn handle_pre_have(
        &self,
        namespace: Namespace,
        peer: PeerId,
        message: PreHaveMessage,
    ) -> Result<()> {
        self.request(|reply| Command::PreHave {
            namespace,
            peer,
            message,
            reply,
        })
        .await?
    }

    /// Merge already decoded pre-have words.
    pub async fn insert_pre_haves(
        &self,
        namespace: Namespace,
        peer: PeerId,
        log_id: LogId,
        start: u64,
        words: Vec<u32>,
    ) -> Result<()> {
        self.request(|reply| Command::InsertPreHaves {
            namespace,
            peer,
            log_id,
            start,
            words,
            reply,
        })
        .await?
    }

    pub async fn set_peer_wants(
        &self,
        namespace: Namespace,
        peer: PeerId,
        log_id: LogId,
        ranges: Vec<WantRange>,
    ) -> Result<()> {
        self.request(|reply| Command::SetPeerWants {
            namespace,
            peer,
            log_id,
            ranges,
            reply,
        })
        .await
    }

    /// Start replicating a log with a peer. The peer connects once its
    /// length has been refreshed through the attached log.
    pub async fn add_peer(
        &self,
        namespace: Namespace,
        peer: PeerId,
        log_id: LogId,
    ) -> Result<bool> {
        self.request(|reply| Command::AddPeer {
            namespace,
            peer,
            log_id,
            reply,
        })
        .await
    }

    /// Disconnect a peer from every log. Returns how many logs it left.
    pub async fn disconnect_peer(&self, peer: PeerId) -> Result<usize> {
        self.request(|reply| Command::DisconnectPeer { peer, reply })
            .await
    }

    /// Stop tracking a log.
    pub async fn remove_log(&self, namespace: Namespace, log_id: LogId) -> Result<bool> {
        self.request(|reply| Command::RemoveLog {
            namespace,
            log_id,
            reply,
        })
        .await
    }

    /// Freshly derived state of one namespace.
    pub async fn state(&self, namespace: Namespace) -> Result<NamespaceState> {
        self.request(|reply| Command::State { namespace, reply })
            .await
    }

    /// Freshly derived state of every namespace, bypassing the throttle.
    pub async fn snapshot(&self) -> Result<SyncSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Throttled snapshots.
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshots.clone()
    }

    /// Stop the engine.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

struct Actor {
    access: Arc<dyn AccessControl>,
    namespaces: BTreeMap<Namespace, NamespaceSyncState>,
    commands: mpsc::Receiver<Command>,
    internal_tx: mpsc::Sender<Internal>,
    internal_rx: mpsc::Receiver<Internal>,
    snapshots: watch::Sender<SyncSnapshot>,
    throttle: Throttle,
    sequence: u64,
    forwarders: HashMap<(Namespace, LogId), JoinHandle<()>>,
    /// Pending length refreshes. A result is applied only if its generation
    /// is still the current one for the key.
    refreshes: HashMap<RefreshKey, u64>,
    next_generation: u64,
}

impl Actor {
    async fn run(mut self) {
        tracing::debug!("sync engine started");
        loop {
            let deadline = self.throttle.deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(message) = self.internal_rx.recv() => self.handle_internal(message),
                _ = sleep_until(deadline), if deadline.is_some() => self.publish(),
            }
        }

        for (_, forwarder) in self.forwarders.drain() {
            forwarder.abort();
        }
        tracing::debug!("sync engine stopped");
    }

    fn namespace(&mut self, namespace: Namespace) -> &mut NamespaceSyncState {
        self.namespaces
            .entry(namespace)
            .or_insert_with(|| NamespaceSyncState::new(namespace))
    }

    fn changed(&mut self) {
        self.throttle.notify(Instant::now());
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::AttachLocal {
                namespace,
                handle,
                reply,
            } => {
                let result = self.attach_local(namespace, handle);
                let _ = reply.send(result);
            }
            Command::PreHave {
                namespace,
                peer,
                message,
                reply,
            } => {
                let result = self.namespace(namespace).handle_pre_have(peer, &message);
                match &result {
                    Ok(()) => self.changed(),
                    Err(e) => tracing::warn!(
                        namespace = %namespace,
                        peer = %peer,
                        log = %message.log_id,
                        error = %e,
                        "dropping malformed pre-have"
                    ),
                }
                let _ = reply.send(result.map_err(EngineError::from));
            }
            Command::InsertPreHaves {
                namespace,
                peer,
                log_id,
                start,
                words,
                reply,
            } => {
                let result = self
                    .namespace(namespace)
                    .insert_pre_haves(peer, log_id, start, &words);
                if result.is_ok() {
                    self.changed();
                }
                let _ = reply.send(result.map_err(EngineError::from));
            }
            Command::SetPeerWants {
                namespace,
                peer,
                log_id,
                ranges,
                reply,
            } => {
                self.namespace(namespace).set_peer_wants(peer, log_id, &ranges);
                self.changed();
                let _ = reply.send(());
            }
            Command::AddPeer {
                namespace,
                peer,
                log_id,
                reply,
            } => {
                let added = self.add_peer(namespace, log_id, peer);
                let _ = reply.send(added);
            }
            Command::DisconnectPeer { peer, reply } => {
                self.refreshes.retain(|(_, _, p), _| *p != peer);
                let left: usize = self
                    .namespaces
                    .values_mut()
                    .map(|ns| ns.disconnect_peer(&peer))
                    .sum();
                if left > 0 {
                    self.changed();
                }
                let _ = reply.send(left);
            }
            Command::RemoveLog {
                namespace,
                log_id,
                reply,
            } => {
                if let Some(forwarder) = self.forwarders.remove(&(namespace, log_id)) {
                    forwarder.abort();
                }
                self.refreshes
                    .retain(|(ns, log, _), _| !(*ns == namespace && *log == log_id));
                let removed = self.namespace(namespace).remove_core(&log_id);
                if removed {
                    self.changed();
                }
                let _ = reply.send(removed);
            }
            Command::State { namespace, reply } => {
                let state = self.derive(namespace);
                let _ = reply.send(state);
            }
            Command::Snapshot { reply } => {
                let snapshot = self.snapshot(self.sequence);
                let _ = reply.send(snapshot);
            }
            // handled by the run loop
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Event {
                namespace,
                log_id,
                event,
            } => self.apply_event(namespace, log_id, event),
            Internal::Lagged {
                namespace,
                log_id,
                missed,
            } => {
                tracing::warn!(
                    namespace = %namespace,
                    log = %log_id,
                    missed,
                    "log event stream lagged"
                );
                self.changed();
            }
            Internal::PeerLength {
                namespace,
                log_id,
                peer,
                generation,
                result,
            } => {
                let key = (namespace, log_id, peer);
                if self.refreshes.get(&key) != Some(&generation) {
                    tracing::trace!(peer = %peer, log = %log_id, "dropping stale length refresh");
                    return;
                }
                self.refreshes.remove(&key);

                let length = result.unwrap_or_else(|e| {
                    tracing::warn!(
                        peer = %peer,
                        log = %log_id,
                        error = %e,
                        "peer length refresh failed"
                    );
                    0
                });
                if self
                    .namespace(namespace)
                    .peer_length_resolved(&peer, &log_id, length)
                {
                    self.changed();
                }
            }
        }
    }

    fn attach_local(
        &mut self,
        namespace: Namespace,
        handle: Arc<dyn LogHandle>,
    ) -> Result<bool> {
        let log_id = handle.log_id();
        if !self.namespace(namespace).attach_local(handle.clone())? {
            return Ok(false);
        }

        let events = handle.subscribe();
        let forwarder = tokio::spawn(forward_events(
            namespace,
            log_id,
            events,
            self.internal_tx.clone(),
        ));
        if let Some(previous) = self.forwarders.insert((namespace, log_id), forwarder) {
            previous.abort();
        }

        // Peers added before the log was attached are still waiting on a refresh.
        let connecting: Vec<PeerId> = self
            .namespaces
            .get(&namespace)
            .and_then(|ns| ns.core(&log_id))
            .map(|core| {
                core.peers()
                    .filter(|(_, p)| p.status() == PeerStatus::Connecting)
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default();
        for peer in connecting {
            self.spawn_refresh(namespace, log_id, peer, handle.clone());
        }

        self.changed();
        Ok(true)
    }

    fn add_peer(&mut self, namespace: Namespace, log_id: LogId, peer: PeerId) -> bool {
        let ns = self.namespace(namespace);
        if !ns.add_peer(peer, log_id) {
            return false;
        }
        let handle = ns.core(&log_id).and_then(|core| core.local().cloned());
        if let Some(handle) = handle {
            self.spawn_refresh(namespace, log_id, peer, handle);
        }
        self.changed();
        true
    }

    fn apply_event(&mut self, namespace: Namespace, log_id: LogId, event: LogEvent) {
        let tracked = self
            .namespaces
            .get(&namespace)
            .and_then(|ns| ns.core(&log_id))
            .is_some();
        if !tracked {
            // queued before the log was removed
            return;
        }

        match event {
            LogEvent::PeerAdd { peer } => {
                self.add_peer(namespace, log_id, peer);
            }
            LogEvent::PeerRemove { peer } => {
                self.refreshes.remove(&(namespace, log_id, peer));
                if let Ok(true) = self.namespace(namespace).apply_event(log_id, &event) {
                    self.changed();
                }
            }
            event => match self.namespace(namespace).apply_event(log_id, &event) {
                Ok(true) => self.changed(),
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    namespace = %namespace,
                    log = %log_id,
                    peer = ?event.peer(),
                    error = %e,
                    "dropping malformed log event"
                ),
            },
        }
    }

    fn spawn_refresh(
        &mut self,
        namespace: Namespace,
        log_id: LogId,
        peer: PeerId,
        handle: Arc<dyn LogHandle>,
    ) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.refreshes.insert((namespace, log_id, peer), generation);

        let tx = self.internal_tx.downgrade();
        tokio::spawn(async move {
            let result = handle.refresh_peer_length(&peer).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx
                    .send(Internal::PeerLength {
                        namespace,
                        log_id,
                        peer,
                        generation,
                        result,
                    })
                    .await;
            }
        });
    }

    fn derive(&self, namespace: Namespace) -> NamespaceState {
        match self.namespaces.get(&namespace) {
            Some(ns) => ns.get_state(self.access.as_ref()),
            None => NamespaceSyncState::new(namespace).get_state(self.access.as_ref()),
        }
    }

    fn snapshot(&self, sequence: u64) -> SyncSnapshot {
        SyncSnapshot {
            sequence,
            namespaces: self
                .namespaces
                .iter()
                .map(|(ns, state)| (*ns, state.get_state(self.access.as_ref())))
                .collect(),
        }
    }

    fn publish(&mut self) {
        if !self.throttle.fire(Instant::now()) {
            return;
        }
        self.sequence += 1;
        let snapshot = self.snapshot(self.sequence);
        tracing::trace!(
            sequence = self.sequence,
            synced = snapshot.is_synced(),
            "publishing snapshot"
        );
        self.snapshots.send_replace(snapshot);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(deadline).await;
    }
}

/// Relay one log's events into the engine until either side goes away.
async fn forward_events(
    namespace: Namespace,
    log_id: LogId,
    mut events: broadcast::Receiver<LogEvent>,
    tx: mpsc::Sender<Internal>,
) {
    loop {
        let message = match events.recv().await {
            Ok(event) => Internal::Event {
                namespace,
                log_id,
                event,
            },
            Err(broadcast::error::RecvError::Lagged(missed)) => Internal::Lagged {
                namespace,
                log_id,
                missed,
            },
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if tx.send(message).await.is_err() {
            break;
        }
    }
    tracing::trace!(namespace = %namespace, log = %log_id, "log event forwarder stopped");
}
