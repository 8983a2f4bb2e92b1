//! Engine integration tests.

use std::sync::Arc;
use std::time::Duration;

use replica::sync::log::memory::MemoryLog;
use replica::sync::{AllowAll, BlockList};
use replica::{
    EngineConfig, EngineError, LogId, Namespace, NamespaceState, PeerId, PeerStatus,
    PreHaveMessage, SyncEngine, SyncHandle, WantRange,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn log_id(n: u8) -> LogId {
    LogId::from_bytes([n; 32])
}

fn peer(n: u8) -> PeerId {
    PeerId::from_bytes([n; 32])
}

fn engine() -> SyncHandle {
    init_tracing();
    SyncEngine::spawn(EngineConfig::default(), Arc::new(AllowAll))
}

/// Poll a namespace until `done` holds.
async fn wait_for(
    handle: &SyncHandle,
    namespace: Namespace,
    done: impl Fn(&NamespaceState) -> bool,
) -> anyhow::Result<NamespaceState> {
    let poll = async {
        loop {
            let state = handle.state(namespace).await?;
            if done(&state) {
                return Ok::<_, EngineError>(state);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    Ok(tokio::time::timeout(Duration::from_secs(5), poll).await??)
}

#[tokio::test]
async fn test_three_peer_fixture_through_engine() -> anyhow::Result<()> {
    let handle = engine();
    let log = MemoryLog::new(log_id(1));
    log.append(3);
    log.set_length(4);
    assert!(handle.attach_local(Namespace::Data, log.clone()).await?);

    for (n, bits) in [(0xa, 0b0011u32), (0xb, 0b0101), (0xc, 0b0001)] {
        log.connect_peer(peer(n), 4);
        log.remote_bitfield(peer(n), 0, vec![bits]);
    }

    let state = wait_for(&handle, Namespace::Data, |s| {
        s.peers.len() == 3
            && s.peers.values().all(|p| p.status == PeerStatus::Connected && p.have > 0)
    })
    .await?;

    assert_eq!(state.local.have, 3);
    assert_eq!(state.local.want, 0);
    assert_eq!(state.local.wanted, 2);
    assert_eq!(state.local.missing, 1);
    assert_eq!(state.peers[&peer(0xc)].want, 2);
    Ok(())
}

#[tokio::test]
async fn test_reattach_does_not_duplicate_listeners() -> anyhow::Result<()> {
    let handle = engine();
    let log = MemoryLog::new(log_id(1));

    assert!(handle.attach_local(Namespace::Data, log.clone()).await?);
    assert!(!handle.attach_local(Namespace::Data, log.clone()).await?);
    assert_eq!(log.subscriber_count(), 1);

    log.append(5);
    let state = wait_for(&handle, Namespace::Data, |s| s.local.have == 5).await?;
    assert_eq!(state.length, 5);
    Ok(())
}

#[tokio::test]
async fn test_pre_have_then_connect() -> anyhow::Result<()> {
    let handle = engine();
    let msg = PreHaveMessage::new(log_id(1), 0, &[0b1111])?;
    handle.handle_pre_have(Namespace::Data, peer(1), msg).await?;

    let state = handle.state(Namespace::Data).await?;
    assert_eq!(state.peers[&peer(1)].have, 4);
    assert_eq!(state.peers[&peer(1)].status, PeerStatus::Disconnected);
    assert_eq!(state.local.want, 4);

    let log = MemoryLog::new(log_id(1));
    handle.attach_local(Namespace::Data, log.clone()).await?;
    log.connect_peer(peer(1), 4);
    log.remote_bitfield(peer(1), 0, vec![0b0001]);

    let state = wait_for(&handle, Namespace::Data, |s| {
        s.peers[&peer(1)].status == PeerStatus::Connected
    })
    .await?;
    assert_eq!(state.peers[&peer(1)].have, 4);
    Ok(())
}

#[tokio::test]
async fn test_peer_added_before_attach_connects_on_attach() -> anyhow::Result<()> {
    let handle = engine();
    let log = MemoryLog::new(log_id(1));
    log.connect_peer(peer(1), 12);

    assert!(handle.add_peer(Namespace::Data, peer(1), log_id(1)).await?);
    let state = handle.state(Namespace::Data).await?;
    assert_eq!(state.peers[&peer(1)].status, PeerStatus::Connecting);

    handle.attach_local(Namespace::Data, log).await?;
    let state = wait_for(&handle, Namespace::Data, |s| {
        s.peers[&peer(1)].status == PeerStatus::Connected
    })
    .await?;
    assert_eq!(state.length, 12);
    Ok(())
}

#[tokio::test]
async fn test_disconnect_during_refresh_is_not_resurrected() -> anyhow::Result<()> {
    let handle = engine();
    let log = MemoryLog::with_refresh_delay(log_id(1), Duration::from_millis(300));
    handle.attach_local(Namespace::Data, log.clone()).await?;

    log.connect_peer(peer(1), 10);
    wait_for(&handle, Namespace::Data, |s| {
        s.peers
            .get(&peer(1))
            .map_or(false, |p| p.status == PeerStatus::Connecting)
    })
    .await?;

    assert_eq!(handle.disconnect_peer(peer(1)).await?, 1);
    tokio::time::sleep(Duration::from_millis(500)).await;

    let state = handle.state(Namespace::Data).await?;
    assert_eq!(state.peers[&peer(1)].status, PeerStatus::Disconnected);
    assert_eq!(state.length, 0);
    Ok(())
}

#[tokio::test]
async fn test_malformed_pre_have_is_dropped() -> anyhow::Result<()> {
    let handle = engine();
    let bad = PreHaveMessage {
        log_id: log_id(1),
        start: 0,
        encoded: vec![0x08, 0x01].into(),
    };
    let err = handle
        .handle_pre_have(Namespace::Data, peer(1), bad)
        .await
        .unwrap_err();
    assert!(err.is_malformed_message());

    handle
        .insert_pre_haves(Namespace::Data, peer(1), log_id(1), 0, vec![1])
        .await?;
    assert_eq!(handle.state(Namespace::Data).await?.peers[&peer(1)].have, 1);
    Ok(())
}

#[tokio::test]
async fn test_blocked_peer_hidden() -> anyhow::Result<()> {
    init_tracing();
    let blocks = Arc::new(BlockList::new());
    let handle = SyncEngine::spawn(EngineConfig::default(), blocks.clone());

    handle
        .insert_pre_haves(Namespace::Auth, peer(1), log_id(1), 0, vec![0b11])
        .await?;
    assert_eq!(handle.state(Namespace::Auth).await?.peers.len(), 1);

    blocks.block(peer(1), Namespace::Auth);
    let state = handle.state(Namespace::Auth).await?;
    assert!(state.peers.is_empty());
    assert_eq!(state.length, 0);
    assert_eq!(state.local.missing, 0);
    Ok(())
}

#[tokio::test]
async fn test_want_ranges_through_engine() -> anyhow::Result<()> {
    let handle = engine();
    let log = MemoryLog::new(log_id(1));
    log.append(64);
    handle.attach_local(Namespace::Data, log.clone()).await?;
    log.connect_peer(peer(1), 64);

    let state = wait_for(&handle, Namespace::Data, |s| {
        s.peers
            .get(&peer(1))
            .map_or(false, |p| p.status == PeerStatus::Connected)
    })
    .await?;
    assert_eq!(state.peers[&peer(1)].want, 64);

    handle
        .set_peer_wants(Namespace::Data, peer(1), log_id(1), vec![WantRange::new(0, 8)])
        .await?;
    let state = handle.state(Namespace::Data).await?;
    assert_eq!(state.peers[&peer(1)].want, 8);
    assert!(!state.is_synced());
    Ok(())
}

#[tokio::test]
async fn test_snapshots_are_throttled() -> anyhow::Result<()> {
    let handle = engine();
    let mut snapshots = handle.subscribe();
    let log = MemoryLog::new(log_id(1));
    handle.attach_local(Namespace::Data, log.clone()).await?;

    for _ in 0..100 {
        log.append(1);
    }

    let wait = async {
        loop {
            snapshots.changed().await?;
            let done = snapshots
                .borrow()
                .namespace(Namespace::Data)
                .map_or(false, |s| s.local.have == 100);
            if done {
                return Ok::<_, anyhow::Error>(());
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait).await??;

    let snapshot = snapshots.borrow().clone();
    assert!(snapshot.sequence >= 1);
    assert!(snapshot.sequence < 20, "published {} snapshots", snapshot.sequence);
    Ok(())
}

#[tokio::test]
async fn test_remove_log() -> anyhow::Result<()> {
    let handle = engine();
    let log = MemoryLog::new(log_id(1));
    handle.attach_local(Namespace::Blob, log.clone()).await?;

    assert!(handle.remove_log(Namespace::Blob, log_id(1)).await?);
    assert!(!handle.remove_log(Namespace::Blob, log_id(1)).await?);

    log.append(3);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(handle.state(Namespace::Blob).await?.logs.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_shutdown() -> anyhow::Result<()> {
    let handle = engine();
    handle.shutdown().await?;
    assert!(matches!(
        handle.state(Namespace::Data).await,
        Err(EngineError::Shutdown)
    ));
    Ok(())
}
