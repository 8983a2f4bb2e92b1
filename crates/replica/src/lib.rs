//! # Replica
//!
//! The unified API for replica sync: have/want tracking for replicated
//! append-only logs, driven by a single engine task.
//!
//! ## Overview
//!
//! - **Bitfields**: sparse bit-vectors describing which blocks a party holds
//! - **Sync state**: per-log and per-namespace have/want/wanted/missing counts
//! - **Engine**: an actor owning all sync state, fed by log events and peer
//!   rumors, publishing throttled snapshots
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use replica::{EngineConfig, Namespace, SyncEngine};
//! use replica::core::LogId;
//! use replica::sync::{log::memory::MemoryLog, AllowAll};
//!
//! async fn example() -> replica::Result<()> {
//!     let engine = SyncEngine::spawn(EngineConfig::default(), Arc::new(AllowAll));
//!
//!     let log = MemoryLog::new(LogId::from_bytes([1; 32]));
//!     engine.attach_local(Namespace::Data, log.clone()).await?;
//!     log.append(10);
//!
//!     let mut snapshots = engine.subscribe();
//!     snapshots.changed().await.ok();
//!     println!("synced: {}", snapshots.borrow().is_synced());
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `replica::core` - identities, sparse bitfield, run-length codec
//! - `replica::sync` - sync state, peer state, log handles, access control

pub mod engine;
pub mod error;
pub mod notify;

pub use replica_core as core;
pub use replica_sync as sync;

pub use engine::{EngineConfig, SyncEngine, SyncHandle, SyncSnapshot};
pub use error::{EngineError, Result};
pub use notify::Throttle;

pub use replica_core::{LogId, PeerId, SparseBitfield};
pub use replica_sync::{
    AccessControl, DerivedState, LogEvent, LogHandle, Namespace, NamespaceState, PeerStatus,
    PreHaveMessage, SyncProgress, WantRange,
};
