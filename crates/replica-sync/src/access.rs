//! Access control queries.
//!
//! Sync state never decides on its own whether a peer may take part in a
//! namespace. It asks an [`AccessControl`] implementation at derivation time,
//! so blocking or unblocking a peer takes effect on the next state read.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use replica_core::PeerId;

use crate::namespace::Namespace;

/// Answers whether a peer is blocked from a namespace.
pub trait AccessControl: Send + Sync {
    fn is_blocked(&self, peer: &PeerId, namespace: Namespace) -> bool;
}

/// Blocks nobody.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn is_blocked(&self, _peer: &PeerId, _namespace: Namespace) -> bool {
        false
    }
}

/// A mutable per-namespace block list.
#[derive(Debug, Default)]
pub struct BlockList {
    blocked: RwLock<HashMap<PeerId, HashSet<Namespace>>>,
}

impl BlockList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block a peer from one namespace.
    pub fn block(&self, peer: PeerId, namespace: Namespace) {
        self.blocked
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(peer)
            .or_default()
            .insert(namespace);
    }

    /// Block a peer from every namespace.
    pub fn block_all(&self, peer: PeerId) {
        self.blocked
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer, Namespace::ALL.into_iter().collect());
    }

    /// Lift every block on a peer. Returns whether the peer was blocked anywhere.
    pub fn unblock(&self, peer: &PeerId) -> bool {
        self.blocked
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer)
            .is_some()
    }

    /// Number of peers with at least one block.
    pub fn len(&self) -> usize {
        self.blocked
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AccessControl for BlockList {
    fn is_blocked(&self, peer: &PeerId, namespace: Namespace) -> bool {
        self.blocked
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .map_or(false, |namespaces| namespaces.contains(&namespace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all() {
        let peer = PeerId::from_bytes([1; 32]);
        for ns in Namespace::ALL {
            assert!(!AllowAll.is_blocked(&peer, ns));
        }
    }

    #[test]
    fn test_block_list_is_per_namespace() {
        let list = BlockList::new();
        let peer = PeerId::from_bytes([1; 32]);
        let other = PeerId::from_bytes([2; 32]);

        list.block(peer, Namespace::Data);
        assert!(list.is_blocked(&peer, Namespace::Data));
        assert!(!list.is_blocked(&peer, Namespace::Auth));
        assert!(!list.is_blocked(&other, Namespace::Data));

        list.block_all(other);
        assert!(Namespace::ALL.iter().all(|ns| list.is_blocked(&other, *ns)));
        assert_eq!(list.len(), 2);

        assert!(list.unblock(&peer));
        assert!(!list.unblock(&peer));
        assert!(!list.is_blocked(&peer, Namespace::Data));
    }
}
