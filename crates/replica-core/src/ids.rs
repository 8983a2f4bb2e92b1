//! Strong identifier types.
//!
//! All identifiers are 32-byte newtypes to prevent mixing up peers and logs
//! at compile time.

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a remote party.
///
/// Derived from the party's Ed25519 public key as
/// Blake3("replica-peer-v0:" || public_key), so the identifier can be used as a
/// map key without handing the raw key around.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    /// Derive a peer ID from the peer's public key.
    pub fn derive(public_key: &VerifyingKey) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"replica-peer-v0:");
        hasher.update(public_key.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        parse_hex32(s).map(Self)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl From<[u8; 32]> for PeerId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Identifier of an append-only log: the log's Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogId(pub [u8; 32]);

impl LogId {
    /// The log ID for a log signed by `key`.
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Self(key.to_bytes())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        parse_hex32(s).map(Self)
    }
}

impl fmt::Debug for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for LogId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for LogId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

fn parse_hex32(s: &str) -> Result<[u8; 32], hex::FromHexError> {
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    #[test]
    fn test_peer_id_derivation_is_stable() {
        let key = SigningKey::from_bytes(&[0x42; 32]).verifying_key();
        assert_eq!(PeerId::derive(&key), PeerId::derive(&key));

        let other = SigningKey::from_bytes(&[0x43; 32]).verifying_key();
        assert_ne!(PeerId::derive(&key), PeerId::derive(&other));
    }

    #[test]
    fn test_peer_id_is_not_the_raw_key() {
        let key = SigningKey::from_bytes(&[0x42; 32]).verifying_key();
        assert_ne!(PeerId::derive(&key).0, key.to_bytes());
        assert_eq!(LogId::from_public_key(&key).0, key.to_bytes());
    }

    #[test]
    fn test_hex_roundtrip() {
        let id = LogId::from_bytes([0xab; 32]);
        assert_eq!(LogId::from_hex(&id.to_hex()).unwrap(), id);
        assert_eq!(format!("{}", id), "abababababababab");

        let peer = PeerId::from_bytes([0xcd; 32]);
        assert_eq!(PeerId::from_hex(&peer.to_hex()).unwrap(), peer);
        assert!(format!("{:?}", peer).starts_with("PeerId("));
    }

    #[test]
    fn test_hex_wrong_length() {
        assert!(PeerId::from_hex("abcd").is_err());
    }
}
