//! Cryptographic primitives for the staking core
//!
//! The engine itself performs no signing. It needs exactly two things:
//! keccak-256 hashing (purchase-authorization preimages, deterministic
//! validator addresses) and an external recovery oracle that maps a digest
//! and signature back to an address.

pub mod recover;

pub use recover::{purchase_digest, SignatureOracle, StaticOracle};

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// 20-byte account address used throughout the protocol.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Create an address from raw bytes.
    pub fn new(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    /// The zero address.
    pub fn zero() -> Self {
        Address([0u8; 20])
    }

    /// Check whether this is the zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Derive an address from arbitrary seed material: the low 20 bytes of
    /// the keccak-256 of the concatenated pieces.
    pub fn derive(parts: &[&[u8]]) -> Self {
        let digest = keccak256_multiple(parts);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest.0[12..]);
        Address(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Hex string without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a hex string (40 hex chars, optional `0x` prefix).
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        if bytes.len() != 20 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Address(arr))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{}..)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// 32-byte keccak-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Create a hash from bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// The zero hash.
    pub fn zero() -> Self {
        Hash([0u8; 32])
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex string without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash(0x{}..)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Keccak-256 of a single byte slice.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Hash(bytes)
}

/// Keccak-256 over multiple concatenated pieces.
pub fn keccak256_multiple(parts: &[&[u8]]) -> Hash {
    let mut hasher = Keccak256::new();
    for p in parts {
        hasher.update(p);
    }
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Hash(bytes)
}
