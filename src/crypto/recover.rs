//! Purchase-authorization digests and signature recovery
//!
//! The preimage layout is byte-compatible with the EVM side:
//! `np(32) ‖ validator(20) ‖ deadline(32) ‖ chain_id(32) ‖ user(20) ‖
//! quality(32)` where integers are 32-byte big-endian words, keccak-hashed
//! and then re-hashed under the standard
//! `"\x19Ethereum Signed Message:\n32"` prefix. Recovery itself is an
//! external oracle; the engine only compares the recovered address against
//! the validator's verifier.

use super::{keccak256_multiple, Address, Hash};
use primitive_types::U256;

/// Prefix applied to the raw digest before recovery.
const ETH_SIGNED_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// 65-byte recoverable signature `(r, s, v)`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 65]);

impl Signature {
    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature(0x{}..)", hex::encode(&self.0[..6]))
    }
}

/// Maps a prefixed digest and signature back to the signing address.
///
/// `None` means the signature does not recover to any address; callers
/// surface that as a verification failure.
pub trait SignatureOracle: Send + Sync {
    fn recover(&self, digest: &Hash, signature: &Signature) -> Option<Address>;
}

fn u256_word(v: U256) -> [u8; 32] {
    let mut buf = [0u8; 32];
    v.to_big_endian(&mut buf);
    buf
}

/// Builds the prefixed digest a purchase signature must recover from.
pub fn purchase_digest(
    np: U256,
    validator: Address,
    deadline: u64,
    chain_id: u64,
    user: Address,
    quality: u8,
) -> Hash {
    let np_word = u256_word(np);
    let deadline_word = u256_word(U256::from(deadline));
    let chain_word = u256_word(U256::from(chain_id));
    let quality_word = u256_word(U256::from(quality));

    let inner = keccak256_multiple(&[
        &np_word,
        validator.as_bytes(),
        &deadline_word,
        &chain_word,
        user.as_bytes(),
        &quality_word,
    ]);

    keccak256_multiple(&[ETH_SIGNED_MESSAGE_PREFIX, inner.as_bytes()])
}

/// Deterministic oracle for tests and simulation.
///
/// A signature produced by [`StaticOracle::sign_as`] embeds the signer
/// address and a keccak binding to the digest, so tampering with either
/// fails recovery.
#[derive(Debug, Default)]
pub struct StaticOracle;

impl StaticOracle {
    /// Produce a signature that recovers to `signer` for exactly `digest`.
    pub fn sign_as(signer: Address, digest: &Hash) -> Signature {
        let binding = keccak256_multiple(&[signer.as_bytes(), digest.as_bytes()]);
        let mut bytes = [0u8; 65];
        bytes[..20].copy_from_slice(signer.as_bytes());
        bytes[20..52].copy_from_slice(binding.as_bytes());
        bytes[64] = 27;
        Signature(bytes)
    }
}

impl SignatureOracle for StaticOracle {
    fn recover(&self, digest: &Hash, signature: &Signature) -> Option<Address> {
        let mut signer = [0u8; 20];
        signer.copy_from_slice(&signature.0[..20]);
        let signer = Address::new(signer);

        let binding = keccak256_multiple(&[signer.as_bytes(), digest.as_bytes()]);
        if signature.0[20..52] == binding.0 {
            Some(signer)
        } else {
            None
        }
    }
}
