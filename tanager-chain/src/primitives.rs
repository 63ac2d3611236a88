//! Hash primitives and the shared elliptic-curve context.

pub mod sha256d;

use lazy_static::lazy_static;
use ripemd160::Ripemd160;
use sha1::Sha1;
use sha2::{Digest, Sha256};

lazy_static! {
    /// Process-wide verification-only secp256k1 context.
    ///
    /// Context creation is expensive; verification contexts are freely
    /// shareable across threads.
    pub static ref SECP256K1: secp256k1::Secp256k1<secp256k1::VerifyOnly> =
        secp256k1::Secp256k1::verification_only();
}

/// Single SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// SHA-1, kept only for OP_SHA1.
pub fn sha1(data: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&Sha1::digest(data));
    out
}

/// RIPEMD-160.
pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&Ripemd160::digest(data));
    out
}

/// HASH160: RIPEMD-160 of SHA-256, the pubkey/script hash of legacy and
/// SegWit v0 outputs.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    ripemd160(&sha256(data))
}

/// BIP-340 tagged hash: `SHA256(SHA256(tag) || SHA256(tag) || data)`.
pub fn tagged_hash(tag: &str, data: &[u8]) -> [u8; 32] {
    let tag_digest = sha256(tag.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(&tag_digest);
    hasher.update(&tag_digest);
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}
