//! Symmetric primitives and group wrappers consumed by the index protocol.
//!
//! Everything operates on raw byte buffers: keyed hashes (HMAC-SHA-256),
//! plain digests (SHA-256), AES-128-CTR sealing with a random IV prepended,
//! and scalar/point helpers over the Ristretto prime-order group used by the
//! cross-tag construction.

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes128;
use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::VeildexError;
use crate::params::{BLOCK_LEN, DIGEST_LEN};

type HmacSha256 = Hmac<Sha256>;
type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// HMAC-SHA-256 over the concatenation of `parts`.
pub fn hmac_digest(key: &[u8], parts: &[&[u8]]) -> [u8; DIGEST_LEN] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// SHA-256 over the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Bytewise XOR of two digests.
pub fn xor_digest(a: &[u8; DIGEST_LEN], b: &[u8; DIGEST_LEN]) -> [u8; DIGEST_LEN] {
    let mut out = [0u8; DIGEST_LEN];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = a[i] ^ b[i];
    }
    out
}

/// Fills a fixed-size buffer from OS entropy.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Encrypts `plaintext` under AES-128-CTR with a fresh random IV; the IV is
/// prepended to the returned blob.
pub fn ctr_encrypt(key: &[u8; BLOCK_LEN], plaintext: &[u8]) -> Vec<u8> {
    let iv = random_bytes::<BLOCK_LEN>();
    let mut out = Vec::with_capacity(BLOCK_LEN + plaintext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(plaintext);

    let mut cipher = Aes128Ctr::new(key.into(), (&iv).into());
    cipher.apply_keystream(&mut out[BLOCK_LEN..]);
    out
}

/// Inverse of [`ctr_encrypt`]. CTR mode is unauthenticated: decrypting with
/// the wrong key yields garbage rather than an error, so decryption rights
/// are governed exclusively by which derived keys were disclosed.
pub fn ctr_decrypt(key: &[u8; BLOCK_LEN], blob: &[u8]) -> Result<Vec<u8>, VeildexError> {
    if blob.len() < BLOCK_LEN {
        return Err(VeildexError::CiphertextTooShort);
    }
    let (iv, body) = blob.split_at(BLOCK_LEN);
    let iv: &[u8; BLOCK_LEN] = iv.try_into().expect("split at BLOCK_LEN");

    let mut out = body.to_vec();
    let mut cipher = Aes128Ctr::new(key.into(), iv.into());
    cipher.apply_keystream(&mut out);
    Ok(out)
}

/// Keyed pseudorandom function into the scalar field (`Fp`).
pub fn prf_scalar(key: &[u8], parts: &[&[u8]]) -> Scalar {
    Scalar::from_bytes_mod_order(hmac_digest(key, parts))
}

/// Unkeyed hash into the scalar field (`Hp`), used to blind cross-tag
/// elements by the chain state they are stored under.
pub fn hash_scalar(parts: &[&[u8]]) -> Scalar {
    Scalar::from_bytes_mod_order(sha256(parts))
}

/// `g^s` for the fixed group generator.
pub fn base_point_mul(s: &Scalar) -> RistrettoPoint {
    RISTRETTO_BASEPOINT_POINT * s
}

/// Canonical 32-byte encoding of a group element.
pub fn point_to_bytes(point: &RistrettoPoint) -> [u8; 32] {
    point.compress().to_bytes()
}

/// Parses a group element; a corrupt encoding is fatal to the operation
/// that imported it.
pub fn point_from_bytes(bytes: &[u8]) -> Result<RistrettoPoint, VeildexError> {
    CompressedRistretto::from_slice(bytes)
        .map_err(|_| VeildexError::CorruptGroupElement)?
        .decompress()
        .ok_or(VeildexError::CorruptGroupElement)
}
