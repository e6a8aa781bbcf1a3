//! Master key material and the derived per-keyword keys.
//!
//! All keys come from a single 32-byte seed through HKDF-SHA-256 with
//! distinct info labels, so a client can be reconstructed anywhere from the
//! seed alone (plus its per-keyword counters, see [`crate::state`]).

use curve25519_dalek::scalar::Scalar;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use veildex_common::crypto::{hmac_digest, prf_scalar};
use veildex_common::params::{BLOCK_LEN, DIGEST_LEN, SEED_BYTE_LEN};

/// Which of a keyword's two label chains a key belongs to. Every keyword
/// maintains one chain in the postings map and one in the cross-tag map;
/// the role byte keeps their derivations disjoint.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Postings,
    CrossTag,
}

impl Role {
    pub(crate) fn byte(self) -> u8 {
        match self {
            Role::Postings => 0,
            Role::CrossTag => 1,
        }
    }
}

#[derive(Clone)]
pub struct MasterKeys {
    /// Epoch-key derivation (label chains).
    k_prf: [u8; DIGEST_LEN],
    /// Per-keyword result encryption.
    k_enc: [u8; BLOCK_LEN],
    /// Cross-term scalar derivation.
    k_x: [u8; BLOCK_LEN],
    /// Per-id scalar derivation.
    k_ind: [u8; BLOCK_LEN],
    /// Per-update blinding scalar derivation.
    k_z: [u8; BLOCK_LEN],
    /// Server-side cache handles.
    k_cache: [u8; DIGEST_LEN],
    /// Derivation-tree roots for the postings map.
    sk_t: [u8; BLOCK_LEN],
    /// Derivation-tree roots for the cross-tag map.
    sk_x: [u8; BLOCK_LEN],
}

impl MasterKeys {
    pub fn from_seed(seed: &[u8; SEED_BYTE_LEN]) -> MasterKeys {
        let hk = Hkdf::<Sha256>::new(None, seed);
        let expand = |label: &[u8], out: &mut [u8]| {
            hk.expand(label, out)
                .expect("HKDF output shorter than 255 blocks");
        };

        let mut keys = MasterKeys {
            k_prf: [0u8; DIGEST_LEN],
            k_enc: [0u8; BLOCK_LEN],
            k_x: [0u8; BLOCK_LEN],
            k_ind: [0u8; BLOCK_LEN],
            k_z: [0u8; BLOCK_LEN],
            k_cache: [0u8; DIGEST_LEN],
            sk_t: [0u8; BLOCK_LEN],
            sk_x: [0u8; BLOCK_LEN],
        };
        expand(b"veildex k_prf", &mut keys.k_prf);
        expand(b"veildex k_enc", &mut keys.k_enc);
        expand(b"veildex k_x", &mut keys.k_x);
        expand(b"veildex k_ind", &mut keys.k_ind);
        expand(b"veildex k_z", &mut keys.k_z);
        expand(b"veildex k_cache", &mut keys.k_cache);
        expand(b"veildex sk_t", &mut keys.sk_t);
        expand(b"veildex sk_x", &mut keys.sk_x);
        keys
    }

    /// Fresh keys from OS entropy; returns the seed so the caller can
    /// persist it.
    pub fn generate() -> (MasterKeys, [u8; SEED_BYTE_LEN]) {
        let mut seed = [0u8; SEED_BYTE_LEN];
        OsRng.fill_bytes(&mut seed);
        (MasterKeys::from_seed(&seed), seed)
    }

    /// HMAC key of one chain epoch. Rotated per generation, so labels of a
    /// committed generation can never be recomputed by the server.
    pub(crate) fn epoch_key(&self, keyword: &[u8], role: Role, generation: u32) -> [u8; DIGEST_LEN] {
        hmac_digest(
            &self.k_prf,
            &[keyword, &[role.byte()], &generation.to_le_bytes()],
        )
    }

    /// Stable handle under which the server caches this keyword's results.
    /// Unlike the epoch key it never rotates.
    pub(crate) fn cache_token(&self, keyword: &[u8], role: Role) -> Vec<u8> {
        hmac_digest(&self.k_cache, &[keyword, &[role.byte()]]).to_vec()
    }

    /// Symmetric key sealing result ids for this keyword.
    pub(crate) fn keyword_key(&self, keyword: &[u8]) -> [u8; BLOCK_LEN] {
        let digest = hmac_digest(&self.k_enc, &[keyword]);
        let mut key = [0u8; BLOCK_LEN];
        key.copy_from_slice(&digest[..BLOCK_LEN]);
        key
    }

    /// Root of the key-derivation tree for one (keyword, role, generation).
    pub(crate) fn tree_root(&self, keyword: &[u8], role: Role, generation: u32) -> [u8; BLOCK_LEN] {
        let sk = match role {
            Role::Postings => &self.sk_t,
            Role::CrossTag => &self.sk_x,
        };
        let digest = hmac_digest(sk, &[keyword, &generation.to_le_bytes()]);
        let mut root = [0u8; BLOCK_LEN];
        root.copy_from_slice(&digest[..BLOCK_LEN]);
        root
    }

    /// Per-id scalar shared by postings tuples and cross-tags.
    pub(crate) fn index_scalar(&self, id: u64) -> Scalar {
        prf_scalar(&self.k_ind, &[&id.to_le_bytes()])
    }

    /// Per-update blinding scalar; its inverse is stored in the postings
    /// tuple and cancels against the matching search token.
    pub(crate) fn update_scalar(&self, keyword: &[u8], generation: u32, upd: u32) -> Scalar {
        prf_scalar(
            &self.k_z,
            &[
                keyword,
                &[Role::Postings.byte()],
                &generation.to_le_bytes(),
                &upd.to_le_bytes(),
            ],
        )
    }

    /// Per-keyword scalar of the cross-tag construction.
    pub(crate) fn cross_scalar(&self, keyword: &[u8]) -> Scalar {
        prf_scalar(&self.k_x, &[keyword])
    }
}
