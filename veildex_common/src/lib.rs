//! Veildex: a dynamic searchable symmetric encryption (DSSE) engine with
//! conjunctive keyword queries and backward privacy.
//!
//! A client outsources an encrypted keyword→document-id index to an untrusted
//! server and later retrieves, via single or conjunctive keyword queries,
//! exactly the matching ids. Insertions and deletions never re-encrypt the
//! whole index, and once a `(keyword, id)` pair has been deleted the server
//! cannot tell which stored entries belonged to it.
//!
//! This crate holds the building blocks shared by `veildex_client` and
//! `veildex_server`:
//!
//! * [`ggm`] — the key-derivation tree used for per-entry-revocable
//!   symmetric encryption, including minimal subtree coverage.
//! * [`filter`] — the fixed-size probabilistic set-membership filter used
//!   both as the client's pending-deletion marker and as the cross-tag
//!   predicate index reconstructed per search.
//! * [`crypto`] — keyed hashes, AES-CTR sealing and the prime-order group
//!   wrappers (Ristretto) behind the cross-tag construction.
//! * [`wire`] — the length-prefixed MessagePack command protocol spoken
//!   between client and server.

pub mod crypto;
pub mod error;
pub mod filter;
pub mod ggm;
pub mod params;
pub mod wire;

pub use error::VeildexError;
