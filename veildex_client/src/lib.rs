//! Veildex client: builds an encrypted keyword→id index on an untrusted server and queries it with single or conjunctive keyword searches.
//!
//! The client owns all key material, derived from a single 32-byte seed. Every `(keyword, id)` insertion becomes two encrypted
//! tuples, one for the server's postings map and one for its cross-tag map; deletions are marked in local filters and reach the
//! server lazily, as withheld decryption keys in the next search. The server never sees keywords, ids or deletion patterns.
//!
//! ## Features
//!
//! * **Forward privacy:** each update is stored under a fresh pseudorandom label; the server cannot link it to past queries.
//! * **Backward privacy:** searching a keyword burns the disclosed material, and deleted entries become undecryptable.
//! * **Conjunctive queries:** multi-keyword searches walk only the least frequent keyword and test the rest obliviously.
//!
//! ## Usage
//!
//! Add this crate as dependency to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! veildex_client = "=0.3.0"
//! ```
//!
//! Then, you can use it in your code:
//!
//! ```no_run
//! use veildex_client::{IndexClient, TcpConn};
//!
//! fn main() -> Result<(), veildex_common::VeildexError> {
//!     let conn = TcpConn::connect("127.0.0.1:4000")?;
//!     let seed = [0u8; 32];
//!     let mut client = IndexClient::new(conn, "mail", &seed, 1024)?;
//!
//!     client.insert("inbox", 1)?;
//!     client.insert("inbox", 2)?;
//!     client.insert("urgent", 2)?;
//!     client.delete("inbox", 1)?;
//!
//!     assert_eq!(client.search(&["inbox", "urgent"])?, vec![2]);
//!     Ok(())
//! }
//! ```

mod client;
mod keys;
mod state;
mod transport;

pub use client::IndexClient;
pub use keys::MasterKeys;
pub use transport::{ServerConn, TcpConn};
pub use veildex_common::params::SEED_BYTE_LEN;
