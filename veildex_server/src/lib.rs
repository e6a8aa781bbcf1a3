//! Veildex server: stores the encrypted keyword→id index and answers search queries without ever learning keywords, ids or deletion patterns.
//!
//! The server is deliberately dumb storage plus arithmetic. It keeps two label-keyed maps of opaque tuples per logical database,
//! walks a hidden label chain backwards when handed a search token, decrypts exactly the tuples whose derivation-tree leaves the
//! client disclosed, and caches the survivors so that repeated searches only pay for updates made in between. Conjunctive queries
//! are answered by membership tests against a cross-tag filter rebuilt from the conjuncts' own walks.
//!
//! ## Features
//!
//! * **Oblivious storage:** tuples arrive under pseudorandom labels; nothing links them to each other or to later queries.
//! * **Lazy revocation:** deleted tuples are never touched by the client again; they simply become undecryptable and are purged
//!   from the caches when a walk or a withheld cover exposes them.
//! * **Result caching:** each keyword's recoveries persist server-side under a stable token, so search cost is proportional to
//!   new updates, not to history.
//!
//! ## Usage
//!
//! This crate is designed to be used together with `veildex_client`, which produces every byte the server stores or evaluates.
//! Run the bundled example to get a standalone server:
//!
//! ```bash
//! cargo run --example serve -- --addr 127.0.0.1:4000
//! ```
//!
//! Or embed the engine directly:
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use veildex_server::ServerEngine;
//!
//! let engine = Arc::new(ServerEngine::new());
//! engine.init_handler("mail", 1024);
//! // hand `engine` to `veildex_server::net::serve`, or drive it in-process
//! ```

pub mod engine;
pub mod net;

pub use engine::ServerEngine;
