//! The search engine: encrypted map storage, chain walking, result caching
//! and conjunctive intersection.
//!
//! The server holds one [`Instance`] per logical database. Each instance
//! stores two label-keyed maps of opaque tuples and a set of per-token
//! result caches. A search walks the primary keyword's chain backwards
//! through the postings map, decrypts every tuple whose derivation-tree
//! leaf was disclosed, merges the recoveries into the keyword's cache,
//! rebuilds the cross-tag filter from the conjunct walks and finally
//! intersects. Nothing the server learns lets it decrypt a tuple whose
//! leaves were withheld.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use curve25519_dalek::scalar::Scalar;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use veildex_common::crypto::{
    ctr_decrypt, hash_scalar, hmac_digest, point_from_bytes, point_to_bytes, xor_digest,
};
use veildex_common::filter::{probe_positions, BloomFilter};
use veildex_common::ggm::{GgmNode, GgmTree};
use veildex_common::params::{
    bloom_filter_size, DIGEST_LEN, FILTER_FP_RATE, FILTER_HASH_COUNT, MAX_DB_SIZE, XSET_FP_RATE,
    XSET_HASH_COUNT,
};
use veildex_common::wire::{IndexEntry, MapKind, SearchRequest, TermQuery};
use veildex_common::VeildexError;

/// Scalar length trailing every postings payload.
const Y_LEN: usize = 32;

#[derive(Default)]
pub struct ServerEngine {
    instances: RwLock<HashMap<String, Arc<Instance>>>,
}

impl ServerEngine {
    pub fn new() -> ServerEngine {
        ServerEngine::default()
    }

    /// Creates the logical database `db`, replacing any previous instance
    /// along with its stored tuples and caches. `capacity` must match the
    /// value the client sized its filters with.
    pub fn init_handler(&self, db: &str, capacity: u64) {
        let num_bits = bloom_filter_size(FILTER_HASH_COUNT, capacity as usize, FILTER_FP_RATE);
        let instance = Arc::new(Instance {
            level: GgmTree::new(num_bits).level(),
            num_bits,
            tmap: RwLock::new(HashMap::new()),
            xmap: RwLock::new(HashMap::new()),
            caches: Mutex::new(CacheSet::default()),
            decrypt_count: AtomicU64::new(0),
        });
        info!(db, capacity, num_bits, "initialised logical database");
        self.instances.write().insert(db.to_string(), instance);
    }

    pub fn add_entries(
        &self,
        db: &str,
        map: MapKind,
        entries: Vec<IndexEntry>,
    ) -> Result<usize, VeildexError> {
        let instance = self.instance(db)?;
        let store = match map {
            MapKind::TMap => &instance.tmap,
            MapKind::XMap => &instance.xmap,
        };
        let count = entries.len();
        let mut guard = store.write();
        for entry in entries {
            guard.insert(entry.label.clone(), entry);
        }
        debug!(db, count, "stored tuples");
        Ok(count)
    }

    /// Serves one search. State trouble (an uninitialised database, a
    /// label chain with a missing link) fails closed with an empty result
    /// set; only malformed requests surface as errors.
    pub fn search(&self, db: &str, query: &SearchRequest) -> Result<Vec<Vec<u8>>, VeildexError> {
        let Ok(instance) = self.instance(db) else {
            warn!(db, "search against uninitialised database");
            return Ok(Vec::new());
        };
        if query.level != instance.level {
            return Err(VeildexError::LevelMismatch);
        }
        instance.search(query)
    }

    /// Total tuple decryptions performed for `db` so far. Grows only when
    /// a search walks updates it has not cached yet.
    pub fn decrypt_count(&self, db: &str) -> u64 {
        self.instance(db)
            .map(|i| i.decrypt_count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn instance(&self, db: &str) -> Result<Arc<Instance>, VeildexError> {
        self.instances
            .read()
            .get(db)
            .cloned()
            .ok_or(VeildexError::UninitializedDatabase)
    }
}

struct Instance {
    level: u32,
    num_bits: u64,
    tmap: RwLock<HashMap<Vec<u8>, IndexEntry>>,
    xmap: RwLock<HashMap<Vec<u8>, IndexEntry>>,
    caches: Mutex<CacheSet>,
    decrypt_count: AtomicU64,
}

#[derive(Default)]
struct CacheSet {
    /// Per cache token: surviving postings tuples keyed by tag.
    postings: HashMap<Vec<u8>, HashMap<Vec<u8>, CachedTuple>>,
    /// Per cache token: unblinded cross-tag encodings keyed by tag.
    cross: HashMap<Vec<u8>, HashMap<Vec<u8>, [u8; 32]>>,
}

struct CachedTuple {
    sealed_id: Vec<u8>,
    y: Scalar,
    generation: u32,
    upd: u32,
}

enum Walked {
    Recovered {
        tag: Vec<u8>,
        payload: Vec<u8>,
        state: [u8; DIGEST_LEN],
        upd: u32,
    },
    Deleted {
        tag: Vec<u8>,
    },
}

impl Instance {
    fn search(&self, query: &SearchRequest) -> Result<Vec<Vec<u8>>, VeildexError> {
        let mut caches = self.caches.lock();

        let walked = match self.walk_chain(MapKind::TMap, &query.term) {
            Ok(walked) => walked,
            Err(VeildexError::ChainBroken) => {
                warn!("postings chain has a missing link; returning nothing");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        {
            let cache = caches
                .postings
                .entry(query.term.cache_token.clone())
                .or_default();
            for item in walked {
                match item {
                    Walked::Recovered { tag, payload, upd, .. } => {
                        if payload.len() <= Y_LEN {
                            warn!(len = payload.len(), "postings payload too short; dropping");
                            continue;
                        }
                        let split = payload.len() - Y_LEN;
                        let Ok(y_bytes) = <[u8; Y_LEN]>::try_from(&payload[split..]) else {
                            continue;
                        };
                        cache.insert(
                            tag,
                            CachedTuple {
                                sealed_id: payload[..split].to_vec(),
                                y: Scalar::from_bytes_mod_order(y_bytes),
                                generation: query.term.generation,
                                upd,
                            },
                        );
                    }
                    Walked::Deleted { tag } => {
                        cache.remove(&tag);
                    }
                }
            }
            // deletions made before this keyword was ever cached still
            // have to land: a cached tag all of whose probe leaves were
            // withheld has been revoked since the last walk
            retain_covered(cache, &query.term.node_list, self.num_bits);
        }

        let xset = if query.xterms.is_empty() {
            None
        } else {
            Some(self.build_xset(&mut caches, &query.xterms)?)
        };

        let empty = HashMap::new();
        let cache = caches
            .postings
            .get(&query.term.cache_token)
            .unwrap_or(&empty);
        let mut results = Vec::new();
        for tuple in cache.values() {
            if self.matches_conjuncts(tuple, query, xset.as_ref()) {
                results.push(tuple.sealed_id.clone());
            }
        }
        debug!(
            token = %hex::encode(&query.term.cache_token),
            walked = query.term.count,
            cached = cache.len(),
            results = results.len(),
            "search complete"
        );
        Ok(results)
    }

    /// Walks each conjunct's chain in the cross-tag map, refreshes its
    /// cache and returns the membership filter over every surviving
    /// unblinded cross-tag.
    fn build_xset(
        &self,
        caches: &mut CacheSet,
        xterms: &[TermQuery],
    ) -> Result<BloomFilter, VeildexError> {
        let mut filter = BloomFilter::with_rate(XSET_HASH_COUNT, MAX_DB_SIZE, XSET_FP_RATE);
        for xterm in xterms {
            let walked = match self.walk_chain(MapKind::XMap, xterm) {
                Ok(walked) => walked,
                Err(VeildexError::ChainBroken) => {
                    warn!("cross-tag chain has a missing link; conjunct contributes nothing");
                    Vec::new()
                }
                Err(e) => return Err(e),
            };
            let cache = caches.cross.entry(xterm.cache_token.clone()).or_default();
            for item in walked {
                match item {
                    Walked::Recovered { tag, payload, state, .. } => {
                        let point = point_from_bytes(&payload)?;
                        let unblinded = point * hash_scalar(&[&state]);
                        cache.insert(tag, point_to_bytes(&unblinded));
                    }
                    Walked::Deleted { tag } => {
                        cache.remove(&tag);
                    }
                }
            }
            retain_covered(cache, &xterm.node_list, self.num_bits);
            for encoded in cache.values() {
                filter.add(encoded);
            }
        }
        Ok(filter)
    }

    /// `xtoken^y` must land in the cross-tag filter for every conjunct.
    /// A token the client did not supply for this tuple's position counts
    /// as a miss.
    fn matches_conjuncts(
        &self,
        tuple: &CachedTuple,
        query: &SearchRequest,
        xset: Option<&BloomFilter>,
    ) -> bool {
        let Some(filter) = xset else {
            return true;
        };
        let Some(row) = query
            .xtokens
            .get(tuple.generation as usize)
            .and_then(|rows| rows.get(tuple.upd as usize))
        else {
            return false;
        };
        if row.len() < query.xterms.len() {
            return false;
        }
        row.iter().all(|token| {
            point_from_bytes(token)
                .map(|point| filter.might_contain(&point_to_bytes(&(point * tuple.y))))
                .unwrap_or(false)
        })
    }

    /// Recomputes the label chain backwards from the disclosed head,
    /// classifying each stored tuple as recovered (some probe leaf was
    /// disclosed) or deleted (every leaf withheld).
    fn walk_chain(&self, map: MapKind, term: &TermQuery) -> Result<Vec<Walked>, VeildexError> {
        let store = match map {
            MapKind::TMap => self.tmap.read(),
            MapKind::XMap => self.xmap.read(),
        };
        let mut out = Vec::with_capacity(term.count as usize);
        let mut state = term.state;
        for step in 0..term.count {
            let label = hmac_digest(&term.epoch_key, &[&state]);
            let Some(entry) = store.get(label.as_slice()) else {
                return Err(VeildexError::ChainBroken);
            };
            let upd = term.count - 1 - step;
            match self.recover(entry, &term.node_list)? {
                Some(payload) => out.push(Walked::Recovered {
                    tag: entry.tag.clone(),
                    payload,
                    state,
                    upd,
                }),
                None => out.push(Walked::Deleted {
                    tag: entry.tag.clone(),
                }),
            }
            state = xor_digest(&entry.chain, &label);
        }
        Ok(out)
    }

    /// Decrypts a tuple through the first disclosed leaf among its probe
    /// positions, or reports it revoked when none is.
    fn recover(
        &self,
        entry: &IndexEntry,
        nodes: &[GgmNode],
    ) -> Result<Option<Vec<u8>>, VeildexError> {
        let positions = probe_positions(&entry.tag, FILTER_HASH_COUNT, self.num_bits);
        for (slot, &pos) in positions.iter().enumerate() {
            let Some(node) = covering_node(nodes, pos) else {
                continue;
            };
            let Some(ciphertext) = entry.ciphertexts.get(slot) else {
                return Err(VeildexError::Protocol(format!(
                    "tuple is missing ciphertext slot {slot}"
                )));
            };
            let leaf = GgmTree::derive_key(&node.key, pos, node.level, 0);
            self.decrypt_count.fetch_add(1, Ordering::Relaxed);
            return ctr_decrypt(&leaf, ciphertext).map(Some);
        }
        Ok(None)
    }
}

fn covering_node(nodes: &[GgmNode], pos: u64) -> Option<&GgmNode> {
    nodes.iter().find(|node| pos >> node.level == node.index)
}

/// Drops every cached tag whose probe positions are all outside the
/// disclosed cover.
fn retain_covered<T>(cache: &mut HashMap<Vec<u8>, T>, nodes: &[GgmNode], num_bits: u64) {
    cache.retain(|tag, _| {
        probe_positions(tag, FILTER_HASH_COUNT, num_bits)
            .iter()
            .any(|&pos| covering_node(nodes, pos).is_some())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_query(level: u32) -> SearchRequest {
        SearchRequest {
            level,
            term: TermQuery {
                epoch_key: [0u8; 32],
                state: [0u8; 32],
                count: 0,
                generation: 0,
                node_list: Vec::new(),
                cache_token: vec![1u8; 32],
            },
            xterms: Vec::new(),
            xtokens: Vec::new(),
        }
    }

    #[test]
    fn writes_require_initialisation() {
        let engine = ServerEngine::new();
        assert!(matches!(
            engine.add_entries("nope", MapKind::TMap, Vec::new()),
            Err(VeildexError::UninitializedDatabase)
        ));
    }

    #[test]
    fn search_on_unknown_database_is_empty() {
        let engine = ServerEngine::new();
        assert!(engine.search("nope", &empty_query(0)).unwrap().is_empty());
    }

    #[test]
    fn mismatched_tree_depth_is_rejected() {
        let engine = ServerEngine::new();
        engine.init_handler("db", 64);
        let level = {
            let num_bits = bloom_filter_size(FILTER_HASH_COUNT, 64, FILTER_FP_RATE);
            GgmTree::new(num_bits).level()
        };
        assert!(engine.search("db", &empty_query(level)).unwrap().is_empty());
        assert!(matches!(
            engine.search("db", &empty_query(level + 1)),
            Err(VeildexError::LevelMismatch)
        ));
    }

    #[test]
    fn reinitialisation_drops_stored_tuples() {
        let engine = ServerEngine::new();
        engine.init_handler("db", 64);
        let entry = IndexEntry {
            label: vec![7u8; 32],
            tag: vec![8u8; 32],
            chain: [0u8; 32],
            ciphertexts: vec![vec![0u8; 48]; FILTER_HASH_COUNT],
        };
        engine.add_entries("db", MapKind::TMap, vec![entry]).unwrap();
        engine.init_handler("db", 64);
        let instance = engine.instance("db").unwrap();
        assert!(instance.tmap.read().is_empty());
    }

    #[test]
    fn covering_node_respects_subtree_bounds() {
        let nodes = vec![GgmNode::new(2, 3), GgmNode::new(40, 0)];
        assert!(covering_node(&nodes, 16).is_some());
        assert!(covering_node(&nodes, 23).is_some());
        assert!(covering_node(&nodes, 24).is_none());
        assert!(covering_node(&nodes, 40).is_some());
        assert!(covering_node(&nodes, 41).is_none());
    }
}
