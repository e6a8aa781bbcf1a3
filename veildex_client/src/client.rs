//! The index client: encrypts updates, issues search tokens and decrypts
//! results.
//!
//! Every `(keyword, id)` insertion produces two tuples, one per map role.
//! The postings tuple carries the sealed id plus the inverse-blinded id
//! scalar; the cross-tag tuple carries the blinded group element that the
//! server unblinds while walking. Both are sealed once per filter probe
//! position under the matching derivation-tree leaf, so a later deletion
//! revokes them by withholding exactly those leaves.

use std::collections::HashMap;

use curve25519_dalek::scalar::Scalar;
use tracing::{debug, warn};

use veildex_common::crypto::{
    base_point_mul, ctr_decrypt, ctr_encrypt, hash_scalar, hmac_digest, point_to_bytes,
    random_bytes, sha256, xor_digest,
};
use veildex_common::filter::probe_positions;
use veildex_common::ggm::{GgmNode, GgmTree};
use veildex_common::params::{
    bloom_filter_size, BATCH_SIZE, DIGEST_LEN, FILTER_FP_RATE, FILTER_HASH_COUNT, SEED_BYTE_LEN,
};
use veildex_common::wire::{IndexEntry, MapKind, Request, Response, SearchRequest, TermQuery};
use veildex_common::VeildexError;

use crate::keys::{MasterKeys, Role};
use crate::state::{KeywordState, RoleState};
use crate::transport::ServerConn;

pub struct IndexClient<C: ServerConn> {
    conn: C,
    db: String,
    keys: MasterKeys,
    tree_level: u32,
    num_bits: u64,
    states: HashMap<String, KeywordState>,
    pending_postings: Vec<IndexEntry>,
    pending_cross: Vec<IndexEntry>,
}

impl<C: ServerConn> IndexClient<C> {
    /// Initialises (or re-initialises) the logical database `db` on the
    /// server. `capacity` bounds the deletions a keyword can absorb per
    /// generation and fixes the filter/tree geometry on both sides.
    pub fn new(
        conn: C,
        db: impl Into<String>,
        seed: &[u8; SEED_BYTE_LEN],
        capacity: usize,
    ) -> Result<IndexClient<C>, VeildexError> {
        let num_bits = bloom_filter_size(FILTER_HASH_COUNT, capacity, FILTER_FP_RATE);
        let mut client = IndexClient {
            conn,
            db: db.into(),
            keys: MasterKeys::from_seed(seed),
            tree_level: GgmTree::new(num_bits).level(),
            num_bits,
            states: HashMap::new(),
            pending_postings: Vec::new(),
            pending_cross: Vec::new(),
        };
        let request = Request::InitHandler {
            db: client.db.clone(),
            ggm_size: capacity as u64,
        };
        client.call_ok(request)?;
        Ok(client)
    }

    /// Adds `id` to the result set of `keyword`. The tuples are batched;
    /// call [`flush`](IndexClient::flush) to push a partial batch.
    pub fn insert(&mut self, keyword: &str, id: u64) -> Result<(), VeildexError> {
        let kw = keyword.as_bytes().to_vec();
        let tag = sha256(&[&kw, &id.to_le_bytes()]).to_vec();
        let state = self
            .states
            .entry(keyword.to_string())
            .or_insert_with(|| KeywordState::new(self.num_bits));

        let link = roll_chain(&self.keys, Role::Postings, &kw, &mut state.postings);
        let z = self.keys.update_scalar(&kw, link.generation, link.upd);
        let y = self.keys.index_scalar(id) * z.invert();
        let mut payload = ctr_encrypt(&self.keys.keyword_key(&kw), &id.to_le_bytes());
        payload.extend_from_slice(y.as_bytes());
        self.pending_postings.push(seal_tuple(
            &self.keys,
            Role::Postings,
            &kw,
            &link,
            &tag,
            &payload,
            self.num_bits,
            self.tree_level,
        ));

        let link = roll_chain(&self.keys, Role::CrossTag, &kw, &mut state.cross);
        let exponent = self.keys.cross_scalar(&kw)
            * self.keys.index_scalar(id)
            * hash_scalar(&[&link.new_state]).invert();
        let payload = point_to_bytes(&base_point_mul(&exponent));
        self.pending_cross.push(seal_tuple(
            &self.keys,
            Role::CrossTag,
            &kw,
            &link,
            &tag,
            &payload,
            self.num_bits,
            self.tree_level,
        ));

        if self.pending_postings.len() >= BATCH_SIZE {
            self.flush()?;
        }
        Ok(())
    }

    /// Removes `id` from the result set of `keyword`. Buffered inserts are
    /// flushed first so the server never sees effects out of order; the
    /// revocation itself stays local until the next search.
    pub fn delete(&mut self, keyword: &str, id: u64) -> Result<(), VeildexError> {
        self.flush()?;
        let tag = sha256(&[keyword.as_bytes(), &id.to_le_bytes()]);
        let state = self
            .states
            .entry(keyword.to_string())
            .or_insert_with(|| KeywordState::new(self.num_bits));
        state.postings.filter.add(&tag);
        state.cross.filter.add(&tag);
        Ok(())
    }

    /// Number of tuples buffered but not yet uploaded.
    pub fn pending_len(&self) -> usize {
        self.pending_postings.len() + self.pending_cross.len()
    }

    /// Pushes all pending tuples to the server.
    pub fn flush(&mut self) -> Result<(), VeildexError> {
        let postings = std::mem::take(&mut self.pending_postings);
        if !postings.is_empty() {
            let request = Request::AddEntriesBatch {
                db: self.db.clone(),
                map: MapKind::TMap,
                entries: postings,
            };
            self.call_ok(request)?;
        }
        let cross = std::mem::take(&mut self.pending_cross);
        if !cross.is_empty() {
            let request = Request::AddEntriesBatch {
                db: self.db.clone(),
                map: MapKind::XMap,
                entries: cross,
            };
            self.call_ok(request)?;
        }
        Ok(())
    }

    /// Conjunctive search: ids matching every keyword in `keywords`. The
    /// first keyword is walked in the postings map and should be the least
    /// frequent one; the rest only contribute membership predicates.
    ///
    /// Searching commits the disclosed chains, so a repeated search walks
    /// only the updates made in between.
    pub fn search(&mut self, keywords: &[&str]) -> Result<Vec<u64>, VeildexError> {
        let Some((&primary, xkeywords)) = keywords.split_first() else {
            return Ok(Vec::new());
        };
        self.flush()?;

        if !keywords.iter().all(|kw| self.states.contains_key(*kw)) {
            debug!(?keywords, "query names an unindexed keyword");
            return Ok(Vec::new());
        }

        let request = Request::Search {
            db: self.db.clone(),
            query: self.build_query(primary, xkeywords),
        };
        let results = match self.conn.call(&request)? {
            Response::Results(results) => results,
            Response::Error { error } => return Err(VeildexError::Remote(error)),
            Response::Status { .. } => return Err(VeildexError::UnexpectedResponse),
        };

        let kw_key = self.keys.keyword_key(primary.as_bytes());
        let mut ids = Vec::with_capacity(results.len());
        for blob in results {
            let plain = ctr_decrypt(&kw_key, &blob)?;
            match <[u8; 8]>::try_from(plain.as_slice()) {
                Ok(bytes) => ids.push(u64::from_le_bytes(bytes)),
                Err(_) => warn!(len = plain.len(), "discarding malformed result blob"),
            }
        }
        ids.sort_unstable();
        ids.dedup();

        // the disclosed chains are burnt; start fresh generations
        if let Some(state) = self.states.get_mut(primary) {
            state.postings.commit();
        }
        for kw in xkeywords {
            if let Some(state) = self.states.get_mut(*kw) {
                state.cross.commit();
            }
        }
        debug!(primary, conjuncts = xkeywords.len(), matches = ids.len(), "search done");
        Ok(ids)
    }

    fn build_query(&self, primary: &str, xkeywords: &[&str]) -> SearchRequest {
        let term = self
            .states
            .get(primary)
            .map(|s| build_term(&self.keys, primary.as_bytes(), Role::Postings, &s.postings, self.num_bits, self.tree_level))
            .unwrap_or_else(|| empty_term(&self.keys, primary.as_bytes(), Role::Postings));
        let xterms: Vec<TermQuery> = xkeywords
            .iter()
            .filter_map(|kw| {
                self.states.get(*kw).map(|s| {
                    build_term(&self.keys, kw.as_bytes(), Role::CrossTag, &s.cross, self.num_bits, self.tree_level)
                })
            })
            .collect();

        let mut xtokens = Vec::new();
        if !xkeywords.is_empty() {
            let cross: Vec<Scalar> = xkeywords
                .iter()
                .map(|kw| self.keys.cross_scalar(kw.as_bytes()))
                .collect();
            let counts = self
                .states
                .get(primary)
                .map(|s| s.postings.generations.clone())
                .unwrap_or_default();
            for (generation, count) in counts.iter().enumerate() {
                let mut rows = Vec::with_capacity(*count as usize);
                for upd in 0..*count {
                    let z = self
                        .keys
                        .update_scalar(primary.as_bytes(), generation as u32, upd);
                    rows.push(
                        cross
                            .iter()
                            .map(|x| point_to_bytes(&base_point_mul(&(z * x))))
                            .collect(),
                    );
                }
                xtokens.push(rows);
            }
        }

        SearchRequest {
            level: self.tree_level,
            term,
            xterms,
            xtokens,
        }
    }

    fn call_ok(&mut self, request: Request) -> Result<(), VeildexError> {
        match self.conn.call(&request)? {
            Response::Status { .. } => Ok(()),
            Response::Error { error } => Err(VeildexError::Remote(error)),
            Response::Results(_) => Err(VeildexError::UnexpectedResponse),
        }
    }
}

struct ChainLink {
    generation: u32,
    upd: u32,
    label: [u8; DIGEST_LEN],
    chain: [u8; DIGEST_LEN],
    new_state: [u8; DIGEST_LEN],
}

/// Advances a role's label chain by one hidden state.
fn roll_chain(keys: &MasterKeys, role: Role, keyword: &[u8], state: &mut RoleState) -> ChainLink {
    let generation = state.generation();
    let upd = state.count();
    let epoch_key = keys.epoch_key(keyword, role, generation);
    let new_state = random_bytes::<DIGEST_LEN>();
    let label = hmac_digest(&epoch_key, &[&new_state]);
    let chain = xor_digest(&label, &state.state);
    state.state = new_state;
    state.bump();
    ChainLink {
        generation,
        upd,
        label,
        chain,
        new_state,
    }
}

/// Seals `payload` once per probe position of `tag`, each copy under the
/// derivation-tree leaf at that position.
#[allow(clippy::too_many_arguments)]
fn seal_tuple(
    keys: &MasterKeys,
    role: Role,
    keyword: &[u8],
    link: &ChainLink,
    tag: &[u8],
    payload: &[u8],
    num_bits: u64,
    tree_level: u32,
) -> IndexEntry {
    let root = keys.tree_root(keyword, role, link.generation);
    let ciphertexts = probe_positions(tag, FILTER_HASH_COUNT, num_bits)
        .iter()
        .map(|&pos| {
            let leaf = GgmTree::derive_key(&root, pos, tree_level, 0);
            ctr_encrypt(&leaf, payload)
        })
        .collect();
    IndexEntry {
        label: link.label.to_vec(),
        tag: tag.to_vec(),
        chain: link.chain,
        ciphertexts,
    }
}

/// Search material for one role of one keyword: the current epoch key and
/// chain head, plus keys for the minimal subtree cover of every filter
/// position not marked deleted.
fn build_term(
    keys: &MasterKeys,
    keyword: &[u8],
    role: Role,
    state: &RoleState,
    num_bits: u64,
    tree_level: u32,
) -> TermQuery {
    let generation = state.generation();
    let deleted = state.filter.set_positions();
    let mut leaves = Vec::with_capacity((num_bits as usize).saturating_sub(deleted.len()));
    let mut deleted = deleted.iter().peekable();
    for pos in 0..num_bits {
        if deleted.peek() == Some(&&pos) {
            deleted.next();
            continue;
        }
        leaves.push(GgmNode::new(pos, 0));
    }

    let root = keys.tree_root(keyword, role, generation);
    let mut node_list = GgmTree::min_coverage(&leaves);
    for node in &mut node_list {
        node.key = GgmTree::derive_key(&root, node.index << node.level, tree_level, node.level);
    }

    TermQuery {
        epoch_key: keys.epoch_key(keyword, role, generation),
        state: state.state,
        count: state.count(),
        generation,
        node_list,
        cache_token: keys.cache_token(keyword, role),
    }
}

fn empty_term(keys: &MasterKeys, keyword: &[u8], role: Role) -> TermQuery {
    TermQuery {
        epoch_key: keys.epoch_key(keyword, role, 0),
        state: [0u8; DIGEST_LEN],
        count: 0,
        generation: 0,
        node_list: Vec::new(),
        cache_token: keys.cache_token(keyword, role),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every request and answers with canned responses.
    struct MockConn {
        requests: Vec<Request>,
    }

    impl MockConn {
        fn new() -> MockConn {
            MockConn {
                requests: Vec::new(),
            }
        }
    }

    impl ServerConn for MockConn {
        fn call(&mut self, request: &Request) -> Result<Response, VeildexError> {
            self.requests.push(request.clone());
            match request {
                Request::Search { .. } => Ok(Response::Results(Vec::new())),
                _ => Ok(Response::ok()),
            }
        }
    }

    fn client() -> IndexClient<MockConn> {
        IndexClient::new(MockConn::new(), "db", &[3u8; SEED_BYTE_LEN], 64).unwrap()
    }

    #[test]
    fn init_is_sent_on_construction() {
        let client = client();
        assert!(matches!(
            client.conn.requests.as_slice(),
            [Request::InitHandler { db, ggm_size: 64 }] if db == "db"
        ));
    }

    #[test]
    fn inserts_batch_until_threshold() {
        let mut client = client();
        for id in 0..(BATCH_SIZE as u64 - 1) {
            client.insert("w", id).unwrap();
        }
        // init only, nothing flushed yet
        assert_eq!(client.conn.requests.len(), 1);

        client.insert("w", BATCH_SIZE as u64).unwrap();
        let maps: Vec<MapKind> = client.conn.requests[1..]
            .iter()
            .map(|r| match r {
                Request::AddEntriesBatch { map, entries, .. } => {
                    assert_eq!(entries.len(), BATCH_SIZE);
                    *map
                }
                _ => panic!("expected a batch upload"),
            })
            .collect();
        assert_eq!(maps, vec![MapKind::TMap, MapKind::XMap]);
        assert_eq!(client.pending_len(), 0);
    }

    #[test]
    fn tuples_carry_one_ciphertext_per_probe() {
        let mut client = client();
        client.insert("w", 7).unwrap();
        let entry = &client.pending_postings[0];
        assert_eq!(entry.ciphertexts.len(), FILTER_HASH_COUNT);
        assert_eq!(entry.label.len(), DIGEST_LEN);
        assert_eq!(entry.tag.len(), DIGEST_LEN);
    }

    #[test]
    fn delete_flushes_pending_inserts() {
        let mut client = client();
        client.insert("w", 1).unwrap();
        assert_eq!(client.pending_len(), 2);
        client.delete("w", 2).unwrap();
        assert_eq!(client.pending_len(), 0);
        assert_eq!(client.conn.requests.len(), 3); // init + two batches
    }

    #[test]
    fn search_flushes_pending_updates_first() {
        let mut client = client();
        client.insert("w", 1).unwrap();
        client.search(&["w"]).unwrap();

        let kinds: Vec<&'static str> = client
            .conn
            .requests
            .iter()
            .map(|r| match r {
                Request::InitHandler { .. } => "init",
                Request::AddEntries { .. } | Request::AddEntriesBatch { .. } => "add",
                Request::Search { .. } => "search",
            })
            .collect();
        assert_eq!(kinds, vec!["init", "add", "add", "search"]);
    }

    #[test]
    fn search_commits_the_disclosed_roles() {
        let mut client = client();
        client.insert("a", 1).unwrap();
        client.insert("b", 1).unwrap();
        client.search(&["a", "b"]).unwrap();

        let a = &client.states["a"];
        let b = &client.states["b"];
        assert_eq!(a.postings.generation(), 1);
        assert_eq!(a.cross.generation(), 0);
        assert_eq!(b.cross.generation(), 1);
        assert_eq!(b.postings.generation(), 0);
    }

    #[test]
    fn unknown_keyword_short_circuits() {
        let mut client = client();
        client.insert("known", 1).unwrap();
        assert!(client.search(&["missing"]).unwrap().is_empty());
        assert!(client.search(&["known", "missing"]).unwrap().is_empty());
        assert!(!client
            .conn
            .requests
            .iter()
            .any(|r| matches!(r, Request::Search { .. })));
    }

    #[test]
    fn xtokens_cover_every_generation() {
        let mut client = client();
        client.insert("a", 1).unwrap();
        client.insert("a", 2).unwrap();
        client.insert("b", 1).unwrap();
        client.search(&["a"]).unwrap();
        client.insert("a", 3).unwrap();
        client.flush().unwrap();

        let query = client.build_query("a", &["b"]);
        // generation 0 had two updates, generation 1 has one
        assert_eq!(query.xtokens.len(), 2);
        assert_eq!(query.xtokens[0].len(), 2);
        assert_eq!(query.xtokens[1].len(), 1);
        assert_eq!(query.xtokens[0][0].len(), 1);
        assert_eq!(query.term.generation, 1);
        assert_eq!(query.term.count, 1);
    }

    #[test]
    fn deletion_shrinks_the_disclosed_cover() {
        let mut client = client();
        client.insert("w", 1).unwrap();
        let full = client.build_query("w", &[]);
        client.delete("w", 1).unwrap();
        let pruned = client.build_query("w", &[]);

        let covered = |q: &SearchRequest| -> u64 {
            q.term
                .node_list
                .iter()
                .map(|n| 1u64 << n.level)
                .sum()
        };
        assert_eq!(covered(&full), client.num_bits);
        let marked = client.states["w"].postings.filter.set_positions().len() as u64;
        assert!(marked > 0);
        assert_eq!(covered(&pruned), client.num_bits - marked);
    }
}
