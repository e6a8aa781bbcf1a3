//! Length-prefixed MessagePack command protocol.
//!
//! Every frame is a 4-byte big-endian length followed by a MessagePack map.
//! Requests carry their command name under the `cmd` key; responses are a
//! `status`/`error` map or a bare array of result blobs.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::VeildexError;
use crate::ggm::GgmNode;
use crate::params::MAX_FRAME_LEN;

/// Which of a logical database's two maps a write targets: the postings map
/// keyed by chained labels, or the cross-tag map keyed by blinded tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapKind {
    TMap,
    XMap,
}

/// One encrypted index tuple as stored by the server.
#[derive(Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Pseudorandom storage address derived from the hidden chain state.
    pub label: Vec<u8>,
    /// Per-(keyword, id) tag, addressing the tuple in deletion filters.
    pub tag: Vec<u8>,
    /// Previous chain state XORed with the label, letting the server walk
    /// backwards once the newest state is disclosed.
    pub chain: [u8; 32],
    /// One ciphertext per filter probe position, each sealed under the
    /// key-derivation leaf at that position.
    pub ciphertexts: Vec<Vec<u8>>,
}

/// Per-term search material: the epoch key and newest chain state to walk
/// from, plus the disclosed subtree roots that decrypt still-valid tuples.
#[derive(Clone, Serialize, Deserialize)]
pub struct TermQuery {
    pub epoch_key: [u8; 32],
    pub state: [u8; 32],
    pub count: u32,
    pub generation: u32,
    pub node_list: Vec<GgmNode>,
    /// Stable per-(keyword, role) handle for the server's result cache.
    pub cache_token: Vec<u8>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Tree depth the disclosed nodes were derived for.
    pub level: u32,
    /// The primary (least-frequent) term, walked in the postings map.
    pub term: TermQuery,
    /// Remaining conjuncts, walked in the cross-tag map.
    pub xterms: Vec<TermQuery>,
    /// `xtokens[g][j][i]`: the blinded predicate element for update `j` of
    /// the primary term's generation `g` against cross-term `i`.
    pub xtokens: Vec<Vec<Vec<[u8; 32]>>>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    InitHandler {
        db: String,
        ggm_size: u64,
    },
    AddEntries {
        db: String,
        map: MapKind,
        entry: IndexEntry,
    },
    AddEntriesBatch {
        db: String,
        map: MapKind,
        entries: Vec<IndexEntry>,
    },
    Search {
        db: String,
        query: SearchRequest,
    },
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Status { status: String },
    Error { error: String },
    Results(Vec<Vec<u8>>),
}

impl Response {
    pub fn ok() -> Response {
        Response::Status {
            status: "ok".to_string(),
        }
    }

    pub fn error(msg: impl Into<String>) -> Response {
        Response::Error { error: msg.into() }
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, VeildexError> {
    rmp_serde::to_vec_named(value).map_err(|e| VeildexError::Encode(e.to_string()))
}

pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, VeildexError> {
    rmp_serde::from_slice(bytes).map_err(|e| VeildexError::Decode(e.to_string()))
}

/// Writes one length-prefixed frame.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), VeildexError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(VeildexError::FrameTooLarge(payload.len()));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Reads one length-prefixed frame. `Ok(None)` means the peer closed the
/// connection cleanly at a frame boundary.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, VeildexError> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(VeildexError::Protocol("truncated frame header".into()));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(VeildexError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}
