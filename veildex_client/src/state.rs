//! Per-keyword client state.
//!
//! For each keyword the client tracks two independent chains, one per map
//! role: the newest hidden chain state, the update count of every
//! generation so far, and the deletion filter of the current generation.
//! Searching a role commits it: the filter resets, a fresh generation
//! starts and the chain head is zeroed.

use veildex_common::filter::BloomFilter;
use veildex_common::params::{DIGEST_LEN, FILTER_HASH_COUNT};

pub(crate) struct RoleState {
    /// Deletion marks of the current generation; probe positions of a
    /// marked tag select the derivation-tree leaves withheld at search.
    pub filter: BloomFilter,
    /// Update count per generation; the last entry is the live one.
    pub generations: Vec<u32>,
    /// Newest chain state, all-zero before the first update of a
    /// generation.
    pub state: [u8; DIGEST_LEN],
}

impl RoleState {
    pub fn new(num_bits: u64) -> RoleState {
        RoleState {
            filter: BloomFilter::new(num_bits, FILTER_HASH_COUNT),
            generations: vec![0],
            state: [0u8; DIGEST_LEN],
        }
    }

    pub fn generation(&self) -> u32 {
        (self.generations.len() - 1) as u32
    }

    pub fn count(&self) -> u32 {
        self.generations.last().copied().unwrap_or(0)
    }

    pub fn bump(&mut self) {
        if let Some(count) = self.generations.last_mut() {
            *count += 1;
        }
    }

    /// Starts the next generation after its material has been disclosed.
    pub fn commit(&mut self) {
        self.filter.reset();
        self.generations.push(0);
        self.state = [0u8; DIGEST_LEN];
    }
}

pub(crate) struct KeywordState {
    pub postings: RoleState,
    pub cross: RoleState,
}

impl KeywordState {
    pub fn new(num_bits: u64) -> KeywordState {
        KeywordState {
            postings: RoleState::new(num_bits),
            cross: RoleState::new(num_bits),
        }
    }
}
