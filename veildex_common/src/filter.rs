//! Fixed-size probabilistic set-membership filter.
//!
//! The same structure serves two roles: the client keeps one per keyword as
//! a pending-deletion marker whose probe positions select key-derivation
//! leaves, and the server reconstructs one per search as the cross-tag
//! predicate index. Sizing follows `ceil(-n*k / ln(1 - exp(ln(fp)/k)))`.

use serde::{Deserialize, Serialize};

use crate::crypto::sha256;
use crate::params::bloom_filter_size;

/// Probe positions for `item` in a filter of `num_bits` bits.
///
/// Positions are returned sorted; duplicates are kept so callers that pair
/// one value with each probe slot always see exactly `num_probes` entries.
pub fn probe_positions(item: &[u8], num_probes: usize, num_bits: u64) -> Vec<u64> {
    let digest = sha256(&[item]);
    let mut words = [0u64; 4];
    for (i, word) in words.iter_mut().enumerate() {
        *word = u64::from_le_bytes(digest[i * 8..(i + 1) * 8].try_into().unwrap());
    }

    let mut positions = Vec::with_capacity(num_probes);
    for probe in 0..num_probes as u64 {
        let mut acc = murmur64(probe.wrapping_add(0x9e37_79b9_7f4a_7c15));
        for word in words {
            acc = murmur64(acc ^ word);
        }
        positions.push(acc % num_bits);
    }

    positions.sort_unstable();
    positions
}

const fn murmur64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BloomFilter {
    num_bits: u64,
    num_probes: usize,
    bits: Vec<u64>,
}

impl BloomFilter {
    pub fn new(num_bits: u64, num_probes: usize) -> BloomFilter {
        let words = num_bits.div_ceil(64) as usize;
        BloomFilter {
            num_bits,
            num_probes,
            bits: vec![0u64; words],
        }
    }

    /// Sizes the bit array for `num_items` items at `fp_rate`.
    pub fn with_rate(num_probes: usize, num_items: usize, fp_rate: f64) -> BloomFilter {
        BloomFilter::new(bloom_filter_size(num_probes, num_items, fp_rate), num_probes)
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_probes(&self) -> usize {
        self.num_probes
    }

    /// Probe positions for `item` under this filter's geometry.
    pub fn positions(&self, item: &[u8]) -> Vec<u64> {
        probe_positions(item, self.num_probes, self.num_bits)
    }

    pub fn add(&mut self, item: &[u8]) {
        for pos in self.positions(item) {
            self.bits[(pos / 64) as usize] |= 1 << (pos % 64);
        }
    }

    pub fn might_contain(&self, item: &[u8]) -> bool {
        self.positions(item)
            .iter()
            .all(|pos| self.bits[(pos / 64) as usize] & (1 << (pos % 64)) != 0)
    }

    /// Clears every bit, returning the filter to its empty state.
    pub fn reset(&mut self) {
        self.bits.fill(0);
    }

    /// Ascending indices of all set bits.
    pub fn set_positions(&self) -> Vec<u64> {
        let mut out = Vec::new();
        for (word_idx, word) in self.bits.iter().enumerate() {
            let mut w = *word;
            while w != 0 {
                let bit = w.trailing_zeros() as u64;
                out.push(word_idx as u64 * 64 + bit);
                w &= w - 1;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(5, 100, 1e-4)]
    #[test_case(20, 1_000, 1e-7)]
    fn no_false_negatives(probes: usize, items: usize, fp: f64) {
        let mut filter = BloomFilter::with_rate(probes, items, fp);
        for i in 0..items {
            filter.add(format!("item-{i}").as_bytes());
        }
        for i in 0..items {
            assert!(filter.might_contain(format!("item-{i}").as_bytes()));
        }
    }

    #[test]
    fn absent_items_mostly_rejected() {
        let mut filter = BloomFilter::with_rate(5, 100, 1e-4);
        for i in 0..100 {
            filter.add(format!("present-{i}").as_bytes());
        }
        let hits = (0..1_000)
            .filter(|i| filter.might_contain(format!("absent-{i}").as_bytes()))
            .count();
        assert!(hits < 5, "false positives well above target rate: {hits}");
    }

    #[test]
    fn positions_are_sorted_and_exact_count() {
        let filter = BloomFilter::with_rate(5, 100, 1e-4);
        let pos = filter.positions(b"some item");
        assert_eq!(pos.len(), 5);
        assert!(pos.windows(2).all(|w| w[0] <= w[1]));
        assert!(pos.iter().all(|&p| p < filter.num_bits()));
    }

    #[test]
    fn set_positions_match_added_items() {
        let mut filter = BloomFilter::new(256, 3);
        filter.add(b"alpha");
        filter.add(b"beta");

        let set: Vec<u64> = filter.set_positions();
        for pos in filter.positions(b"alpha") {
            assert!(set.contains(&pos));
        }
        for pos in filter.positions(b"beta") {
            assert!(set.contains(&pos));
        }
        assert!(set.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn reset_clears_membership() {
        let mut filter = BloomFilter::with_rate(5, 10, 1e-4);
        filter.add(b"gone");
        assert!(filter.might_contain(b"gone"));
        filter.reset();
        assert!(!filter.might_contain(b"gone"));
        assert!(filter.set_positions().is_empty());
    }
}
