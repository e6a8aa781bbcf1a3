//! GGM key-derivation tree.
//!
//! A binary tree whose leaf keys encrypt individual index tuples. Children
//! are derived from a parent by HMAC-SHA-256 keyed with the parent, over a
//! single direction byte, truncated to the cipher key length. Disclosing an
//! internal node discloses exactly the leaves below it, which is what makes
//! per-entry revocation work: the client discloses the minimal set of
//! subtree roots covering the still-valid leaves and withholds the rest.

use serde::{Deserialize, Serialize};

use crate::crypto::hmac_digest;
use crate::params::BLOCK_LEN;

/// A disclosed subtree root. `level` counts edges down to the leaves, so a
/// leaf has `level == 0` and `index` is its leaf offset; a node at level `l`
/// covers leaves `index << l .. (index + 1) << l`.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct GgmNode {
    pub index: u64,
    pub level: u32,
    pub key: [u8; BLOCK_LEN],
}

impl GgmNode {
    pub fn new(index: u64, level: u32) -> GgmNode {
        GgmNode {
            index,
            level,
            key: [0u8; BLOCK_LEN],
        }
    }
}

/// Tree geometry; the root key itself lives with the caller.
#[derive(Clone, Copy)]
pub struct GgmTree {
    level: u32,
}

impl GgmTree {
    /// A tree deep enough to hold `leaf_count` leaves.
    pub fn new(leaf_count: u64) -> GgmTree {
        GgmTree {
            level: leaf_count.max(2).next_power_of_two().trailing_zeros(),
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Derives the key of the node at `to_level` on the path to leaf
    /// `offset`, starting from a node key at `from_level`. `offset` is
    /// expressed in leaf units throughout, so derivation composes: root to
    /// node then node to leaf equals root to leaf.
    pub fn derive_key(
        key: &[u8; BLOCK_LEN],
        offset: u64,
        from_level: u32,
        to_level: u32,
    ) -> [u8; BLOCK_LEN] {
        let mut current = *key;
        for lvl in (to_level..from_level).rev() {
            let bit = ((offset >> lvl) & 1) as u8;
            let digest = hmac_digest(&current, &[&[bit]]);
            current.copy_from_slice(&digest[..BLOCK_LEN]);
        }
        current
    }

    /// Minimal set of subtree roots covering exactly the given leaves.
    ///
    /// Keys are not filled in; callers derive them afterwards. Merging is
    /// purely structural: two siblings collapse into their parent, repeated
    /// level by level until no pair remains.
    pub fn min_coverage(leaves: &[GgmNode]) -> Vec<GgmNode> {
        let mut out = Vec::new();
        let mut current: Vec<GgmNode> = leaves.to_vec();
        current.sort_unstable_by_key(|n| n.index);

        while current.len() > 1 {
            let mut next = Vec::new();
            let mut i = 0;
            while i < current.len() {
                let node = current[i];
                let paired = i + 1 < current.len()
                    && node.index % 2 == 0
                    && current[i + 1].index == node.index + 1;
                if paired {
                    next.push(GgmNode::new(node.index >> 1, node.level + 1));
                    i += 2;
                } else {
                    out.push(node);
                    i += 1;
                }
            }
            current = next;
        }
        out.extend(current);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_depth_matches_leaf_count() {
        assert_eq!(GgmTree::new(2).level(), 1);
        assert_eq!(GgmTree::new(8).level(), 3);
        assert_eq!(GgmTree::new(9).level(), 4);
        // degenerate counts still get a usable tree
        assert_eq!(GgmTree::new(0).level(), 1);
        assert_eq!(GgmTree::new(1).level(), 1);
    }

    #[test]
    fn derivation_composes() {
        let root = [7u8; BLOCK_LEN];
        let offset = 0b101u64;

        let direct = GgmTree::derive_key(&root, offset, 3, 0);
        let mid = GgmTree::derive_key(&root, offset, 3, 1);
        let via_mid = GgmTree::derive_key(&mid, offset, 1, 0);
        assert_eq!(direct, via_mid);
    }

    #[test]
    fn sibling_leaves_get_distinct_keys() {
        let root = [9u8; BLOCK_LEN];
        let left = GgmTree::derive_key(&root, 4, 3, 0);
        let right = GgmTree::derive_key(&root, 5, 3, 0);
        assert_ne!(left, right);
    }

    #[test]
    fn coverage_of_all_leaves_is_the_root() {
        let leaves: Vec<GgmNode> = (0..8).map(|i| GgmNode::new(i, 0)).collect();
        let cover = GgmTree::min_coverage(&leaves);
        assert_eq!(cover.len(), 1);
        assert_eq!(cover[0].index, 0);
        assert_eq!(cover[0].level, 3);
    }

    #[test]
    fn coverage_of_no_leaves_is_empty() {
        assert!(GgmTree::min_coverage(&[]).is_empty());
    }

    #[test]
    fn coverage_skips_revoked_leaves() {
        // leaves {0,1,3,5,6,7} of an 8-leaf tree: {0,1} merge, 3 and 5 stay
        // single, {6,7} merge; nothing merges further.
        let leaves: Vec<GgmNode> = [0u64, 1, 3, 5, 6, 7]
            .iter()
            .map(|&i| GgmNode::new(i, 0))
            .collect();
        let mut cover = GgmTree::min_coverage(&leaves);
        cover.sort_unstable_by_key(|n| (n.level, n.index));

        let shape: Vec<(u64, u32)> = cover.iter().map(|n| (n.index, n.level)).collect();
        assert_eq!(shape, vec![(3, 0), (5, 0), (0, 1), (3, 1)]);
    }

    #[test]
    fn covered_leaf_keys_match_direct_derivation() {
        let root = [3u8; BLOCK_LEN];
        let tree = GgmTree::new(8);

        let leaves: Vec<GgmNode> = [0u64, 1, 3].iter().map(|&i| GgmNode::new(i, 0)).collect();
        for mut node in GgmTree::min_coverage(&leaves) {
            let base = node.index << node.level;
            node.key = GgmTree::derive_key(&root, base, tree.level(), node.level);
            for leaf in base..base + (1u64 << node.level) {
                let via_node = GgmTree::derive_key(&node.key, leaf, node.level, 0);
                let direct = GgmTree::derive_key(&root, leaf, tree.level(), 0);
                assert_eq!(via_node, direct, "leaf {leaf}");
            }
        }
    }
}
