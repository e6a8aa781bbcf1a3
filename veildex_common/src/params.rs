//! Scheme-wide constants.

/// Symmetric cipher block, key and IV length in bytes (AES-128-CTR).
pub const BLOCK_LEN: usize = 16;
/// Digest length of the keyed and unkeyed hashes (SHA-256), also the length
/// of labels, tags and chain states.
pub const DIGEST_LEN: usize = 32;
/// Length of the master-key seed.
pub const SEED_BYTE_LEN: usize = 32;

/// Number of independent probes per item in a deletion filter. Each probe
/// position doubles as a leaf slot of the key-derivation tree, so every
/// index tuple carries this many ciphertexts.
pub const FILTER_HASH_COUNT: usize = 5;
/// Target false-positive rate of the deletion filters. Bounds the
/// probability that a still-valid tuple is spuriously treated as revoked.
pub const FILTER_FP_RATE: f64 = 1e-4;

/// Number of probes in the cross-tag filter reconstructed per search.
pub const XSET_HASH_COUNT: usize = 20;
/// Target false-positive rate of the cross-tag filter.
pub const XSET_FP_RATE: f64 = 1e-7;
/// Item-count estimate used to size the cross-tag filter.
pub const MAX_DB_SIZE: usize = 100_000;

/// Client-side insert batching threshold per logical map.
pub const BATCH_SIZE: usize = 128;

/// Upper bound on a single wire frame; anything larger terminates the
/// connection instead of allocating.
pub const MAX_FRAME_LEN: usize = 1 << 28;

/// Bit-array size for a filter with `num_probes` probes holding up to
/// `num_items` items at false-positive rate `fp_rate`:
/// `ceil(-n*k / ln(1 - exp(ln(fp)/k)))`.
pub fn bloom_filter_size(num_probes: usize, num_items: usize, fp_rate: f64) -> u64 {
    let k = num_probes.max(1) as f64;
    let n = num_items.max(1) as f64;
    (-(n * k) / (1.0 - (fp_rate.ln() / k).exp()).ln()).ceil() as u64
}
