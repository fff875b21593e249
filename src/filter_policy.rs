/*!
This module provides a common interface for filter policies that can be provided at database
startup. A filter policy builds a small membership filter from a set of keys; the filter is
stored in table files and consulted during reads to skip tables that cannot contain a key.

CairnDB attaches one filter to each table file. The guarded level structure keeps individual
files small, so a file-level filter gives nearly the same selectivity as per-block filters at a
fraction of the bookkeeping.
*/

use crate::utils::hash::hash32;

/// The seed used when hashing keys into a Bloom filter.
const BLOOM_HASH_SEED: u32 = 0xbc9f_1d34;

/// Trait to be implemented by filter generating structures for use with CairnDB.
pub trait FilterPolicy: Send + Sync {
    /**
    The name of the filter policy.

    The name is recorded on disk alongside each filter. If the serialization of the filter
    changes in any way, the name returned by this method must change with it, otherwise
    incompatible filters may be handed to [`FilterPolicy::key_may_match`].
    */
    fn name(&self) -> &'static str;

    /**
    Create a filter for the provided set of keys.

    The key set may contain duplicates. Returns a serialized filter suitable for storage in a
    table file.
    */
    fn create_filter(&self, keys: &[Vec<u8>]) -> Vec<u8>;

    /**
    Returns true if `key` may be in the set the filter was built from.

    # Invariants

    1. Must return true if the key was in the set used to create the filter.
    1. May return true or false for keys not in the set, but should return false with high
       probability.
    */
    fn key_may_match(&self, key: &[u8], serialized_filter: &[u8]) -> bool;
}

/// A Bloom filter based filter policy.
pub struct BloomFilterPolicy {
    /**
    A sizing factor growing the filter by this many bits per key in the seed set.

    10 bits per key yields a filter with roughly a 1% false positive rate.
    */
    bits_per_key: usize,

    /**
    The number of probes used for insertion and checking.

    Derived as `bits_per_key * ln(2)`, clamped to [1, 30].
    */
    num_probes: usize,
}

/// Public methods
impl BloomFilterPolicy {
    /// Create a new instance of [`BloomFilterPolicy`].
    pub fn new(bits_per_key: usize) -> Self {
        // ln(2) is approximately 0.69
        let num_probes = ((bits_per_key as f64 * 0.69).floor() as usize).clamp(1, 30);

        Self {
            bits_per_key,
            num_probes,
        }
    }
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &'static str {
        "cairndb.BloomFilter"
    }

    /**
    Create a Bloom filter for the provided keys.

    Double hashing simulates a sequence of hash functions from a single base hash: successive
    probe positions are produced by repeatedly adding a rotated delta of the initial hash.

    The returned buffer layout is:

    1. One byte holding the number of probes used
    1. The filter bit vector
    */
    fn create_filter(&self, keys: &[Vec<u8>]) -> Vec<u8> {
        let num_keys = keys.len();

        let mut filter_size_bits = num_keys * self.bits_per_key;
        if filter_size_bits < 64 {
            // Very small seed sets would otherwise produce filters with high false positive
            // rates
            filter_size_bits = 64;
        }

        // Round up to a whole number of bytes
        let filter_size_bytes = (filter_size_bits + 7) / 8;
        filter_size_bits = filter_size_bytes * 8;

        let mut bits: Vec<u8> = vec![0; filter_size_bytes];
        for key in keys {
            let mut hash = hash32(key, BLOOM_HASH_SEED);
            let delta: u32 = hash.rotate_right(17);
            for _ in 0..self.num_probes {
                let bit_position = hash % (filter_size_bits as u32);
                bits[(bit_position / 8) as usize] |= 1 << (bit_position % 8);

                hash = hash.wrapping_add(delta);
            }
        }

        let mut serialized = Vec::with_capacity(1 + bits.len());
        serialized.push(self.num_probes as u8);
        serialized.extend(bits);

        serialized
    }

    fn key_may_match(&self, key: &[u8], serialized_filter: &[u8]) -> bool {
        if serialized_filter.len() < 2 {
            // Treat malformed filters as a match so that a bad filter can never hide data
            return true;
        }

        let num_probes = serialized_filter[0] as usize;
        if num_probes > 30 {
            // Reserved for future encodings; match everything
            return true;
        }

        let bits = &serialized_filter[1..];
        let filter_size_bits = (bits.len() * 8) as u32;

        let mut hash = hash32(key, BLOOM_HASH_SEED);
        let delta: u32 = hash.rotate_right(17);
        for _ in 0..num_probes {
            let bit_position = hash % filter_size_bits;
            if bits[(bit_position / 8) as usize] & (1 << (bit_position % 8)) == 0 {
                return false;
            }

            hash = hash.wrapping_add(delta);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_used_to_build_a_filter_always_match() {
        let policy = BloomFilterPolicy::new(10);
        let keys: Vec<Vec<u8>> = (0..1000_u64)
            .map(|n| n.to_string().into_bytes())
            .collect();

        let filter = policy.create_filter(&keys);

        for key in &keys {
            assert!(policy.key_may_match(key, &filter));
        }
    }

    #[test]
    fn most_absent_keys_do_not_match() {
        let policy = BloomFilterPolicy::new(10);
        let keys: Vec<Vec<u8>> = (0..1000_u64)
            .map(|n| n.to_string().into_bytes())
            .collect();
        let filter = policy.create_filter(&keys);

        let mut false_positives = 0;
        for n in 10_000..11_000_u64 {
            if policy.key_may_match(n.to_string().as_bytes(), &filter) {
                false_positives += 1;
            }
        }

        // 10 bits per key targets ~1%; allow generous slack to keep the test stable
        assert!(
            false_positives < 50,
            "Expected a low false positive rate but got {false_positives}/1000."
        );
    }

    #[test]
    fn an_empty_filter_matches_nothing_but_stays_well_formed() {
        let policy = BloomFilterPolicy::new(10);
        let filter = policy.create_filter(&[]);

        assert!(!policy.key_may_match(b"anything", &filter));
    }
}
