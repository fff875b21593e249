/*!
A fast, non-cryptographic 32-bit hash in the Murmur family.

This single hash function backs both the Bloom filter probes and the guard-selection predicate,
so its distribution quality directly affects guard spacing.
*/

use integer_encoding::FixedInt;

/// The multiplier used when mixing words into the hash state.
const MULTIPLIER: u32 = 0xc6a4_a793;

/// Generate a 32-bit hash of `data` using the provided seed.
pub(crate) fn hash32(data: &[u8], seed: u32) -> u32 {
    let rotation_factor: u32 = 24;
    let length = data.len();
    let mut hash: u32 = seed ^ (length as u32).wrapping_mul(MULTIPLIER);

    // Mix in the input four bytes at a time
    let mut idx: usize = 0;
    while idx + 4 <= length {
        let word = u32::decode_fixed(&data[idx..idx + 4]);
        hash = hash.wrapping_add(word);
        hash = hash.wrapping_mul(MULTIPLIER);
        hash ^= hash >> 16;

        idx += 4;
    }

    // Mix in the remaining bytes. There are at most 3 since full words were consumed above.
    let left_over = length - idx;
    let remaining = &data[idx..];
    if left_over == 3 {
        hash = hash.wrapping_add((remaining[2] as u32) << 16);
    }

    if left_over >= 2 {
        hash = hash.wrapping_add((remaining[1] as u32) << 8);
    }

    if left_over >= 1 {
        hash = hash.wrapping_add(remaining[0] as u32);
        hash = hash.wrapping_mul(MULTIPLIER);
        hash ^= hash >> rotation_factor;
    }

    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic() {
        let data = b"the quick brown fox";
        assert_eq!(hash32(data, 0xbc9f_1d34), hash32(data, 0xbc9f_1d34));
    }

    #[test]
    fn different_seeds_produce_different_hashes() {
        let data = b"the quick brown fox";
        assert_ne!(hash32(data, 1), hash32(data, 2));
    }

    #[test]
    fn handles_inputs_shorter_than_a_word() {
        // Just ensure none of the tail paths panic
        for len in 0..4 {
            let data = vec![0xab_u8; len];
            hash32(&data, 0xbc9f_1d34);
        }
    }
}
