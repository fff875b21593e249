/*!
Guards partition each level of the tree into disjoint key ranges.

A guard is a user key chosen deterministically by a hash predicate: a key qualifies as a guard
at a level when the low `bits(level)` bits of its 32-bit hash are all ones, with `bits`
shrinking as levels get deeper. The predicate makes guard choice a pure function of the data,
and its nesting (fewer required bits at deeper levels) means a guard at one level is a guard at
every deeper level.

A level with guards `g_0 < g_1 < ... < g_n` is partitioned into the *sentinel* range
`(-inf, g_0)` plus the half-open ranges `[g_i, g_{i+1})` and `[g_n, +inf)`. Files are assigned
to exactly one partition by their smallest key.

Guards move through two states: a *complete* guard is a candidate discovered while writing keys
out during a flush or compaction; a *committed* guard has been installed into a version via a
manifest edit and actually partitions files. Commitment is deferred until a file lands in the
guard's partition so that guards that would split no data are never created.
*/

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::{self, MAX_NUM_LEVELS};
use crate::utils::hash::hash32;
use crate::versioning::file_metadata::FileMetadata;

/// The seed used when hashing keys for the guard predicate.
const GUARD_HASH_SEED: u32 = 0xc7a4_61bd;

/// A user key acting as a partition boundary at some level.
#[derive(Clone, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub(crate) struct GuardKey {
    /// The user key at which the partition starts (inclusive).
    user_key: Vec<u8>,
}

/// Crate-only methods
impl GuardKey {
    /// Create a new instance of [`GuardKey`].
    pub(crate) fn new(user_key: Vec<u8>) -> Self {
        Self { user_key }
    }

    /// The user key this guard starts at.
    pub(crate) fn get_user_key(&self) -> &[u8] {
        &self.user_key
    }

    /// Whether the provided user key falls at or after this guard.
    pub(crate) fn covers(&self, user_key: &[u8]) -> bool {
        self.user_key.as_slice() <= user_key
    }
}

impl fmt::Debug for GuardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guard({})", String::from_utf8_lossy(&self.user_key))
    }
}

/// A committed guard along with the files resident in its partition.
#[derive(Clone, Debug)]
pub(crate) struct GuardMetadata {
    /// The key at which this guard's partition starts.
    key: GuardKey,

    /**
    The files assigned to this guard's partition, ordered by smallest key.

    At levels >= 1 the key ranges of these files are disjoint. At level 0 they may overlap.
    */
    files: Vec<Arc<FileMetadata>>,
}

/// Crate-only methods
impl GuardMetadata {
    /// Create a new instance of [`GuardMetadata`] with an empty partition.
    pub(crate) fn new(key: GuardKey) -> Self {
        Self { key, files: vec![] }
    }

    /// The guard key.
    pub(crate) fn get_key(&self) -> &GuardKey {
        &self.key
    }

    /// The files resident in this guard's partition.
    pub(crate) fn get_files(&self) -> &[Arc<FileMetadata>] {
        &self.files
    }

    /// Add a file to the partition, keeping the file list ordered by smallest key.
    pub(crate) fn add_file(&mut self, file: Arc<FileMetadata>) {
        let insertion_index = self
            .files
            .partition_point(|resident| resident.smallest_key() < file.smallest_key());
        self.files.insert(insertion_index, file);
    }

    /// The total size in bytes of the files in this partition.
    pub(crate) fn partition_size(&self) -> u64 {
        self.files.iter().map(|file| file.get_file_size()).sum()
    }
}

/// Whether `user_key` qualifies as a guard at the specified level.
pub(crate) fn is_guard_at_level(user_key: &[u8], level: usize) -> bool {
    let bits = config::guard_bits_for_level(level);
    let mask: u32 = (1_u32 << bits) - 1;

    hash32(user_key, GUARD_HASH_SEED) & mask == mask
}

/**
The shallowest level at which `user_key` qualifies as a guard.

Because the bit requirement shrinks with depth, qualification at the returned level implies
qualification at every deeper level. Returns [`None`] when the key is not a guard at any level.
*/
pub(crate) fn shallowest_guard_level(user_key: &[u8]) -> Option<usize> {
    let hash = hash32(user_key, GUARD_HASH_SEED);
    for level in 0..MAX_NUM_LEVELS {
        let bits = config::guard_bits_for_level(level);
        let mask: u32 = (1_u32 << bits) - 1;
        if hash & mask == mask {
            return Some(level);
        }
    }

    None
}

/**
Locate the partition for `user_key` among `guards`.

Returns the index of the guard whose range contains the key, or [`None`] when the key falls in
the sentinel range below the first guard. The guard list must be sorted by key.
*/
pub(crate) fn partition_for_key(guards: &[Arc<GuardMetadata>], user_key: &[u8]) -> Option<usize> {
    let num_covering = guards.partition_point(|guard| guard.get_key().covers(user_key));
    num_covering.checked_sub(1)
}

/**
Locate the partition for `user_key` among bare guard keys.

Same contract as [`partition_for_key`] but for candidate (complete) guard sets that carry no
file metadata.
*/
pub(crate) fn partition_for_key_in_keys(guard_keys: &[GuardKey], user_key: &[u8]) -> Option<usize> {
    let num_covering = guard_keys.partition_point(|guard| guard.covers(user_key));
    num_covering.checked_sub(1)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Brute-force a user key qualifying as a guard at (exactly) the given shallowest level.
    fn find_guard_key_for_level(level: usize) -> Vec<u8> {
        for candidate in 0..20_000_000_u64 {
            let key = candidate.to_string().into_bytes();
            if shallowest_guard_level(&key) == Some(level) {
                return key;
            }
        }

        panic!("No guard candidate found for level {level} in the search space.");
    }

    #[test]
    fn a_guard_at_a_level_is_a_guard_at_every_deeper_level() {
        let key = find_guard_key_for_level(4);

        for level in 4..MAX_NUM_LEVELS {
            assert!(
                is_guard_at_level(&key, level),
                "The key should qualify at level {level}."
            );
        }
        for level in 0..4 {
            assert!(
                !is_guard_at_level(&key, level),
                "The key should not qualify at level {level}."
            );
        }
    }

    #[test]
    fn deeper_levels_admit_more_guards() {
        let sample: Vec<Vec<u8>> = (0..200_000_u64)
            .map(|n| n.to_string().into_bytes())
            .collect();

        let shallow_count = sample
            .iter()
            .filter(|key| is_guard_at_level(key, 2))
            .count();
        let deep_count = sample
            .iter()
            .filter(|key| is_guard_at_level(key, 6))
            .count();

        assert!(
            deep_count > shallow_count,
            "Expected more guards at level 6 ({deep_count}) than at level 2 ({shallow_count})."
        );
    }

    #[test]
    fn partitions_are_located_by_binary_search() {
        let guards: Vec<Arc<GuardMetadata>> = [b"f".to_vec(), b"m".to_vec(), b"t".to_vec()]
            .into_iter()
            .map(|key| Arc::new(GuardMetadata::new(GuardKey::new(key))))
            .collect();

        assert_eq!(partition_for_key(&guards, b"a"), None);
        assert_eq!(partition_for_key(&guards, b"f"), Some(0));
        assert_eq!(partition_for_key(&guards, b"gnu"), Some(0));
        assert_eq!(partition_for_key(&guards, b"m"), Some(1));
        assert_eq!(partition_for_key(&guards, b"zebra"), Some(2));
    }

    #[test]
    fn files_in_a_partition_stay_ordered_by_smallest_key() {
        use crate::key::{InternalKey, Operation};

        let mut guard = GuardMetadata::new(GuardKey::new(b"m".to_vec()));
        for (number, start) in [(3_u64, b"r"), (1, b"m"), (2, b"p")] {
            let mut file = FileMetadata::new(number);
            file.set_smallest_key(Some(InternalKey::new(start.to_vec(), 1, Operation::Put)));
            file.set_largest_key(Some(InternalKey::new(start.to_vec(), 1, Operation::Put)));
            guard.add_file(Arc::new(file));
        }

        let ordered: Vec<u64> = guard
            .get_files()
            .iter()
            .map(|file| file.file_number())
            .collect();
        assert_eq!(ordered, vec![1, 2, 3]);
    }
}
