/*!
This module contains global configuration constants for CairnDB.

Several of these would be tunable options in other storage engines. CairnDB keeps static values
here to stay lean; values that genuinely vary per deployment live in
[`DbOptions`](crate::options::DbOptions) instead.
*/

use std::convert::TryFrom;

/// The maximum number of levels in the tree.
pub(crate) const MAX_NUM_LEVELS: usize = 7;

/**
The compression types available for blocks within a table file.

Snappy compresses and decompresses far faster than most persistent storage can move bytes, and
its implementation detects incompressible input and stores it raw, so there is rarely a reason
to turn it off.
*/
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TableFileCompressionType {
    /// No compression.
    None = 0,

    /// Snappy compression.
    Snappy = 1,
}

impl TryFrom<u8> for TableFileCompressionType {
    type Error = String;

    fn try_from(value: u8) -> Result<TableFileCompressionType, String> {
        match value {
            0 => Ok(TableFileCompressionType::None),
            1 => Ok(TableFileCompressionType::Snappy),
            _ => Err(format!(
                "There was a problem parsing the table file compression type. The value \
                received was {value}."
            )),
        }
    }
}

/// Level-0 compaction is started when a level-0 guard partition reaches this many files.
pub(crate) const L0_COMPACTION_TRIGGER: usize = 4;

/**
Soft limit on the number of level-0 files.

Writes are slowed down by a short sleep when level 0 reaches this many files in total.
*/
pub(crate) const L0_SLOWDOWN_WRITES_TRIGGER: usize = 8;

/**
Hard limit on the number of level-0 files.

Writes stall completely until a flush or compaction reduces the count.
*/
pub(crate) const L0_STOP_WRITES_TRIGGER: usize = 12;

/**
The overall maximum group commit batch size.

This is set at 1 MiB so that grouping improves average latency without penalizing any single
write too much.
*/
pub(crate) const MAX_GROUP_COMMIT_SIZE_BYTES: usize = 1024 * 1024;

/**
The upper threshold for a write to be considered a small write.

This is set at 128 KiB.
*/
pub(crate) const GROUP_COMMIT_SMALL_WRITE_THRESHOLD_BYTES: usize = 128 * 1024;

/**
The allowable additional bytes to add to a group commit whose first writer is doing a small
write.

If the leader of a group commit has a small write
(<= [`GROUP_COMMIT_SMALL_WRITE_THRESHOLD_BYTES`]), the growth of the group is limited so the
small write's latency is not dominated by piggybacked large writes.
*/
pub(crate) const SMALL_WRITE_ADDITIONAL_GROUP_COMMIT_SIZE_BYTES: usize = 128 * 1024;

/**
The number of low hash bits that must all be set for a key to qualify as a guard at level 0.

A key is a guard candidate at level `level` when the low `guard_bits_for_level(level)` bits of
its 32-bit hash are all ones. The bit count shrinks as levels get deeper, so deeper levels
accumulate more guards, and any guard at a level is automatically a guard at every deeper
level.
*/
pub(crate) const GUARD_TOP_LEVEL_BITS: u32 = 17;

/// How many fewer hash bits each successive level requires of its guard candidates.
pub(crate) const GUARD_BIT_DECREMENT: u32 = 2;

/// The number of qualifying hash bits required of a guard candidate at the given level.
pub(crate) fn guard_bits_for_level(level: usize) -> u32 {
    GUARD_TOP_LEVEL_BITS.saturating_sub(GUARD_BIT_DECREMENT * (level as u32)).max(1)
}

/**
The total byte budget for a level before it is scored as needing compaction.

Level 0 is scored by file count rather than bytes so this starts at level 1. Each level gets
ten times the budget of the previous one.
*/
pub(crate) fn max_bytes_for_level(level: usize) -> f64 {
    debug_assert!(level >= 1);

    let mut budget: f64 = 10.0 * 1024.0 * 1024.0;
    let mut current_level = 1;
    while current_level < level {
        budget *= 10.0;
        current_level += 1;
    }

    budget
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_bit_requirements_shrink_with_depth() {
        let mut previous = u32::MAX;
        for level in 0..MAX_NUM_LEVELS {
            let bits = guard_bits_for_level(level);
            assert!(bits >= 1);
            assert!(bits < previous, "level {level} should require fewer bits");
            previous = bits;
        }
    }

    #[test]
    fn level_byte_budgets_grow_with_depth() {
        assert_eq!(max_bytes_for_level(1) as u64, 10 * 1024 * 1024);
        assert_eq!(max_bytes_for_level(2) as u64, 100 * 1024 * 1024);
        assert!(max_bytes_for_level(6) > max_bytes_for_level(5));
    }
}
