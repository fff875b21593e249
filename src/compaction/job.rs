/*!
Describes one unit of compaction work: which files at which level merge into which guard
partitions of the next level.
*/

use std::sync::Arc;

use crate::config::MAX_NUM_LEVELS;
use crate::errors::{CairnDBError, CairnDBResult};
use crate::guards::GuardKey;
use crate::iterator::StorageIterator;
use crate::options::{DbOptions, ReadOptions};
use crate::table_cache::TableCache;
use crate::tables::Table;
use crate::utils::linked_list::SharedNode;
use crate::versioning::file_iterators::MergingIterator;
use crate::versioning::file_metadata::FileMetadata;
use crate::versioning::version::Version;
use crate::versioning::VersionSet;

/// Encapsulates the inputs and parameters of one compaction.
pub(crate) struct CompactionJob {
    /// The level being compacted.
    pub(crate) level: usize,

    /// The level the merged output is written to. Always `level + 1`.
    pub(crate) output_level: usize,

    /**
    The version the inputs were picked from, pinned for the duration of the compaction.

    The worker must hand this back through
    [`VersionSet::release_version`](crate::versioning::VersionSet::release_version) when the
    compaction finishes.
    */
    pub(crate) input_version: SharedNode<Version>,

    /// The input files at `level`.
    pub(crate) level_inputs: Vec<Arc<FileMetadata>>,

    /// The input files at `output_level`: every file of every partition the inputs touch.
    pub(crate) parent_inputs: Vec<Arc<FileMetadata>>,

    /**
    The complete guard set of the output level.

    Output files are split at these boundaries so that promoting any of these guards after
    the compaction can never leave an output file straddling a committed boundary.
    */
    pub(crate) output_guard_keys: Vec<GuardKey>,

    /// The maximum size for files produced by this compaction.
    pub(crate) max_output_file_size: u64,

    /// Whether this job was requested by a caller rather than the scheduler.
    pub(crate) is_manual: bool,
}

/// Crate-only methods
impl CompactionJob {
    /**
    Pick the next size-triggered compaction from the current version.

    The level with the highest score is chosen, then the fullest guard partition within it.
    The inputs are that partition's files (grown transitively at level 0, where ranges
    overlap) plus every file of every partition the key range touches at the next level.

    Returns [`None`] when no level's score reaches the compaction threshold or the chosen
    level is empty.

    # Panics

    A size-triggered compaction can never target the last level, since scores are not
    computed for it.
    */
    pub(crate) fn pick(version_set: &VersionSet, options: &DbOptions) -> Option<CompactionJob> {
        let picked = {
            let version_guard = version_set.current_version().read();
            let version = &version_guard.element;
            if !version.requires_size_compaction() {
                return None;
            }

            let level = version
                .get_size_compaction_metadata()
                .unwrap()
                .compaction_level;
            assert!(level + 1 < MAX_NUM_LEVELS);

            let partition = version.most_loaded_partition(level)?;
            let partition_files = version.partition_files(level, partition);
            if partition_files.is_empty() {
                return None;
            }

            let level_inputs = if level == 0 {
                // Level-0 ranges overlap arbitrarily, so grow the set transitively
                let (range_start, range_end) =
                    version.partition_user_key_range(level, partition)?;
                version.get_overlapping_compaction_inputs(
                    0,
                    Some(&range_start),
                    Some(&range_end),
                )
            } else {
                partition_files
            };

            (level, level_inputs)
        };

        let (level, level_inputs) = picked;
        Some(CompactionJob::from_inputs(
            version_set,
            options,
            level,
            level_inputs,
            false,
        ))
    }

    /**
    Build a compaction job for a caller-requested key range at the specified level.

    Returns [`None`] when no files at the level overlap the range.
    */
    pub(crate) fn pick_manual(
        version_set: &VersionSet,
        options: &DbOptions,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Option<CompactionJob> {
        if level + 1 >= MAX_NUM_LEVELS {
            return None;
        }

        let level_inputs = {
            let version_guard = version_set.current_version().read();
            version_guard
                .element
                .get_overlapping_compaction_inputs(level, begin, end)
        };
        if level_inputs.is_empty() {
            return None;
        }

        Some(CompactionJob::from_inputs(
            version_set,
            options,
            level,
            level_inputs,
            true,
        ))
    }

    /// Every input file of the compaction, level inputs first.
    pub(crate) fn all_input_files(&self) -> impl Iterator<Item = &Arc<FileMetadata>> {
        self.level_inputs.iter().chain(self.parent_inputs.iter())
    }

    /// The combined size in bytes of all input files.
    pub(crate) fn total_input_bytes(&self) -> u64 {
        self.all_input_files()
            .map(|file| file.get_file_size())
            .sum()
    }

    /// Open a merging cursor over every input file.
    pub(crate) fn make_merging_iterator(
        &self,
        table_cache: Arc<TableCache>,
    ) -> CairnDBResult<MergingIterator> {
        let mut children: Vec<Box<dyn StorageIterator>> = vec![];
        for file in self.all_input_files() {
            let table = table_cache
                .find_table(file.file_number())
                .map_err(CairnDBError::TableRead)?;
            children.push(Box::new(Table::iter_with(
                table,
                ReadOptions {
                    // Compactions stream every block exactly once; caching them would only
                    // evict the read working set
                    skip_block_cache: true,
                    snapshot: None,
                },
            )));
        }

        Ok(MergingIterator::new(children))
    }

    /// Whether no level deeper than the output level holds any entry for `user_key`.
    pub(crate) fn is_base_level_for_key(&self, user_key: &[u8]) -> bool {
        self.input_version
            .read()
            .element
            .is_base_level_for_key(user_key, self.output_level)
    }
}

/// Private methods
impl CompactionJob {
    /// Build a job from a fixed set of input files at a level, pinning the current version.
    fn from_inputs(
        version_set: &VersionSet,
        options: &DbOptions,
        level: usize,
        level_inputs: Vec<Arc<FileMetadata>>,
        is_manual: bool,
    ) -> CompactionJob {
        let output_level = level + 1;
        let (parent_inputs, output_guard_keys) = {
            let version_guard = version_set.current_version().read();
            let version = &version_guard.element;
            let input_range = FileMetadata::get_key_range_for_files(&level_inputs);
            let parent_inputs = version.get_overlapping_compaction_inputs(
                output_level,
                Some(input_range.start.get_user_key()),
                Some(input_range.end.get_user_key()),
            );
            let output_guard_keys = version.complete_guards[output_level].clone();

            (parent_inputs, output_guard_keys)
        };

        CompactionJob {
            level,
            output_level,
            input_version: version_set.get_current_version(),
            level_inputs,
            parent_inputs,
            output_guard_keys,
            max_output_file_size: options.max_file_size as u64,
            is_manual,
        }
    }
}
