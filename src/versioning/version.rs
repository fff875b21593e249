/*!
A version is an immutable snapshot of the on-disk shape of the tree: the files at every level,
the committed guards partitioning those files, and the complete (candidate) guard sets that
future flushes and compactions will draw from.

Mutation happens only by applying a [`VersionEdit`](super::version_edit::VersionEdit) to the
current version through a [`VersionBuilder`](super::version_builder::VersionBuilder), producing
a new version. Readers pin a version by holding its node in the version list.
*/

use std::sync::Arc;

use crate::config::{self, MAX_NUM_LEVELS, L0_COMPACTION_TRIGGER};
use crate::guards::{self, GuardKey, GuardMetadata};
use crate::key::{InternalKey, Operation};
use crate::options::{DbOptions, ReadOptions};
use crate::table_cache::TableCache;

use super::errors::ReadResult;
use super::file_metadata::FileMetadata;

/// The result of a point lookup through a version.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum VersionLookupResult {
    /// The newest visible entry for the key is a value.
    Found(Vec<u8>),

    /// The newest visible entry for the key is a tombstone.
    Deleted,

    /// No file in this version holds a visible entry for the key.
    NotFound,
}

/// Identifies one partition of a level: the sentinel range or a guard's range.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum PartitionId {
    /// The range below the level's first guard.
    Sentinel,

    /// The range of the guard at the contained index.
    Guard(usize),
}

/**
Metadata used for scoring the necessity of compacting a version based on the fullness of its
levels.
*/
#[derive(Clone, Copy, Debug)]
pub(crate) struct SizeCompactionMetadata {
    /// The level that should be compacted next.
    pub(crate) compaction_level: usize,

    /**
    A score for the necessity of compacting that level.

    A score below 1 means compaction is not yet necessary.
    */
    pub(crate) compaction_score: f64,
}

/// A point-in-time snapshot of the file and guard structure of the database.
#[derive(Debug)]
pub(crate) struct Version {
    /// Database options to refer to when reading table files.
    options: DbOptions,

    /// A cache for accessing table files, shared with sibling versions.
    table_cache: Arc<TableCache>,

    /// Per level, the files in the sentinel range below the first guard.
    pub(crate) sentinel_files: [Vec<Arc<FileMetadata>>; MAX_NUM_LEVELS],

    /// Per level, the committed guards in key order, each holding its partition's files.
    pub(crate) guards: [Vec<Arc<GuardMetadata>>; MAX_NUM_LEVELS],

    /**
    Per level, the complete (candidate) guard keys in key order.

    Committed guard keys are always also present here; commitment never removes a candidate.
    */
    pub(crate) complete_guards: [Vec<GuardKey>; MAX_NUM_LEVELS],

    /// Filled in by [`Version::finalize`]; drives the compaction picker.
    size_compaction_metadata: Option<SizeCompactionMetadata>,

    /// The write-ahead log file number that was active when this version was installed.
    wal_file_number: u64,

    /// The last sequence number in use when this version was installed.
    last_sequence_number: u64,
}

/// Crate-only methods
impl Version {
    /// Create a new, empty instance of [`Version`].
    pub(crate) fn new(
        options: DbOptions,
        table_cache: &Arc<TableCache>,
        wal_file_number: u64,
        last_sequence_number: u64,
    ) -> Self {
        Self {
            options,
            table_cache: Arc::clone(table_cache),
            sentinel_files: Default::default(),
            guards: Default::default(),
            complete_guards: Default::default(),
            size_compaction_metadata: None,
            wal_file_number,
            last_sequence_number,
        }
    }

    /// Create an empty version sharing this version's options and table cache.
    pub(crate) fn clone_shell(&self, wal_file_number: u64, last_sequence_number: u64) -> Version {
        Version::new(
            self.options.clone(),
            &self.table_cache,
            wal_file_number,
            last_sequence_number,
        )
    }

    /// The write-ahead log file number active when this version was installed.
    pub(crate) fn wal_file_number(&self) -> u64 {
        self.wal_file_number
    }

    /// The last sequence number in use when this version was installed.
    pub(crate) fn last_sequence_number(&self) -> u64 {
        self.last_sequence_number
    }

    /// The number of table files at the specified level across all partitions.
    pub(crate) fn num_files_at_level(&self, level: usize) -> usize {
        self.sentinel_files[level].len()
            + self.guards[level]
                .iter()
                .map(|guard| guard.get_files().len())
                .sum::<usize>()
    }

    /// The number of committed guards at the specified level.
    pub(crate) fn num_guards_at_level(&self, level: usize) -> usize {
        self.guards[level].len()
    }

    /// The number of files resident in guard partitions at the specified level.
    pub(crate) fn num_guard_files_at_level(&self, level: usize) -> usize {
        self.guards[level]
            .iter()
            .map(|guard| guard.get_files().len())
            .sum()
    }

    /// The number of files resident in the sentinel partition at the specified level.
    pub(crate) fn num_sentinel_files_at_level(&self, level: usize) -> usize {
        self.sentinel_files[level].len()
    }

    /// The total size in bytes of the files at the specified level.
    pub(crate) fn get_level_size(&self, level: usize) -> u64 {
        self.sentinel_files[level]
            .iter()
            .map(|file| file.get_file_size())
            .sum::<u64>()
            + self.guards[level]
                .iter()
                .map(|guard| guard.partition_size())
                .sum::<u64>()
    }

    /// The total number of files in this version.
    pub(crate) fn num_files_total(&self) -> usize {
        (0..MAX_NUM_LEVELS)
            .map(|level| self.num_files_at_level(level))
            .sum()
    }

    /**
    All files at the specified level, flattened across partitions.

    Files are ordered by smallest key: partitions are visited in guard order and files within
    a partition are kept sorted by their smallest key.
    */
    pub(crate) fn files_at_level(&self, level: usize) -> Vec<Arc<FileMetadata>> {
        let mut files: Vec<Arc<FileMetadata>> = self.sentinel_files[level].to_vec();
        for guard in &self.guards[level] {
            files.extend(guard.get_files().iter().map(Arc::clone));
        }

        files
    }

    /**
    The file lists of the non-empty partitions at the specified level, in key order.

    Files within one partition at levels >= 1 are disjoint, so each returned list can be
    iterated by concatenation; lists from different partitions must be merged because a file
    left behind by a guard split may reach past its partition's end.
    */
    pub(crate) fn partition_file_lists(&self, level: usize) -> Vec<Vec<Arc<FileMetadata>>> {
        let mut partitions = vec![];
        if !self.sentinel_files[level].is_empty() {
            partitions.push(self.sentinel_files[level].to_vec());
        }
        for guard in &self.guards[level] {
            if !guard.get_files().is_empty() {
                partitions.push(guard.get_files().to_vec());
            }
        }

        partitions
    }

    /**
    Look up the newest entry for the seek key's user key visible at the seek key's sequence
    number.

    Level 0 files are probed newest file first since their ranges may overlap. Deeper levels
    probe the key's guard partition (and, to cover files left straddling a later-committed
    guard boundary, the closest preceding non-empty partition that reaches the key).
    */
    pub(crate) fn get(
        &self,
        read_options: &ReadOptions,
        seek_key: &InternalKey,
    ) -> ReadResult<VersionLookupResult> {
        let user_key = seek_key.get_user_key();

        for level in 0..MAX_NUM_LEVELS {
            let candidates = self.candidate_files_for_user_key(level, user_key);
            for file in candidates {
                let table_lookup =
                    self.table_cache
                        .get(read_options, file.file_number(), seek_key)?;
                if let Some((found_key, found_value)) = table_lookup {
                    if found_key.get_user_key() == user_key {
                        return Ok(match found_key.get_operation() {
                            Operation::Put => VersionLookupResult::Found(found_value),
                            Operation::Delete => VersionLookupResult::Deleted,
                        });
                    }
                }
            }
        }

        Ok(VersionLookupResult::NotFound)
    }

    /**
    The files at a level that may hold entries for `user_key`, in probe order.

    At level 0 this is every file whose range contains the key, newest file first. At deeper
    levels it is at most the containing file of the key's partition plus the last file of the
    nearest preceding non-empty partition when that file's range reaches the key.
    */
    pub(crate) fn candidate_files_for_user_key(
        &self,
        level: usize,
        user_key: &[u8],
    ) -> Vec<Arc<FileMetadata>> {
        if level == 0 {
            let mut candidates: Vec<Arc<FileMetadata>> = self
                .files_at_level(0)
                .into_iter()
                .filter(|file| file.contains_user_key(user_key))
                .collect();
            candidates.sort_by(|a, b| b.file_number().cmp(&a.file_number()));
            return candidates;
        }

        let mut candidates = vec![];
        let partition = guards::partition_for_key(&self.guards[level], user_key);

        // The containing file within the key's own partition, if any
        let partition_files: &[Arc<FileMetadata>] = match partition {
            Some(guard_index) => self.guards[level][guard_index].get_files(),
            None => &self.sentinel_files[level],
        };
        if let Some(file) = Version::find_containing_file(partition_files, user_key) {
            candidates.push(file);
        }

        // A file assigned to an earlier partition may straddle this key when a guard was
        // committed after the file was written; only the last file of the nearest preceding
        // non-empty partition can reach this far
        let mut preceding = partition;
        loop {
            let preceding_files: &[Arc<FileMetadata>] = match preceding {
                Some(0) => &self.sentinel_files[level],
                Some(guard_index) => self.guards[level][guard_index - 1].get_files(),
                None => break,
            };
            preceding = match preceding {
                Some(0) => None,
                Some(guard_index) => Some(guard_index - 1),
                None => None,
            };

            if let Some(last_file) = preceding_files.last() {
                if last_file.contains_user_key(user_key) {
                    candidates.push(Arc::clone(last_file));
                }
                break;
            }
        }

        candidates
    }

    /**
    Collect the input files at a level for a compaction covering the provided user key range.

    At level 0 the set is grown transitively: any file overlapping the range joins the set and
    extends the range, since level-0 files may overlap each other arbitrarily. At deeper
    levels entire partitions join the set whenever any of their files overlaps the range, so
    that a compaction always rewrites whole partitions.
    */
    pub(crate) fn get_overlapping_compaction_inputs(
        &self,
        level: usize,
        smallest_user_key: Option<&[u8]>,
        largest_user_key: Option<&[u8]>,
    ) -> Vec<Arc<FileMetadata>> {
        let mut range_start = smallest_user_key.map(|key| key.to_vec());
        let mut range_end = largest_user_key.map(|key| key.to_vec());

        if level == 0 {
            let all_files = self.files_at_level(0);
            let mut selected: Vec<Arc<FileMetadata>> = vec![];
            let mut changed = true;
            while changed {
                changed = false;
                for file in &all_files {
                    if selected.iter().any(|chosen| Arc::ptr_eq(chosen, file)) {
                        continue;
                    }
                    if file
                        .overlaps_user_key_range(range_start.as_deref(), range_end.as_deref())
                    {
                        // Growing the range may pull in more overlapping files; restart
                        if range_start.is_none()
                            || file.smallest_key().get_user_key()
                                < range_start.as_deref().unwrap()
                        {
                            range_start = Some(file.smallest_key().get_user_key().to_vec());
                        }
                        if range_end.is_none()
                            || file.largest_key().get_user_key() > range_end.as_deref().unwrap()
                        {
                            range_end = Some(file.largest_key().get_user_key().to_vec());
                        }
                        selected.push(Arc::clone(file));
                        changed = true;
                    }
                }
            }

            selected.sort_by_key(|file| file.file_number());
            return selected;
        }

        let mut selected = vec![];
        let sentinel_overlaps = self.sentinel_files[level].iter().any(|file| {
            file.overlaps_user_key_range(range_start.as_deref(), range_end.as_deref())
        });
        if sentinel_overlaps {
            selected.extend(self.sentinel_files[level].iter().map(Arc::clone));
        }
        for guard in &self.guards[level] {
            let guard_overlaps = guard.get_files().iter().any(|file| {
                file.overlaps_user_key_range(range_start.as_deref(), range_end.as_deref())
            });
            if guard_overlaps {
                selected.extend(guard.get_files().iter().map(Arc::clone));
            }
        }

        selected
    }

    /**
    Whether no level deeper than `level` holds any entry for `user_key`.

    Deletion markers may only be dropped by a compaction when this holds for the compaction's
    output level, otherwise an older value below would become visible again.
    */
    pub(crate) fn is_base_level_for_key(&self, user_key: &[u8], level: usize) -> bool {
        for deeper_level in (level + 1)..MAX_NUM_LEVELS {
            if !self
                .candidate_files_for_user_key(deeper_level, user_key)
                .is_empty()
            {
                return false;
            }
        }

        true
    }

    /**
    Compute and store the compaction score of this version.

    Level 0 is scored by file count against its trigger; deeper levels are scored by total
    bytes against their budget. The last level is never scored since it has nowhere to
    compact into.
    */
    pub(crate) fn finalize(&mut self) {
        let mut best_level: usize = 0;
        let mut best_score: f64 =
            self.num_files_at_level(0) as f64 / L0_COMPACTION_TRIGGER as f64;

        for level in 1..(MAX_NUM_LEVELS - 1) {
            let score = self.get_level_size(level) as f64 / config::max_bytes_for_level(level);
            if score > best_score {
                best_score = score;
                best_level = level;
            }
        }

        self.size_compaction_metadata = Some(SizeCompactionMetadata {
            compaction_level: best_level,
            compaction_score: best_score,
        });
    }

    /// The compaction scoring metadata, if [`Version::finalize`] has run.
    pub(crate) fn get_size_compaction_metadata(&self) -> Option<SizeCompactionMetadata> {
        self.size_compaction_metadata
    }

    /// Whether the score recorded by [`Version::finalize`] calls for a compaction.
    pub(crate) fn requires_size_compaction(&self) -> bool {
        self.size_compaction_metadata
            .map(|metadata| metadata.compaction_score >= 1.0)
            .unwrap_or(false)
    }

    /**
    The partition at the specified level holding the most files.

    Ties prefer the partition with the smallest keys (the sentinel first). Returns [`None`]
    when the level is empty.
    */
    pub(crate) fn most_loaded_partition(&self, level: usize) -> Option<PartitionId> {
        let mut best: Option<(PartitionId, usize)> = None;

        if !self.sentinel_files[level].is_empty() {
            best = Some((PartitionId::Sentinel, self.sentinel_files[level].len()));
        }
        for (guard_index, guard) in self.guards[level].iter().enumerate() {
            let num_files = guard.get_files().len();
            if num_files == 0 {
                continue;
            }
            let is_better = match best {
                None => true,
                Some((_, best_count)) => num_files > best_count,
            };
            if is_better {
                best = Some((PartitionId::Guard(guard_index), num_files));
            }
        }

        best.map(|(partition, _)| partition)
    }

    /// The files of the specified partition at the specified level.
    pub(crate) fn partition_files(
        &self,
        level: usize,
        partition: PartitionId,
    ) -> Vec<Arc<FileMetadata>> {
        match partition {
            PartitionId::Sentinel => self.sentinel_files[level].to_vec(),
            PartitionId::Guard(guard_index) => {
                self.guards[level][guard_index].get_files().to_vec()
            }
        }
    }

    /// The user-key range covered by the specified partition's files.
    pub(crate) fn partition_user_key_range(
        &self,
        level: usize,
        partition: PartitionId,
    ) -> Option<(Vec<u8>, Vec<u8>)> {
        let files = match partition {
            PartitionId::Sentinel => &self.sentinel_files[level],
            PartitionId::Guard(guard_index) => {
                let guard: &GuardMetadata = &self.guards[level][guard_index];
                return guard.get_files().iter().fold(None, fold_user_key_range);
            }
        };

        files.iter().fold(None, fold_user_key_range)
    }

    /// A human-readable summary of the files and guards at each level.
    pub(crate) fn level_summary(&self) -> String {
        let per_level: Vec<String> = (0..MAX_NUM_LEVELS)
            .map(|level| {
                format!(
                    "{files}f/{guards}g",
                    files = self.num_files_at_level(level),
                    guards = self.num_guards_at_level(level)
                )
            })
            .collect();

        format!("levels[ {} ]", per_level.join(" "))
    }
}

/// Private methods
impl Version {
    /**
    Binary search a partition's disjoint, sorted file list for the file containing `user_key`.
    */
    fn find_containing_file(
        files: &[Arc<FileMetadata>],
        user_key: &[u8],
    ) -> Option<Arc<FileMetadata>> {
        let candidate_index = files.partition_point(|file| {
            file.largest_key().get_user_key() < user_key
        });
        if candidate_index >= files.len() {
            return None;
        }

        let candidate = &files[candidate_index];
        if candidate.contains_user_key(user_key) {
            return Some(Arc::clone(candidate));
        }

        None
    }
}

/// Accumulate the user-key range of a run of files.
fn fold_user_key_range(
    accumulated: Option<(Vec<u8>, Vec<u8>)>,
    file: &Arc<FileMetadata>,
) -> Option<(Vec<u8>, Vec<u8>)> {
    let file_start = file.smallest_key().get_user_key().to_vec();
    let file_end = file.largest_key().get_user_key().to_vec();

    Some(match accumulated {
        None => (file_start, file_end),
        Some((start, end)) => (
            if file_start < start { file_start } else { start },
            if file_end > end { file_end } else { end },
        ),
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::guards::GuardKey;

    use super::*;

    fn make_file(file_number: u64, start: &[u8], end: &[u8]) -> Arc<FileMetadata> {
        let mut file = FileMetadata::new(file_number);
        file.set_file_size(1024);
        file.set_smallest_key(Some(InternalKey::new(start.to_vec(), 10, Operation::Put)));
        file.set_largest_key(Some(InternalKey::new(end.to_vec(), 20, Operation::Put)));
        Arc::new(file)
    }

    fn empty_version() -> Version {
        let options = DbOptions::with_memory_env();
        let table_cache = Arc::new(TableCache::new(options.clone(), 10));
        Version::new(options, &table_cache, 1, 1)
    }

    fn guard_with_files(key: &[u8], files: Vec<Arc<FileMetadata>>) -> Arc<GuardMetadata> {
        let mut guard = GuardMetadata::new(GuardKey::new(key.to_vec()));
        for file in files {
            guard.add_file(file);
        }
        Arc::new(guard)
    }

    #[test]
    fn level_zero_candidates_are_probed_newest_file_first() {
        let mut version = empty_version();
        version.sentinel_files[0] = vec![
            make_file(3, b"100", b"400"),
            make_file(7, b"200", b"600"),
            make_file(5, b"350", b"500"),
        ];

        let candidates = version.candidate_files_for_user_key(0, b"380");
        let file_numbers: Vec<u64> = candidates
            .iter()
            .map(|file| file.file_number())
            .collect();

        assert_eq!(file_numbers, vec![7, 5, 3]);
    }

    #[test]
    fn deeper_levels_probe_the_guard_partition_of_the_key() {
        let mut version = empty_version();
        version.sentinel_files[2] = vec![make_file(1, b"a", b"c")];
        version.guards[2] = vec![
            guard_with_files(b"f", vec![make_file(2, b"f", b"h"), make_file(3, b"j", b"l")]),
            guard_with_files(b"m", vec![make_file(4, b"m", b"p")]),
        ];

        let in_sentinel = version.candidate_files_for_user_key(2, b"b");
        assert_eq!(in_sentinel.len(), 1);
        assert_eq!(in_sentinel[0].file_number(), 1);

        let in_first_guard = version.candidate_files_for_user_key(2, b"k");
        assert_eq!(in_first_guard.len(), 1);
        assert_eq!(in_first_guard[0].file_number(), 3);

        let in_second_guard = version.candidate_files_for_user_key(2, b"n");
        assert_eq!(in_second_guard.len(), 1);
        assert_eq!(in_second_guard[0].file_number(), 4);

        let in_gap = version.candidate_files_for_user_key(2, b"i");
        assert!(in_gap.is_empty());
    }

    #[test]
    fn a_file_straddling_a_later_guard_is_still_probed() {
        let mut version = empty_version();
        // File 2 was written before guard "m" was committed and reaches past it
        version.guards[2] = vec![
            guard_with_files(b"f", vec![make_file(2, b"f", b"r")]),
            guard_with_files(b"m", vec![make_file(4, b"n", b"p")]),
        ];

        let candidates = version.candidate_files_for_user_key(2, b"q");
        let file_numbers: Vec<u64> = candidates
            .iter()
            .map(|file| file.file_number())
            .collect();

        assert_eq!(file_numbers, vec![2]);

        // A key covered by both partitions probes the home partition first
        let candidates = version.candidate_files_for_user_key(2, b"o");
        let file_numbers: Vec<u64> = candidates
            .iter()
            .map(|file| file.file_number())
            .collect();
        assert_eq!(file_numbers, vec![4, 2]);
    }

    #[test]
    fn compaction_inputs_at_deep_levels_take_whole_partitions() {
        let mut version = empty_version();
        version.sentinel_files[1] = vec![make_file(1, b"a", b"c")];
        version.guards[1] = vec![
            guard_with_files(b"f", vec![make_file(2, b"f", b"h"), make_file(3, b"j", b"l")]),
            guard_with_files(b"m", vec![make_file(4, b"m", b"p")]),
        ];

        let inputs = version.get_overlapping_compaction_inputs(1, Some(b"g"), Some(b"k"));
        let file_numbers: Vec<u64> = inputs.iter().map(|file| file.file_number()).collect();

        // Both files of the touched partition join, the sentinel and other guard stay out
        assert_eq!(file_numbers, vec![2, 3]);
    }

    #[test]
    fn level_zero_compaction_inputs_grow_transitively() {
        let mut version = empty_version();
        version.sentinel_files[0] = vec![
            make_file(1, b"100", b"300"),
            make_file(2, b"250", b"500"),
            make_file(3, b"450", b"700"),
            make_file(4, b"800", b"900"),
        ];

        let inputs = version.get_overlapping_compaction_inputs(0, Some(b"200"), Some(b"260"));
        let file_numbers: Vec<u64> = inputs.iter().map(|file| file.file_number()).collect();

        // File 1 overlaps the range, pulling in file 2, which pulls in file 3
        assert_eq!(file_numbers, vec![1, 2, 3]);
    }

    #[test]
    fn scoring_prefers_the_fullest_level() {
        let mut version = empty_version();
        for file_number in 0..(L0_COMPACTION_TRIGGER as u64) {
            version.sentinel_files[0].push(make_file(file_number + 1, b"a", b"b"));
        }

        version.finalize();

        let metadata = version.get_size_compaction_metadata().unwrap();
        assert_eq!(metadata.compaction_level, 0);
        assert!(version.requires_size_compaction());
    }

    #[test]
    fn the_most_loaded_partition_wins_compaction_selection() {
        let mut version = empty_version();
        version.sentinel_files[1] = vec![make_file(1, b"a", b"c")];
        version.guards[1] = vec![
            guard_with_files(b"f", vec![make_file(2, b"f", b"g"), make_file(3, b"h", b"i")]),
            guard_with_files(b"m", vec![make_file(4, b"m", b"p")]),
        ];

        assert_eq!(
            version.most_loaded_partition(1),
            Some(PartitionId::Guard(0))
        );
        assert_eq!(version.most_loaded_partition(4), None);
    }

    #[test]
    fn base_level_checks_look_below_the_output_level() {
        let mut version = empty_version();
        version.guards[3] = vec![guard_with_files(b"f", vec![make_file(9, b"f", b"k")])];

        assert!(!version.is_base_level_for_key(b"g", 1));
        assert!(version.is_base_level_for_key(b"g", 3));
        assert!(version.is_base_level_for_key(b"z", 1));
    }
}
