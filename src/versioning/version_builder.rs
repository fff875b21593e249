/*!
Accumulates changes from version edits and applies them to a base version to produce a new
version.
*/

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::config::MAX_NUM_LEVELS;
use crate::guards::{self, GuardKey, GuardMetadata};
use crate::utils::linked_list::SharedNode;

use super::file_metadata::FileMetadata;
use super::version::Version;
use super::version_edit::{DeletedFile, VersionEdit};

/**
Builds a new [`Version`] from a base version plus one or more accumulated [`VersionEdit`]s.

Guard commitments propagate downward as they accumulate: a guard committed at level ℓ is
committed at every level deeper than ℓ in the same application, and likewise for complete
guard candidates. File placement is recomputed from the merged guard set, so a newly committed
guard immediately partitions the files that survive into the new version.
*/
pub(crate) struct VersionBuilder {
    /// The base version to apply changes on top of.
    base_version: SharedNode<Version>,

    /// Per level, the file numbers to remove.
    deleted_files: [HashSet<u64>; MAX_NUM_LEVELS],

    /// Per level, the files to add.
    added_files: [Vec<Arc<FileMetadata>>; MAX_NUM_LEVELS],

    /// Per level, guard keys newly committed (after downward propagation).
    new_guards: [BTreeSet<GuardKey>; MAX_NUM_LEVELS],

    /// Per level, guard candidates newly discovered (after downward propagation).
    new_complete_guards: [BTreeSet<GuardKey>; MAX_NUM_LEVELS],

    /**
    Indicates whether the builder has already been used to apply its stored changes.

    Changes stored in a builder cannot be applied multiple times.
    */
    already_invoked: bool,
}

/// Crate-only methods
impl VersionBuilder {
    /// Create a new instance of [`VersionBuilder`].
    pub(crate) fn new(base_version: SharedNode<Version>) -> Self {
        Self {
            base_version,
            deleted_files: Default::default(),
            added_files: Default::default(),
            new_guards: Default::default(),
            new_complete_guards: Default::default(),
            already_invoked: false,
        }
    }

    /**
    Accumulate the changes of one edit.

    Multiple edits can be accumulated before applying; recovery replays the whole manifest
    through a single builder.
    */
    pub(crate) fn accumulate_changes(&mut self, edit: &VersionEdit) {
        for DeletedFile { level, file_number } in &edit.deleted_files {
            self.deleted_files[*level].insert(*file_number);
        }

        for (level, file) in &edit.new_files {
            self.deleted_files[*level].remove(&file.file_number());
            self.added_files[*level].push(Arc::new(file.clone()));
        }

        for (level, guard_key) in &edit.new_guards {
            // A committed guard partitions its own level and every deeper one
            for propagated_level in *level..MAX_NUM_LEVELS {
                self.new_guards[propagated_level].insert(guard_key.clone());
                self.new_complete_guards[propagated_level].insert(guard_key.clone());
            }
        }

        for (level, guard_key) in &edit.new_complete_guards {
            for propagated_level in *level..MAX_NUM_LEVELS {
                self.new_complete_guards[propagated_level].insert(guard_key.clone());
            }
        }
    }

    /**
    Apply the accumulated changes to the base version, returning the new [`Version`].

    The caller is responsible for running [`Version::finalize`] on the result before
    installing it.

    # Panics

    Panics if invoked more than once, or (in non-optimized builds) if the resulting file
    placement overlaps within a guard partition at a level greater than zero.
    */
    pub(crate) fn apply_changes(
        &mut self,
        wal_file_number: u64,
        last_sequence_number: u64,
    ) -> Version {
        assert!(
            !self.already_invoked,
            "Cannot call `apply_changes` more than once on a `VersionBuilder`."
        );
        self.already_invoked = true;

        let base_guard = self.base_version.read();
        let base = &base_guard.element;
        let mut new_version = base.clone_shell(wal_file_number, last_sequence_number);

        for level in 0..MAX_NUM_LEVELS {
            // Merge the committed guard keys
            let mut committed_keys: BTreeSet<GuardKey> = base.guards[level]
                .iter()
                .map(|guard| guard.get_key().clone())
                .collect();
            committed_keys.extend(self.new_guards[level].iter().cloned());
            let committed_keys: Vec<GuardKey> = committed_keys.into_iter().collect();

            // Merge the complete guard sets; committed guards are always complete
            let mut complete: BTreeSet<GuardKey> =
                base.complete_guards[level].iter().cloned().collect();
            complete.extend(self.new_complete_guards[level].iter().cloned());
            complete.extend(committed_keys.iter().cloned());
            new_version.complete_guards[level] = complete.into_iter().collect();

            // Collect the surviving files
            let mut seen_file_numbers: HashSet<u64> = HashSet::new();
            let mut surviving: Vec<Arc<FileMetadata>> = vec![];
            for file in base
                .files_at_level(level)
                .into_iter()
                .chain(self.added_files[level].iter().map(Arc::clone))
            {
                if self.deleted_files[level].contains(&file.file_number()) {
                    continue;
                }
                if !seen_file_numbers.insert(file.file_number()) {
                    continue;
                }
                surviving.push(file);
            }

            // Partition the surviving files by the merged guard set
            let mut guard_partitions: Vec<GuardMetadata> = committed_keys
                .iter()
                .map(|key| GuardMetadata::new(key.clone()))
                .collect();
            let mut sentinel: Vec<Arc<FileMetadata>> = vec![];
            for file in surviving {
                let assigned_partition = guards::partition_for_key_in_keys(
                    &committed_keys,
                    file.smallest_key().get_user_key(),
                );
                match assigned_partition {
                    None => sentinel.push(file),
                    Some(guard_index) => guard_partitions[guard_index].add_file(file),
                }
            }
            sentinel.sort_by(|a, b| {
                a.smallest_key()
                    .cmp(b.smallest_key())
                    .then(a.file_number().cmp(&b.file_number()))
            });

            if level > 0 {
                VersionBuilder::debug_check_partition_disjointness(level, &guard_partitions);
            }

            new_version.sentinel_files[level] = sentinel;
            new_version.guards[level] =
                guard_partitions.into_iter().map(Arc::new).collect();
        }

        new_version
    }
}

/// Private methods
impl VersionBuilder {
    /// In non-optimized builds, assert that no partition holds overlapping files.
    fn debug_check_partition_disjointness(level: usize, partitions: &[GuardMetadata]) {
        if !cfg!(debug_assertions) {
            return;
        }

        for partition in partitions {
            let files = partition.get_files();
            for window in files.windows(2) {
                debug_assert!(
                    window[0].largest_key() < window[1].smallest_key(),
                    "Files {first} and {second} overlap within a partition at level {level}.",
                    first = window[0].file_number(),
                    second = window[1].file_number()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::RwLock;
    use pretty_assertions::assert_eq;

    use crate::key::{InternalKey, Operation};
    use crate::options::DbOptions;
    use crate::table_cache::TableCache;
    use crate::utils::linked_list::Node;

    use super::*;

    fn base_version_node() -> SharedNode<Version> {
        let options = DbOptions::with_memory_env();
        let table_cache = Arc::new(TableCache::new(options.clone(), 10));
        Arc::new(RwLock::new(Node::new(Version::new(
            options,
            &table_cache,
            1,
            1,
        ))))
    }

    fn key_range(start: &[u8], end: &[u8]) -> std::ops::Range<InternalKey> {
        InternalKey::new(start.to_vec(), 1, Operation::Put)
            ..InternalKey::new(end.to_vec(), 2, Operation::Put)
    }

    #[test]
    fn added_files_land_in_their_guard_partitions() {
        let base = base_version_node();
        let mut builder = VersionBuilder::new(base);

        let mut edit = VersionEdit::default();
        edit.add_guard(2, GuardKey::new(b"m".to_vec()));
        edit.add_file(2, 10, 1024, key_range(b"a", b"c"));
        edit.add_file(2, 11, 1024, key_range(b"m", b"p"));
        edit.add_file(2, 12, 1024, key_range(b"q", b"s"));
        builder.accumulate_changes(&edit);

        let new_version = builder.apply_changes(5, 100);

        assert_eq!(new_version.num_sentinel_files_at_level(2), 1);
        assert_eq!(new_version.num_guards_at_level(2), 1);
        assert_eq!(new_version.num_guard_files_at_level(2), 2);
        assert_eq!(new_version.num_files_at_level(2), 3);
    }

    #[test]
    fn committed_guards_propagate_to_deeper_levels() {
        let base = base_version_node();
        let mut builder = VersionBuilder::new(base);

        let mut edit = VersionEdit::default();
        edit.add_guard(2, GuardKey::new(b"m".to_vec()));
        builder.accumulate_changes(&edit);

        let new_version = builder.apply_changes(5, 100);

        for level in 2..MAX_NUM_LEVELS {
            assert_eq!(
                new_version.num_guards_at_level(level),
                1,
                "The guard should be committed at level {level}."
            );
            assert!(
                new_version.complete_guards[level]
                    .contains(&GuardKey::new(b"m".to_vec())),
                "The guard should be complete at level {level}."
            );
        }
        assert_eq!(new_version.num_guards_at_level(1), 0);
    }

    #[test]
    fn deleted_files_are_absent_from_the_new_version() {
        let base = base_version_node();

        let mut setup_builder = VersionBuilder::new(Arc::clone(&base));
        let mut setup_edit = VersionEdit::default();
        for file_number in 1..5_u64 {
            let start = format!("{:03}", file_number * 100);
            let end = format!("{:03}", file_number * 100 + 99);
            setup_edit.add_file(
                3,
                file_number,
                1024,
                key_range(start.as_bytes(), end.as_bytes()),
            );
        }
        setup_builder.accumulate_changes(&setup_edit);
        let populated = setup_builder.apply_changes(5, 100);
        let populated_node = Arc::new(RwLock::new(Node::new(populated)));

        let mut builder = VersionBuilder::new(populated_node);
        let mut edit = VersionEdit::default();
        edit.remove_file(3, 2);
        builder.accumulate_changes(&edit);
        let new_version = builder.apply_changes(6, 200);

        assert_eq!(new_version.num_files_at_level(3), 3);
        assert!(new_version
            .files_at_level(3)
            .iter()
            .all(|file| file.file_number() != 2));
    }

    #[test]
    fn a_file_added_after_deletion_in_a_later_edit_survives() {
        let base = base_version_node();
        let mut builder = VersionBuilder::new(base);

        let mut first_edit = VersionEdit::default();
        first_edit.remove_file(4, 42);
        builder.accumulate_changes(&first_edit);

        let mut second_edit = VersionEdit::default();
        second_edit.add_file(4, 42, 2048, key_range(b"d", b"g"));
        builder.accumulate_changes(&second_edit);

        let new_version = builder.apply_changes(5, 100);
        assert_eq!(new_version.num_files_at_level(4), 1);
    }

    #[test]
    fn complete_guards_do_not_partition_files() {
        let base = base_version_node();
        let mut builder = VersionBuilder::new(base);

        let mut edit = VersionEdit::default();
        edit.add_complete_guard(1, GuardKey::new(b"m".to_vec()));
        edit.add_file(1, 7, 512, key_range(b"m", b"z"));
        builder.accumulate_changes(&edit);

        let new_version = builder.apply_changes(5, 100);

        assert_eq!(new_version.num_guards_at_level(1), 0);
        assert_eq!(new_version.num_sentinel_files_at_level(1), 1);
        assert!(new_version.complete_guards[1].contains(&GuardKey::new(b"m".to_vec())));
    }
}
