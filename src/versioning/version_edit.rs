/*!
A version edit is the unit of change applied to the version set.

Flushes and compactions describe their effects as an edit: files added and removed per level,
guards committed per level, and candidate guards discovered along the way. Edits are serialized
to the manifest log; replaying the manifest reproduces the version state exactly.
*/

use bincode::Options;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::ops::Range;

use crate::guards::GuardKey;
use crate::key::InternalKey;

use super::errors::RecoverError;
use super::file_metadata::FileMetadata;

/// Identifies a file removed from a level.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub(crate) struct DeletedFile {
    /// The level the file is being removed from.
    pub(crate) level: usize,

    /// The number of the file being removed.
    pub(crate) file_number: u64,
}

/// A delta to apply atomically to the current version.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub(crate) struct VersionEdit {
    /// The file number of the write-ahead log for the active memtable.
    pub(crate) wal_file_number: Option<u64>,

    /**
    The file number of the write-ahead log backing the memtable currently being flushed.

    Zero means there is no such memtable and any older logs are obsolete.
    */
    pub(crate) prev_wal_file_number: Option<u64>,

    /// The file number counter to resume allocating from after recovery.
    pub(crate) next_file_number: Option<u64>,

    /// The last sequence number in use at the time of the edit.
    pub(crate) last_sequence_number: Option<u64>,

    /// New files to add, with the level each should be added at.
    pub(crate) new_files: Vec<(usize, FileMetadata)>,

    /// Files to remove.
    pub(crate) deleted_files: Vec<DeletedFile>,

    /**
    Guards to commit, with the shallowest level each is committed at.

    Committing a guard at a level commits it at every deeper level as well.
    */
    pub(crate) new_guards: Vec<(usize, GuardKey)>,

    /**
    Guard candidates discovered while writing files out, with the shallowest level each
    qualifies at. These only extend the complete sets; they do not partition files until
    committed.
    */
    pub(crate) new_complete_guards: Vec<(usize, GuardKey)>,
}

/// Crate-only methods
impl VersionEdit {
    /**
    Add a file with the specified number and key range at the specified level.

    # Invariants

    The smallest and largest keys recorded here must be the actual bounds of the file's
    contents.
    */
    pub(crate) fn add_file(
        &mut self,
        level: usize,
        file_number: u64,
        file_size: u64,
        key_range: Range<InternalKey>,
    ) {
        let mut metadata = FileMetadata::new(file_number);
        metadata.set_file_size(file_size);
        metadata.set_smallest_key(Some(key_range.start));
        metadata.set_largest_key(Some(key_range.end));

        self.new_files.push((level, metadata));
    }

    /// Mark the specified file for removal from the specified level.
    pub(crate) fn remove_file(&mut self, level: usize, file_number: u64) {
        self.deleted_files.push(DeletedFile { level, file_number });
    }

    /// Commit a guard at the specified level (and implicitly at every deeper level).
    pub(crate) fn add_guard(&mut self, level: usize, guard_key: GuardKey) {
        self.new_guards.push((level, guard_key));
    }

    /// Record a discovered guard candidate at the specified level.
    pub(crate) fn add_complete_guard(&mut self, level: usize, guard_key: GuardKey) {
        self.new_complete_guards.push((level, guard_key));
    }

    /// Returns true if the edit carries no changes.
    pub(crate) fn is_empty(&self) -> bool {
        self.wal_file_number.is_none()
            && self.prev_wal_file_number.is_none()
            && self.next_file_number.is_none()
            && self.last_sequence_number.is_none()
            && self.new_files.is_empty()
            && self.deleted_files.is_empty()
            && self.new_guards.is_empty()
            && self.new_complete_guards.is_empty()
    }
}

impl TryFrom<&[u8]> for VersionEdit {
    type Error = RecoverError;

    fn try_from(value: &[u8]) -> Result<VersionEdit, RecoverError> {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .deserialize(value)
            .map_err(|err| {
                RecoverError::ManifestParse(format!(
                    "Could not deserialize a manifest record into a version edit. Error: {err}"
                ))
            })
    }
}

impl From<&VersionEdit> for Vec<u8> {
    fn from(value: &VersionEdit) -> Vec<u8> {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .serialize(value)
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::key::Operation;

    use super::*;

    #[test]
    fn edits_round_trip_through_serialization() {
        let mut edit = VersionEdit {
            wal_file_number: Some(12),
            prev_wal_file_number: Some(0),
            next_file_number: Some(44),
            last_sequence_number: Some(100_000),
            ..VersionEdit::default()
        };
        edit.add_file(
            2,
            43,
            1024,
            InternalKey::new(b"aardvark".to_vec(), 5, Operation::Put)
                ..InternalKey::new(b"zebra".to_vec(), 99, Operation::Put),
        );
        edit.remove_file(1, 17);
        edit.add_guard(2, GuardKey::new(b"m".to_vec()));
        edit.add_complete_guard(3, GuardKey::new(b"q".to_vec()));

        let encoded: Vec<u8> = Vec::from(&edit);
        let decoded = VersionEdit::try_from(encoded.as_slice()).unwrap();

        assert_eq!(decoded.wal_file_number, Some(12));
        assert_eq!(decoded.next_file_number, Some(44));
        assert_eq!(decoded.last_sequence_number, Some(100_000));
        assert_eq!(decoded.new_files.len(), 1);
        assert_eq!(decoded.new_files[0].0, 2);
        assert_eq!(decoded.new_files[0].1.file_number(), 43);
        assert_eq!(
            decoded.deleted_files,
            vec![DeletedFile {
                level: 1,
                file_number: 17
            }]
        );
        assert_eq!(decoded.new_guards, vec![(2, GuardKey::new(b"m".to_vec()))]);
        assert_eq!(
            decoded.new_complete_guards,
            vec![(3, GuardKey::new(b"q".to_vec()))]
        );
    }

    #[test]
    fn an_empty_edit_knows_it_is_empty() {
        let edit = VersionEdit::default();
        assert!(edit.is_empty());

        let mut non_empty = VersionEdit::default();
        non_empty.remove_file(0, 1);
        assert!(!non_empty.is_empty());
    }
}
