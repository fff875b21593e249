/*!
Metadata describing a single table file.
*/

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::Arc;

use crate::key::InternalKey;

/// Metadata about a table file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct FileMetadata {
    /// The globally increasing, sequential number identifying the on-disk file.
    file_number: u64,

    /// The size of the table file in bytes.
    file_size: u64,

    /// The smallest internal key served by the table.
    smallest_key: Option<InternalKey>,

    /// The largest internal key served by the table.
    largest_key: Option<InternalKey>,
}

/// Crate-only methods
impl FileMetadata {
    /// Create a new instance of [`FileMetadata`] with its key range unset.
    pub(crate) fn new(file_number: u64) -> Self {
        Self {
            file_number,
            file_size: 0,
            smallest_key: None,
            largest_key: None,
        }
    }

    /// The file number.
    pub(crate) fn file_number(&self) -> u64 {
        self.file_number
    }

    /// The file size in bytes.
    pub(crate) fn get_file_size(&self) -> u64 {
        self.file_size
    }

    /// Set the file size in bytes.
    pub(crate) fn set_file_size(&mut self, file_size: u64) {
        self.file_size = file_size;
    }

    /**
    The smallest internal key served by the table.

    # Panics

    Panics if the key range has not been populated yet. File metadata only ever escapes its
    producing flush or compaction after the range is set.
    */
    pub(crate) fn smallest_key(&self) -> &InternalKey {
        self.smallest_key.as_ref().unwrap()
    }

    /// Set the smallest internal key served by the table.
    pub(crate) fn set_smallest_key(&mut self, key: Option<InternalKey>) {
        self.smallest_key = key;
    }

    /**
    The largest internal key served by the table.

    # Panics

    Panics if the key range has not been populated yet.
    */
    pub(crate) fn largest_key(&self) -> &InternalKey {
        self.largest_key.as_ref().unwrap()
    }

    /// Set the largest internal key served by the table.
    pub(crate) fn set_largest_key(&mut self, key: Option<InternalKey>) {
        self.largest_key = key;
    }

    /// Whether the file's key range contains `user_key`.
    pub(crate) fn contains_user_key(&self, user_key: &[u8]) -> bool {
        self.smallest_key().get_user_key() <= user_key
            && user_key <= self.largest_key().get_user_key()
    }

    /**
    Whether the file's key range overlaps the user key range
    [`smallest_user_key`, `largest_user_key`].

    [`None`] endpoints are unbounded.
    */
    pub(crate) fn overlaps_user_key_range(
        &self,
        smallest_user_key: Option<&[u8]>,
        largest_user_key: Option<&[u8]>,
    ) -> bool {
        if let Some(range_end) = largest_user_key {
            if self.smallest_key().get_user_key() > range_end {
                return false;
            }
        }

        if let Some(range_start) = smallest_user_key {
            if self.largest_key().get_user_key() < range_start {
                return false;
            }
        }

        true
    }

    /// The combined key range of the provided files.
    pub(crate) fn get_key_range_for_files(files: &[Arc<FileMetadata>]) -> Range<InternalKey> {
        debug_assert!(!files.is_empty());

        let mut smallest = files[0].smallest_key().clone();
        let mut largest = files[0].largest_key().clone();
        for file in files.iter().skip(1) {
            if file.smallest_key() < &smallest {
                smallest = file.smallest_key().clone();
            }
            if file.largest_key() > &largest {
                largest = file.largest_key().clone();
            }
        }

        smallest..largest
    }
}

impl PartialEq for FileMetadata {
    fn eq(&self, other: &Self) -> bool {
        // File numbers are unique across a database's lifetime
        self.file_number == other.file_number
    }
}

impl Eq for FileMetadata {}

impl Hash for FileMetadata {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.file_number.hash(state);
    }
}
