/*!
A CairnDB-specific iterator abstraction with cursor-like behavior.

This differs from [`std::iter::DoubleEndedIterator`] in that a [`StorageIterator`] moves a single
cursor back and forth over the range of entries, whereas `DoubleEndedIterator` moves two pointers
toward each other and ends iteration when they cross.
*/

use crate::errors::CairnDBResult;
use crate::key::InternalKey;

/// A cursor over an ordered run of internal keys and values.
pub(crate) trait StorageIterator: Send {
    /**
    Position the cursor at the first entry with a key at or past `target`.

    The cursor may become invalid if no such entry exists.
    */
    fn seek(&mut self, target: &InternalKey) -> CairnDBResult<()>;

    /// Position the cursor at the first entry.
    fn seek_to_first(&mut self) -> CairnDBResult<()>;

    /// Position the cursor at the last entry.
    fn seek_to_last(&mut self) -> CairnDBResult<()>;

    /**
    Move to the next entry.

    Returns the key-value pair at the position moved to or [`None`] if the cursor moved past the
    last entry.
    */
    fn next(&mut self) -> Option<(&InternalKey, &Vec<u8>)>;

    /**
    Move to the previous entry.

    Returns the key-value pair at the position moved to or [`None`] if the cursor moved before
    the first entry.
    */
    fn prev(&mut self) -> Option<(&InternalKey, &Vec<u8>)>;

    /// Return the entry at the current cursor position, if the cursor is valid.
    fn current(&self) -> Option<(&InternalKey, &Vec<u8>)>;

    /// Whether the cursor is currently positioned at an entry.
    fn is_valid(&self) -> bool;
}
