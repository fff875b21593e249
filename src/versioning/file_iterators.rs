/*!
Iterators that stitch together the files of a version.

Two shapes are needed: a concatenating cursor over the disjoint, sorted files of one guard
partition (files are opened lazily as the cursor crosses file boundaries), and a merging cursor
that interleaves an arbitrary set of child cursors in internal key order while supporting both
traversal directions.
*/

use std::sync::Arc;

use crate::errors::{CairnDBError, CairnDBResult};
use crate::iterator::StorageIterator;
use crate::key::InternalKey;
use crate::options::ReadOptions;
use crate::table_cache::TableCache;
use crate::tables::{Table, TableIterator};

use super::file_metadata::FileMetadata;

/**
A cursor concatenating the files of one guard partition.

# Invariants

The file list must be sorted by smallest key with pairwise disjoint key ranges, which is
exactly what a guard partition at a level >= 1 guarantees.
*/
pub(crate) struct LevelPartitionIterator {
    /// The cache used to open table readers.
    table_cache: Arc<TableCache>,

    /// Read options forwarded to the table iterators.
    read_options: ReadOptions,

    /// The partition's files in key order.
    files: Vec<Arc<FileMetadata>>,

    /// The position of the open file within `files`.
    file_index: usize,

    /// The cursor over the open file.
    table_iterator: Option<TableIterator>,
}

/// Crate-only methods
impl LevelPartitionIterator {
    /// Create a new instance of [`LevelPartitionIterator`].
    pub(crate) fn new(
        table_cache: Arc<TableCache>,
        read_options: ReadOptions,
        files: Vec<Arc<FileMetadata>>,
    ) -> Self {
        Self {
            table_cache,
            read_options,
            files,
            file_index: 0,
            table_iterator: None,
        }
    }
}

/// Private methods
impl LevelPartitionIterator {
    /// Open a cursor over the file at `file_index`.
    fn open_file(&mut self, file_index: usize) -> CairnDBResult<&mut TableIterator> {
        let file_number = self.files[file_index].file_number();
        let table: Arc<Table> = self
            .table_cache
            .find_table(file_number)
            .map_err(CairnDBError::TableRead)?;

        self.file_index = file_index;
        self.table_iterator = Some(Table::iter_with(table, self.read_options.clone()));

        Ok(self.table_iterator.as_mut().unwrap())
    }

    /// Invalidate the cursor.
    fn invalidate(&mut self) {
        self.table_iterator = None;
    }
}

impl StorageIterator for LevelPartitionIterator {
    fn seek(&mut self, target: &InternalKey) -> CairnDBResult<()> {
        // Find the first file whose largest key reaches the target
        let file_index = self
            .files
            .partition_point(|file| file.largest_key() < target);
        if file_index >= self.files.len() {
            self.invalidate();
            return Ok(());
        }

        let table_iterator = self.open_file(file_index)?;
        table_iterator.seek(target)?;
        if !self
            .table_iterator
            .as_ref()
            .map(|iter| iter.is_valid())
            .unwrap_or(false)
        {
            self.invalidate();
        }

        Ok(())
    }

    fn seek_to_first(&mut self) -> CairnDBResult<()> {
        if self.files.is_empty() {
            self.invalidate();
            return Ok(());
        }

        let table_iterator = self.open_file(0)?;
        table_iterator.seek_to_first()?;

        Ok(())
    }

    fn seek_to_last(&mut self) -> CairnDBResult<()> {
        if self.files.is_empty() {
            self.invalidate();
            return Ok(());
        }

        let last_index = self.files.len() - 1;
        let table_iterator = self.open_file(last_index)?;
        table_iterator.seek_to_last()?;

        Ok(())
    }

    fn next(&mut self) -> Option<(&InternalKey, &Vec<u8>)> {
        self.table_iterator.as_ref()?;

        let advanced = self.table_iterator.as_mut().unwrap().next().is_some();
        if !advanced {
            // Cross into the next file, if there is one
            if self.file_index + 1 >= self.files.len() {
                self.invalidate();
                return None;
            }
            let next_index = self.file_index + 1;
            match self.open_file(next_index) {
                Ok(table_iterator) => {
                    if table_iterator.seek_to_first().is_err() {
                        self.invalidate();
                        return None;
                    }
                }
                Err(error) => {
                    log::error!(
                        "Failed to open the next file in a level partition. Error: {error}"
                    );
                    self.invalidate();
                    return None;
                }
            }
        }

        self.current()
    }

    fn prev(&mut self) -> Option<(&InternalKey, &Vec<u8>)> {
        self.table_iterator.as_ref()?;

        let retreated = self.table_iterator.as_mut().unwrap().prev().is_some();
        if !retreated {
            // Cross into the previous file, if there is one
            if self.file_index == 0 {
                self.invalidate();
                return None;
            }
            let previous_index = self.file_index - 1;
            match self.open_file(previous_index) {
                Ok(table_iterator) => {
                    if table_iterator.seek_to_last().is_err() {
                        self.invalidate();
                        return None;
                    }
                }
                Err(error) => {
                    log::error!(
                        "Failed to open the previous file in a level partition. Error: {error}"
                    );
                    self.invalidate();
                    return None;
                }
            }
        }

        self.current()
    }

    fn current(&self) -> Option<(&InternalKey, &Vec<u8>)> {
        self.table_iterator
            .as_ref()
            .and_then(|table_iterator| table_iterator.current())
    }

    fn is_valid(&self) -> bool {
        self.table_iterator
            .as_ref()
            .map(|table_iterator| table_iterator.is_valid())
            .unwrap_or(false)
    }
}

/// The traversal direction a [`MergingIterator`] most recently moved in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Direction {
    /// Moving toward larger keys.
    Forward,

    /// Moving toward smaller keys.
    Reverse,
}

/**
A cursor merging an arbitrary set of child cursors in internal key order.

Children are ranked newest source first: when two children are positioned at equal keys the
earlier child wins, so callers must order children from newest data (memtable) to oldest
(deep levels). Switching traversal direction re-aligns every child around the current key.
*/
pub(crate) struct MergingIterator {
    /// The child cursors, ordered newest source first.
    children: Vec<Box<dyn StorageIterator>>,

    /// The index of the child the cursor is currently positioned on.
    current_child: Option<usize>,

    /// The direction of the most recent movement.
    direction: Direction,
}

/// Crate-only methods
impl MergingIterator {
    /// Create a new instance of [`MergingIterator`].
    pub(crate) fn new(children: Vec<Box<dyn StorageIterator>>) -> Self {
        Self {
            children,
            current_child: None,
            direction: Direction::Forward,
        }
    }
}

/// Private methods
impl MergingIterator {
    /// Point the cursor at the child with the smallest current key.
    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (child_index, child) in self.children.iter().enumerate() {
            if let Some((key, _)) = child.current() {
                let replace = match smallest {
                    None => true,
                    Some(best_index) => {
                        let (best_key, _) = self.children[best_index].current().unwrap();
                        key < best_key
                    }
                };
                if replace {
                    smallest = Some(child_index);
                }
            }
        }

        self.current_child = smallest;
    }

    /// Point the cursor at the child with the largest current key.
    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for (child_index, child) in self.children.iter().enumerate() {
            if let Some((key, _)) = child.current() {
                let replace = match largest {
                    None => true,
                    Some(best_index) => {
                        let (best_key, _) = self.children[best_index].current().unwrap();
                        key > best_key
                    }
                };
                if replace {
                    largest = Some(child_index);
                }
            }
        }

        self.current_child = largest;
    }
}

impl StorageIterator for MergingIterator {
    fn seek(&mut self, target: &InternalKey) -> CairnDBResult<()> {
        for child in self.children.iter_mut() {
            child.seek(target)?;
        }
        self.direction = Direction::Forward;
        self.find_smallest();

        Ok(())
    }

    fn seek_to_first(&mut self) -> CairnDBResult<()> {
        for child in self.children.iter_mut() {
            child.seek_to_first()?;
        }
        self.direction = Direction::Forward;
        self.find_smallest();

        Ok(())
    }

    fn seek_to_last(&mut self) -> CairnDBResult<()> {
        for child in self.children.iter_mut() {
            child.seek_to_last()?;
        }
        self.direction = Direction::Reverse;
        self.find_largest();

        Ok(())
    }

    fn next(&mut self) -> Option<(&InternalKey, &Vec<u8>)> {
        let current_index = self.current_child?;
        let current_key = self.children[current_index].current()?.0.clone();

        if self.direction == Direction::Reverse {
            /*
            The non-current children sit before the current key from the reverse traversal.
            Re-seek them to the first key past the current one so that forward movement is
            consistent.
            */
            for (child_index, child) in self.children.iter_mut().enumerate() {
                if child_index == current_index {
                    continue;
                }
                if child.seek(&current_key).is_err() {
                    self.current_child = None;
                    return None;
                }
                if let Some((key, _)) = child.current() {
                    if *key == current_key {
                        child.next();
                    }
                }
            }
            self.direction = Direction::Forward;
        }

        self.children[current_index].next();
        self.find_smallest();

        self.current()
    }

    fn prev(&mut self) -> Option<(&InternalKey, &Vec<u8>)> {
        let current_index = self.current_child?;
        let current_key = self.children[current_index].current()?.0.clone();

        if self.direction == Direction::Forward {
            /*
            The non-current children sit at or past the current key from the forward
            traversal. Re-seek them to just before the current key.
            */
            for (child_index, child) in self.children.iter_mut().enumerate() {
                if child_index == current_index {
                    continue;
                }
                if child.seek(&current_key).is_err() {
                    self.current_child = None;
                    return None;
                }
                if child.is_valid() {
                    // Positioned at the first key >= current; step back once
                    child.prev();
                } else if child.seek_to_last().is_err() {
                    self.current_child = None;
                    return None;
                }
            }
            self.direction = Direction::Reverse;
        }

        self.children[current_index].prev();
        self.find_largest();

        self.current()
    }

    fn current(&self) -> Option<(&InternalKey, &Vec<u8>)> {
        let current_index = self.current_child?;
        self.children[current_index].current()
    }

    fn is_valid(&self) -> bool {
        self.current_child.is_some()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::key::Operation;
    use crate::memtable::{MemTable, SkipMapMemTable};

    use super::*;

    /// Build a memtable-backed child holding the given (user key, sequence) pairs.
    fn child_with_entries(entries: &[(&str, u64)]) -> Box<dyn StorageIterator> {
        let memtable = SkipMapMemTable::new();
        for (user_key, sequence) in entries {
            memtable.insert(
                InternalKey::new(user_key.as_bytes().to_vec(), *sequence, Operation::Put),
                format!("{user_key}@{sequence}").into_bytes(),
            );
        }

        memtable.iter()
    }

    #[test]
    fn merging_preserves_global_key_order() {
        let mut merged = MergingIterator::new(vec![
            child_with_entries(&[("b", 10), ("d", 11)]),
            child_with_entries(&[("a", 5), ("c", 6), ("e", 7)]),
        ]);

        merged.seek_to_first().unwrap();
        let mut visited = vec![];
        while let Some((key, _)) = merged.current() {
            visited.push(String::from_utf8_lossy(key.get_user_key()).into_owned());
            if merged.next().is_none() {
                break;
            }
        }

        assert_eq!(visited, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn newer_children_win_equal_user_keys() {
        // The same user key at different sequences: the newer entry (higher sequence) sorts
        // first in internal key order regardless of child order
        let mut merged = MergingIterator::new(vec![
            child_with_entries(&[("k", 20)]),
            child_with_entries(&[("k", 10)]),
        ]);

        merged.seek_to_first().unwrap();
        let (first_key, _) = merged.current().unwrap();
        assert_eq!(first_key.get_sequence_number(), 20);

        merged.next().unwrap();
        let (second_key, _) = merged.current().unwrap();
        assert_eq!(second_key.get_sequence_number(), 10);
    }

    #[test]
    fn direction_switches_reposition_all_children() {
        let mut merged = MergingIterator::new(vec![
            child_with_entries(&[("a", 1), ("c", 2)]),
            child_with_entries(&[("b", 3), ("d", 4)]),
        ]);

        merged.seek_to_first().unwrap();
        merged.next().unwrap();
        assert_eq!(merged.current().unwrap().0.get_user_key(), b"b");

        // Reverse: should land back on "a"
        let (key, _) = merged.prev().unwrap();
        assert_eq!(key.get_user_key(), b"a");

        // Forward again: back to "b"
        let (key, _) = merged.next().unwrap();
        assert_eq!(key.get_user_key(), b"b");
    }

    #[test]
    fn seeking_lands_on_the_first_key_at_or_after_the_target() {
        let mut merged = MergingIterator::new(vec![
            child_with_entries(&[("apple", 1), ("mango", 2)]),
            child_with_entries(&[("banana", 3), ("peach", 4)]),
        ]);

        merged
            .seek(&InternalKey::new_for_seeking(b"cherry".to_vec(), 100))
            .unwrap();

        assert_eq!(merged.current().unwrap().0.get_user_key(), b"mango");
    }

    #[test]
    fn an_empty_merge_is_invalid() {
        let mut merged = MergingIterator::new(vec![child_with_entries(&[])]);
        merged.seek_to_first().unwrap();

        assert!(!merged.is_valid());
        assert!(merged.current().is_none());
    }
}
