/*!
The memtable is the in-memory sorted buffer holding recent mutations.

Entries are keyed by [`InternalKey`] so multiple versions of the same user key coexist, newest
first. The active memtable serves reads and writes; once it fills up it is swapped into an
immutable slot and drained to level-0 table files by the flush worker.
*/

use crossbeam_skiplist::SkipMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::errors::CairnDBResult;
use crate::iterator::StorageIterator;
use crate::key::{InternalKey, Operation};

/// Fixed per-entry bookkeeping charged to the memory estimate on each insert.
const APPROXIMATE_ENTRY_OVERHEAD_BYTES: usize = 48;

/// The result of a memtable point lookup that found an entry for the user key.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum MemtableLookupResult {
    /// The newest visible entry is a value.
    Value(Vec<u8>),

    /// The newest visible entry is a tombstone.
    Deleted,
}

/// The interface that a data structure must implement to be used as a memtable in CairnDB.
pub(crate) trait MemTable: Send + Sync {
    /// Returns the approximate memory usage of the memtable in bytes.
    fn approximate_memory_usage(&self) -> usize;

    /// Insert a new entry into the memtable.
    fn insert(&self, key: InternalKey, value: Vec<u8>);

    /**
    Find the newest entry for the user key of `seek_key` visible at the seek key's sequence
    number.

    Returns [`None`] if no visible entry exists for the user key.
    */
    fn get(&self, seek_key: &InternalKey) -> Option<MemtableLookupResult>;

    /// Get a cursor over the memtable contents in internal key order.
    fn iter(&self) -> Box<dyn StorageIterator>;

    /// The number of entries currently stored.
    fn len(&self) -> usize;

    /// Returns true if the memtable holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A memtable backed by a lock-free skip list.
pub(crate) struct SkipMapMemTable {
    /**
    The underlying ordered store.

    Shared with cursors handed out by [`SkipMapMemTable::iter`] so that iteration does not
    require holding the database mutex.
    */
    store: Arc<SkipMap<InternalKey, Vec<u8>>>,

    /// A running estimate of the memory used by stored entries.
    approximate_size_bytes: AtomicUsize,
}

/// Crate-only methods
impl SkipMapMemTable {
    /// Create a new instance of [`SkipMapMemTable`].
    pub(crate) fn new() -> Self {
        Self {
            store: Arc::new(SkipMap::new()),
            approximate_size_bytes: AtomicUsize::new(0),
        }
    }
}

impl MemTable for SkipMapMemTable {
    fn approximate_memory_usage(&self) -> usize {
        self.approximate_size_bytes.load(Ordering::Acquire)
    }

    fn insert(&self, key: InternalKey, value: Vec<u8>) {
        let charged_bytes =
            key.get_user_key().len() + value.len() + APPROXIMATE_ENTRY_OVERHEAD_BYTES;
        self.approximate_size_bytes
            .fetch_add(charged_bytes, Ordering::AcqRel);

        self.store.insert(key, value);
    }

    fn get(&self, seek_key: &InternalKey) -> Option<MemtableLookupResult> {
        /*
        The first entry at or after the seek key is the newest entry for the seek key's user
        key with a sequence number at or below the seek key's, because internal keys order by
        user key ascending and then sequence number descending.
        */
        let entry = self
            .store
            .lower_bound(Bound::Included(seek_key))?;
        if entry.key().get_user_key() != seek_key.get_user_key() {
            return None;
        }

        match entry.key().get_operation() {
            Operation::Put => Some(MemtableLookupResult::Value(entry.value().clone())),
            Operation::Delete => Some(MemtableLookupResult::Deleted),
        }
    }

    fn iter(&self) -> Box<dyn StorageIterator> {
        Box::new(MemTableIterator {
            store: Arc::clone(&self.store),
            current: None,
        })
    }

    fn len(&self) -> usize {
        self.store.len()
    }
}

/**
A cursor over a [`SkipMapMemTable`].

The cursor stores the current entry by value and re-seeks through the skip list's bound lookups
for movement. This keeps the cursor free of borrows into the map, so it can outlive the
database mutex and coexist with concurrent inserts; entries inserted behind the cursor are
simply not revisited.
*/
struct MemTableIterator {
    /// The skip list being iterated.
    store: Arc<SkipMap<InternalKey, Vec<u8>>>,

    /// The entry at the current cursor position.
    current: Option<(InternalKey, Vec<u8>)>,
}

impl MemTableIterator {
    /// Return references into the cached current entry.
    fn current_entry(&self) -> Option<(&InternalKey, &Vec<u8>)> {
        self.current.as_ref().map(|(key, value)| (key, value))
    }
}

impl StorageIterator for MemTableIterator {
    fn seek(&mut self, target: &InternalKey) -> CairnDBResult<()> {
        self.current = self
            .store
            .lower_bound(Bound::Included(target))
            .map(|entry| (entry.key().clone(), entry.value().clone()));

        Ok(())
    }

    fn seek_to_first(&mut self) -> CairnDBResult<()> {
        self.current = self
            .store
            .front()
            .map(|entry| (entry.key().clone(), entry.value().clone()));

        Ok(())
    }

    fn seek_to_last(&mut self) -> CairnDBResult<()> {
        self.current = self
            .store
            .back()
            .map(|entry| (entry.key().clone(), entry.value().clone()));

        Ok(())
    }

    fn next(&mut self) -> Option<(&InternalKey, &Vec<u8>)> {
        let (current_key, _) = self.current.take()?;
        self.current = self
            .store
            .lower_bound(Bound::Excluded(&current_key))
            .map(|entry| (entry.key().clone(), entry.value().clone()));

        self.current_entry()
    }

    fn prev(&mut self) -> Option<(&InternalKey, &Vec<u8>)> {
        let (current_key, _) = self.current.take()?;
        self.current = self
            .store
            .upper_bound(Bound::Excluded(&current_key))
            .map(|entry| (entry.key().clone(), entry.value().clone()));

        self.current_entry()
    }

    fn current(&self) -> Option<(&InternalKey, &Vec<u8>)> {
        self.current_entry()
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }
}
