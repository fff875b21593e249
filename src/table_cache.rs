/*!
This module provides a thread-safe cache of open table file readers.
*/

use std::fmt;
use std::sync::Arc;

use crate::file_names::FileNameResolver;
use crate::fs::FileSystem;
use crate::key::InternalKey;
use crate::options::{DbOptions, ReadOptions};
use crate::tables::errors::{TableReadError, TableReadResult};
use crate::tables::Table;
use crate::utils::cache::{Cache, LRUCache};

type FileNumber = u64;

/// A thread-safe cache of table readers keyed by file number.
pub(crate) struct TableCache {
    /// Database options to refer to when opening table files.
    options: DbOptions,

    /// The underlying cache storing the table readers.
    cache: Box<dyn Cache<FileNumber, Arc<Table>>>,

    /// Utility resolving the paths of table files.
    file_name_resolver: FileNameResolver,

    /// A reference to the file system provider in use by the database.
    filesystem_provider: Arc<dyn FileSystem>,
}

/// Crate-only methods
impl TableCache {
    /// Create a new instance of a [`TableCache`] holding at most `capacity` open readers.
    pub(crate) fn new(options: DbOptions, capacity: usize) -> Self {
        let cache = Box::new(LRUCache::new(capacity));
        let file_name_resolver = options.file_name_resolver();
        let filesystem_provider = options.filesystem_provider();

        Self {
            options,
            cache,
            file_name_resolver,
            filesystem_provider,
        }
    }

    /**
    Look up `seek_key` in the specified table file.

    Returns the first entry at or after the seek key, which may belong to a different user
    key; callers compare user keys before interpreting the result.
    */
    pub(crate) fn get(
        &self,
        read_options: &ReadOptions,
        file_number: u64,
        seek_key: &InternalKey,
    ) -> TableReadResult<Option<(InternalKey, Vec<u8>)>> {
        let table = self.find_table(file_number)?;

        table.get(read_options, seek_key)
    }

    /// Remove the cached reader for the given file number.
    pub(crate) fn remove(&self, file_number: u64) {
        self.cache.remove(&file_number);
    }

    /// Get the (possibly cached) reader for the given table file.
    pub(crate) fn find_table(&self, file_number: u64) -> TableReadResult<Arc<Table>> {
        if let Some(cache_entry) = self.cache.get(&file_number) {
            return Ok(Arc::clone(&cache_entry));
        }

        // The reader was not cached so open the file, trying the current extension first and
        // the legacy extension second
        let table_file_path = self.file_name_resolver.get_table_file_path(file_number);
        let table_file = match self.filesystem_provider.open_file(&table_file_path) {
            Ok(file) => file,
            Err(primary_error) => {
                let legacy_path = self
                    .file_name_resolver
                    .get_legacy_table_file_path(file_number);
                match self.filesystem_provider.open_file(&legacy_path) {
                    Ok(file) => file,
                    Err(_) => {
                        return Err(TableReadError::IO(primary_error.into()));
                    }
                }
            }
        };

        let table_reader = Table::open(self.options.clone(), file_number, table_file)?;
        let shared_table = self.cache.insert(file_number, Arc::new(table_reader));

        Ok(Arc::clone(&shared_table))
    }
}

impl fmt::Debug for TableCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableCache")
            .field("options", &self.options)
            .finish()
    }
}
