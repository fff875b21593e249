/*!
This module holds the option structures that can be passed to CairnDB operations.
*/

use std::fmt;
use std::sync::Arc;

use crate::comparator::{BytewiseComparator, Comparator};
use crate::config::TableFileCompressionType;
use crate::file_names::FileNameResolver;
use crate::filter_policy::{BloomFilterPolicy, FilterPolicy};
use crate::fs::{FileSystem, InMemoryFileSystem, OsFileSystem};
use crate::snapshots::Snapshot;
use crate::tables::{BlockCacheKey, DataBlock};
use crate::utils::cache::{Cache, LRUCache};

/// The default number of decoded blocks the block cache will hold.
const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 1024;

/// Holds options that control database behavior.
#[derive(Clone)]
pub struct DbOptions {
    /**
    The path of the directory to use for the database's files.

    **This defaults to the current working directory.**
    */
    pub db_path: String,

    /**
    Create the database directory and initial state if none exists at `db_path`.

    **This defaults to false.**
    */
    pub create_if_missing: bool,

    /**
    Fail opening if a database already exists at `db_path`.

    **This defaults to false.**
    */
    pub error_if_exists: bool,

    /**
    Treat integrity check failures during recovery as fatal instead of truncating at the first
    bad record.

    **This defaults to false.**
    */
    pub paranoid_checks: bool,

    /**
    The maximum size in bytes that the memtable can reach before it is rotated out and flushed
    to disk.

    Up to two memtables can reside in memory at a time: one actively serving reads and writes
    and a second in the process of being flushed.

    **This defaults to 4 MiB.**
    */
    pub write_buffer_size: usize,

    /**
    The number of table files whose readers may be held open concurrently. This bounds the
    table cache.

    **This defaults to 1000.**
    */
    pub max_open_files: usize,

    /**
    The target size in bytes for files produced by flushes and compactions. An output file is
    closed and a new one started when it grows past this size.

    **This defaults to 2 MiB.**
    */
    pub max_file_size: usize,

    /**
    The approximate maximum size in bytes of uncompressed data packed into one table file
    block.

    **This defaults to 4 KiB.**
    */
    pub block_size: usize,

    /**
    The number of keys between restart points when prefix compressing keys in a block.

    **This defaults to 16.**
    */
    pub block_restart_interval: usize,

    /**
    The compression applied to table file blocks.

    **This defaults to Snappy.**
    */
    pub compression: TableFileCompressionType,

    /**
    A wrapper around a particular file system to use.

    **This defaults to [`OsFileSystem`](crate::fs::OsFileSystem).**
    */
    pub filesystem_provider: Arc<dyn FileSystem>,

    /**
    The comparator deciding the key order.

    **This defaults to [`BytewiseComparator`](crate::comparator::BytewiseComparator).**
    */
    pub comparator: Arc<dyn Comparator>,

    /**
    The filter policy used to build the file-level filters consulted on reads, or [`None`] to
    build tables without filters.

    **This defaults to a [`BloomFilterPolicy`](crate::filter_policy::BloomFilterPolicy) with 10
    bits per key.**
    */
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,

    /**
    The cache holding decoded table blocks.

    The cache stores uncompressed blocks, so its capacity should be tuned to the read working
    set of the application.

    **This defaults to an internal LRU cache holding 1024 blocks.**
    */
    pub block_cache: Arc<dyn Cache<BlockCacheKey, DataBlock>>,
}

/// Public methods
impl DbOptions {
    /**
    Create options suitable for hermetic tests: an in-memory file system rooted at a fixed
    path with database creation enabled.
    */
    pub fn with_memory_env() -> Self {
        DbOptions {
            db_path: "/cairndb-test".to_string(),
            create_if_missing: true,
            filesystem_provider: Arc::new(InMemoryFileSystem::new()),
            ..DbOptions::default()
        }
    }

    /// Get a strong reference to the file system provider.
    pub fn filesystem_provider(&self) -> Arc<dyn FileSystem> {
        Arc::clone(&self.filesystem_provider)
    }

    /// Get a strong reference to the comparator.
    pub fn comparator(&self) -> Arc<dyn Comparator> {
        Arc::clone(&self.comparator)
    }

    /// Get a strong reference to the filter policy, if one is configured.
    pub fn filter_policy(&self) -> Option<Arc<dyn FilterPolicy>> {
        self.filter_policy.as_ref().map(Arc::clone)
    }

    /// Get a strong reference to the block cache.
    pub fn block_cache(&self) -> Arc<dyn Cache<BlockCacheKey, DataBlock>> {
        Arc::clone(&self.block_cache)
    }

    /// Get a resolver for the file names used under this database's path.
    pub(crate) fn file_name_resolver(&self) -> FileNameResolver {
        FileNameResolver::new(self.db_path.clone())
    }
}

impl Default for DbOptions {
    fn default() -> Self {
        DbOptions {
            db_path: std::env::current_dir()
                .map(|dir| dir.to_string_lossy().into_owned())
                .unwrap_or_else(|_| ".".to_string()),
            create_if_missing: false,
            error_if_exists: false,
            paranoid_checks: false,
            write_buffer_size: 4 * 1024 * 1024,
            max_open_files: 1000,
            max_file_size: 2 * 1024 * 1024,
            block_size: 4 * 1024,
            block_restart_interval: 16,
            compression: TableFileCompressionType::Snappy,
            filesystem_provider: Arc::new(OsFileSystem::new()),
            comparator: Arc::new(BytewiseComparator),
            filter_policy: Some(Arc::new(BloomFilterPolicy::new(10))),
            block_cache: Arc::new(LRUCache::<BlockCacheKey, DataBlock>::new(
                DEFAULT_BLOCK_CACHE_CAPACITY,
            )),
        }
    }
}

impl fmt::Debug for DbOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbOptions")
            .field("db_path", &self.db_path)
            .field("create_if_missing", &self.create_if_missing)
            .field("error_if_exists", &self.error_if_exists)
            .field("paranoid_checks", &self.paranoid_checks)
            .field("write_buffer_size", &self.write_buffer_size)
            .field("max_open_files", &self.max_open_files)
            .field("max_file_size", &self.max_file_size)
            .field("block_size", &self.block_size)
            .field("block_restart_interval", &self.block_restart_interval)
            .field("compression", &self.compression)
            .field("filesystem_provider", &self.filesystem_provider.get_name())
            .field("comparator", &self.comparator.name())
            .field(
                "filter_policy",
                &self.filter_policy.as_ref().map(|policy| policy.name()),
            )
            .finish()
    }
}

/// Options for read operations.
#[derive(Clone, Default)]
pub struct ReadOptions {
    /**
    Read through the snapshot: only entries with a sequence number at or below the snapshot's
    are visible.

    **This defaults to [`None`], which reads the latest state.**
    */
    pub snapshot: Option<Snapshot>,

    /**
    Skip populating the block cache with blocks read by this operation.

    Bulk scans may want to set this to avoid evicting the point-read working set.

    **This defaults to false.**
    */
    pub skip_block_cache: bool,
}

/// Options for write operations.
#[derive(Clone, Copy, Debug, Default)]
pub struct WriteOptions {
    /**
    Force the write-ahead log down to persistent storage before the write returns.

    A write with `sync` set is durable once it returns. Unsynced writes can be lost if the
    machine crashes, though never out of order with respect to other writes.

    **This defaults to false.**
    */
    pub sync: bool,
}
