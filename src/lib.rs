/*!
CairnDB is an embedded, persistent, ordered key-value store built on a *guarded*
log-structured merge-tree.

Each level of the tree is partitioned by guard keys chosen deterministically from the data by
a hash rule. Files at levels below zero are disjoint within a partition, compactions move
whole partitions at a time, and the guard hierarchy nests so that a guard at one level is a
guard at every deeper level. The result is an ordered store with the write path of an LSM but
much less compaction rewriting than a classic leveled scheme.

The primary entry point is [`DB`].
*/

pub mod fs;

mod batch;
mod compaction;
mod config;
mod db;
mod db_iterator;
mod errors;
mod file_names;
mod guards;
mod iterator;
mod key;
mod logs;
mod memtable;
mod snapshots;
mod table_cache;
mod tables;
mod utils;
mod versioning;
mod writers;

pub mod comparator;
pub mod filter_policy;
pub mod options;

pub use batch::{Batch, BatchElement};
pub use config::TableFileCompressionType;
pub use db::DB;
pub use db_iterator::DbIterator;
pub use errors::{CairnDBError, CairnDBResult, DBIOError, LogIOError};
pub use key::Operation;
pub use options::{DbOptions, ReadOptions, WriteOptions};
pub use snapshots::Snapshot;
pub use tables::{BlockCacheKey, DataBlock};
pub use utils::cache::{Cache, LRUCache};
