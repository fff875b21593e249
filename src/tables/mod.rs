/*!
Table files are the immutable sorted runs that levels are made of.

A table file is a sequence of data blocks, an optional file-level filter block, an index block
mapping separator keys to data block locations, and a fixed footer. Each block is individually
compressed (optionally) and checksummed.
*/

pub(crate) mod block;
pub mod errors;
pub(crate) mod footer;
pub(crate) mod table;
pub(crate) mod table_builder;

pub use block::DataBlock;
pub(crate) use table::{Table, TableIterator};
pub(crate) use table_builder::TableBuilder;

use crate::key::{InternalKey, Operation};

/// The cache key for decoded blocks: the owning file number and the block offset.
pub type BlockCacheKey = (u64, u64);

/// The length of the per-block trailer: 1 compression type byte + 4 checksum bytes.
pub(crate) const BLOCK_TRAILER_LENGTH_BYTES: usize = 5;

/**
Build an index key standing in for every entry of a block whose user keys are at or below
`separator_user_key`.

Sequence number zero with the deletion tag is the maximal internal key for a user key (internal
keys order newest first within a user key), so this index key is >= every possible entry for
the separator's user key.
*/
pub(crate) fn index_key_for(separator_user_key: Vec<u8>) -> InternalKey {
    InternalKey::new(separator_user_key, 0, Operation::Delete)
}
