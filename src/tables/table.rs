/*!
This module contains the reader for table files.
*/

use integer_encoding::VarInt;
use std::sync::Arc;

use crate::errors::{CairnDBError, CairnDBResult};
use crate::fs::ReadonlyRandomAccessFile;
use crate::iterator::StorageIterator;
use crate::key::InternalKey;
use crate::options::{DbOptions, ReadOptions};

use super::block::DataBlock;
use super::errors::{TableReadError, TableReadResult};
use super::footer::{BlockHandle, Footer, FOOTER_LENGTH_BYTES};
use super::table_builder::read_physical_block;

/// An open, immutable table file.
pub(crate) struct Table {
    /// Database options sourcing the block cache and filter policy.
    options: DbOptions,

    /// The file number of this table.
    file_number: u64,

    /// The underlying file.
    file: Box<dyn ReadonlyRandomAccessFile>,

    /// The decoded index: one separator key and block handle per data block, in key order.
    index_entries: Vec<(InternalKey, BlockHandle)>,

    /// The serialized file-level filter, if the file has one the configured policy understands.
    filter: Option<Vec<u8>>,
}

/// Crate-only methods
impl Table {
    /// Open a table file and load its index and filter.
    pub(crate) fn open(
        options: DbOptions,
        file_number: u64,
        file: Box<dyn ReadonlyRandomAccessFile>,
    ) -> TableReadResult<Table> {
        let file_length = file.len()? as usize;
        if file_length < FOOTER_LENGTH_BYTES {
            return Err(TableReadError::Corruption(format!(
                "Table file {file_number} is too small to contain a footer."
            )));
        }

        let mut footer_buffer = vec![0_u8; FOOTER_LENGTH_BYTES];
        file.read_from(&mut footer_buffer, file_length - FOOTER_LENGTH_BYTES)?;
        let footer = Footer::decode(&footer_buffer)?;

        let index_payload = read_physical_block(file.as_ref(), footer.get_index_handle())?;
        let index_block = DataBlock::decode(&index_payload)?;
        let mut index_entries = Vec::with_capacity(index_block.len());
        for (key, value) in index_block.entries() {
            let (handle, _) = BlockHandle::decode(value)?;
            index_entries.push((key.clone(), handle));
        }

        let filter = match footer.get_filter_handle() {
            None => None,
            Some(filter_handle) => {
                let filter_payload = read_physical_block(file.as_ref(), filter_handle)?;
                Table::parse_filter_payload(&options, file_number, &filter_payload)?
            }
        };

        Ok(Table {
            options,
            file_number,
            file,
            index_entries,
            filter,
        })
    }

    /**
    Look up the first entry at or after `seek_key`.

    Consults the file-level filter first; on a filter miss no blocks are read. The returned
    entry may belong to a different user key than the seek key's, so callers must compare user
    keys before interpreting the result.
    */
    pub(crate) fn get(
        &self,
        read_options: &ReadOptions,
        seek_key: &InternalKey,
    ) -> TableReadResult<Option<(InternalKey, Vec<u8>)>> {
        if let (Some(filter), Some(policy)) = (self.filter.as_ref(), self.options.filter_policy())
        {
            if !policy.key_may_match(seek_key.get_user_key(), filter) {
                return Ok(None);
            }
        }

        let mut index_position = self
            .index_entries
            .partition_point(|(index_key, _)| index_key < seek_key);
        while index_position < self.index_entries.len() {
            let block = self.read_block(read_options, index_position)?;
            if let Some(entry_index) = block.find_entry_at_or_after(seek_key) {
                let (key, value) = &block.entries()[entry_index];
                return Ok(Some((key.clone(), value.clone())));
            }

            // The seek key orders past every entry of this block; the next block's first
            // entry is the answer if it exists
            index_position += 1;
        }

        Ok(None)
    }

    /// The file number of this table.
    pub(crate) fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Get a cursor over the entries of the table.
    pub(crate) fn iter_with(table: Arc<Table>, read_options: ReadOptions) -> TableIterator {
        TableIterator {
            table,
            read_options,
            block_index: None,
            block: None,
            entry_index: 0,
            current: None,
        }
    }
}

/// Private methods
impl Table {
    /// Parse a filter block payload, dropping filters built by an unknown policy.
    fn parse_filter_payload(
        options: &DbOptions,
        file_number: u64,
        payload: &[u8],
    ) -> TableReadResult<Option<Vec<u8>>> {
        let (name_length, consumed) = u64::decode_var(payload).ok_or_else(|| {
            TableReadError::Corruption(format!(
                "Could not decode the filter policy name length in table file {file_number}."
            ))
        })?;
        let name_end = consumed + name_length as usize;
        if payload.len() < name_end {
            return Err(TableReadError::Corruption(format!(
                "The filter block of table file {file_number} is shorter than its recorded \
                policy name."
            )));
        }

        let stored_name = String::from_utf8_lossy(&payload[consumed..name_end]);
        match options.filter_policy() {
            Some(policy) if policy.name() == stored_name => {
                Ok(Some(payload[name_end..].to_vec()))
            }
            _ => {
                log::warn!(
                    "Table file {file_number} carries a filter built by policy \
                    {stored_name:?} which is not the configured policy. Ignoring the filter."
                );
                Ok(None)
            }
        }
    }

    /// Read the data block at the given index position, going through the block cache.
    fn read_block(
        &self,
        read_options: &ReadOptions,
        index_position: usize,
    ) -> TableReadResult<Arc<DataBlock>> {
        let handle = self.index_entries[index_position].1;
        let cache_key = (self.file_number, handle.get_offset());

        let block_cache = self.options.block_cache();
        if let Some(cached_block) = block_cache.get(&cache_key) {
            return Ok(cached_block);
        }

        let payload = read_physical_block(self.file.as_ref(), handle)?;
        let block = DataBlock::decode(&payload)?;
        if read_options.skip_block_cache {
            return Ok(Arc::new(block));
        }

        Ok(block_cache.insert(cache_key, block))
    }
}

/// A cursor over the entries of a table file.
pub(crate) struct TableIterator {
    /// The table being iterated.
    table: Arc<Table>,

    /// Read options controlling block cache usage.
    read_options: ReadOptions,

    /// The index position of the loaded block.
    block_index: Option<usize>,

    /// The currently loaded block.
    block: Option<Arc<DataBlock>>,

    /// The position within the loaded block.
    entry_index: usize,

    /// The entry at the current cursor position.
    current: Option<(InternalKey, Vec<u8>)>,
}

/// Private methods
impl TableIterator {
    /// Load the block at the given index position, remembering it as current.
    fn load_block(&mut self, index_position: usize) -> CairnDBResult<Arc<DataBlock>> {
        if self.block_index == Some(index_position) {
            if let Some(block) = self.block.as_ref() {
                return Ok(Arc::clone(block));
            }
        }

        let block = self
            .table
            .read_block(&self.read_options, index_position)
            .map_err(CairnDBError::TableRead)?;
        self.block_index = Some(index_position);
        self.block = Some(Arc::clone(&block));

        Ok(block)
    }

    /// Position the cursor at the given block and entry, caching the entry.
    fn position_at(&mut self, index_position: usize, entry_index: usize) -> CairnDBResult<()> {
        let block = self.load_block(index_position)?;
        let (key, value) = &block.entries()[entry_index];
        self.entry_index = entry_index;
        self.current = Some((key.clone(), value.clone()));

        Ok(())
    }

    /// Invalidate the cursor.
    fn invalidate(&mut self) {
        self.current = None;
    }

    /// Return references into the cached current entry.
    fn current_entry(&self) -> Option<(&InternalKey, &Vec<u8>)> {
        self.current.as_ref().map(|(key, value)| (key, value))
    }

    /// The number of blocks in the table.
    fn num_blocks(&self) -> usize {
        self.table.index_entries.len()
    }
}

impl StorageIterator for TableIterator {
    fn seek(&mut self, target: &InternalKey) -> CairnDBResult<()> {
        let mut index_position = self
            .table
            .index_entries
            .partition_point(|(index_key, _)| index_key < target);

        while index_position < self.num_blocks() {
            let block = self.load_block(index_position)?;
            if let Some(entry_index) = block.find_entry_at_or_after(target) {
                return self.position_at(index_position, entry_index);
            }
            index_position += 1;
        }

        self.invalidate();
        Ok(())
    }

    fn seek_to_first(&mut self) -> CairnDBResult<()> {
        let mut index_position = 0;
        while index_position < self.num_blocks() {
            let block = self.load_block(index_position)?;
            if !block.is_empty() {
                return self.position_at(index_position, 0);
            }
            index_position += 1;
        }

        self.invalidate();
        Ok(())
    }

    fn seek_to_last(&mut self) -> CairnDBResult<()> {
        let mut index_position = self.num_blocks();
        while index_position > 0 {
            index_position -= 1;
            let block = self.load_block(index_position)?;
            if !block.is_empty() {
                return self.position_at(index_position, block.len() - 1);
            }
        }

        self.invalidate();
        Ok(())
    }

    fn next(&mut self) -> Option<(&InternalKey, &Vec<u8>)> {
        self.current.as_ref()?;
        let current_block_index = self.block_index?;
        let block_length = self.block.as_ref().map(|block| block.len())?;

        if self.entry_index + 1 < block_length {
            if self.position_at(current_block_index, self.entry_index + 1).is_err() {
                self.invalidate();
                return None;
            }
            return self.current_entry();
        }

        // Move to the first entry of the next non-empty block
        let mut index_position = current_block_index + 1;
        while index_position < self.num_blocks() {
            match self.load_block(index_position) {
                Ok(block) if !block.is_empty() => {
                    if self.position_at(index_position, 0).is_err() {
                        self.invalidate();
                        return None;
                    }
                    return self.current_entry();
                }
                Ok(_) => index_position += 1,
                Err(error) => {
                    log::error!(
                        "Failed to advance a table iterator for file {number}. Error: {error}",
                        number = self.table.file_number
                    );
                    self.invalidate();
                    return None;
                }
            }
        }

        self.invalidate();
        None
    }

    fn prev(&mut self) -> Option<(&InternalKey, &Vec<u8>)> {
        self.current.as_ref()?;
        let current_block_index = self.block_index?;

        if self.entry_index > 0 {
            if self.position_at(current_block_index, self.entry_index - 1).is_err() {
                self.invalidate();
                return None;
            }
            return self.current_entry();
        }

        // Move to the last entry of the previous non-empty block
        let mut index_position = current_block_index;
        while index_position > 0 {
            index_position -= 1;
            match self.load_block(index_position) {
                Ok(block) if !block.is_empty() => {
                    let last_entry = block.len() - 1;
                    if self.position_at(index_position, last_entry).is_err() {
                        self.invalidate();
                        return None;
                    }
                    return self.current_entry();
                }
                Ok(_) => {}
                Err(error) => {
                    log::error!(
                        "Failed to rewind a table iterator for file {number}. Error: {error}",
                        number = self.table.file_number
                    );
                    self.invalidate();
                    return None;
                }
            }
        }

        self.invalidate();
        None
    }

    fn current(&self) -> Option<(&InternalKey, &Vec<u8>)> {
        self.current_entry()
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }
}

#[cfg(test)]
mod tests {
    use integer_encoding::FixedInt;
    use pretty_assertions::assert_eq;

    use crate::key::Operation;
    use crate::tables::TableBuilder;

    use super::*;

    const NUM_ENTRIES: u64 = 3000;

    /// Build table file 1 with `NUM_ENTRIES` numeric keys and open a reader over it.
    fn build_and_open_table(options: &DbOptions) -> Table {
        options
            .filesystem_provider()
            .create_dir_all(&options.file_name_resolver().get_db_path())
            .unwrap();

        let mut builder = TableBuilder::new(options.clone(), 1).unwrap();
        for n in 0..NUM_ENTRIES {
            let key = InternalKey::new(
                format!("{:08}", 100_000 + n).into_bytes(),
                n + 1,
                Operation::Put,
            );
            builder
                .add_entry(&key, &u64::encode_fixed_vec(100_000 + n))
                .unwrap();
        }
        builder.finalize().unwrap();

        let file_path = options.file_name_resolver().get_table_file_path(1);
        let file = options.filesystem_provider().open_file(&file_path).unwrap();
        Table::open(options.clone(), 1, file).unwrap()
    }

    fn options_with_small_blocks() -> DbOptions {
        let mut options = DbOptions::with_memory_env();
        options.block_size = 256;
        options
    }

    #[test]
    fn point_lookups_find_stored_entries() {
        let options = options_with_small_blocks();
        let table = build_and_open_table(&options);

        let seek_key = InternalKey::new_for_seeking(b"00101500".to_vec(), u64::MAX >> 8);
        let (found_key, found_value) = table
            .get(&ReadOptions::default(), &seek_key)
            .unwrap()
            .unwrap();

        assert_eq!(found_key.get_user_key(), b"00101500");
        assert_eq!(found_value, u64::encode_fixed_vec(101_500));
    }

    #[test]
    fn point_lookups_past_the_last_key_find_nothing() {
        let options = options_with_small_blocks();
        let table = build_and_open_table(&options);

        let seek_key = InternalKey::new_for_seeking(b"99999999".to_vec(), u64::MAX >> 8);
        assert!(table
            .get(&ReadOptions::default(), &seek_key)
            .unwrap()
            .is_none());
    }

    #[test]
    fn iteration_covers_every_entry_in_order() {
        let options = options_with_small_blocks();
        let table = Arc::new(build_and_open_table(&options));

        let mut iter = Table::iter_with(Arc::clone(&table), ReadOptions::default());
        iter.seek_to_first().unwrap();

        let mut count: u64 = 0;
        let mut previous_key: Option<InternalKey> = None;
        loop {
            let (key, _) = match iter.current() {
                Some(entry) => (entry.0.clone(), entry.1.clone()),
                None => break,
            };
            if let Some(previous) = previous_key.as_ref() {
                assert!(previous < &key, "Iteration must be strictly ascending.");
            }
            previous_key = Some(key);
            count += 1;
            if iter.next().is_none() {
                break;
            }
        }

        assert_eq!(count, NUM_ENTRIES);
    }

    #[test]
    fn iterators_can_reverse_direction() {
        let options = options_with_small_blocks();
        let table = Arc::new(build_and_open_table(&options));

        let mut iter = Table::iter_with(Arc::clone(&table), ReadOptions::default());
        iter.seek_to_last().unwrap();
        assert_eq!(
            iter.current().unwrap().0.get_user_key(),
            format!("{:08}", 100_000 + NUM_ENTRIES - 1).as_bytes()
        );

        let (key, _) = iter.prev().unwrap();
        assert_eq!(
            key.get_user_key(),
            format!("{:08}", 100_000 + NUM_ENTRIES - 2).as_bytes()
        );
    }

    #[test]
    fn seeking_lands_on_the_first_entry_at_or_after_the_target() {
        let options = options_with_small_blocks();
        let table = Arc::new(build_and_open_table(&options));
        let mut iter = Table::iter_with(Arc::clone(&table), ReadOptions::default());

        let target = InternalKey::new_for_seeking(b"00100100".to_vec(), u64::MAX >> 8);
        iter.seek(&target).unwrap();
        assert_eq!(iter.current().unwrap().0.get_user_key(), b"00100100");

        // A target between stored keys lands on the next stored key
        let target = InternalKey::new_for_seeking(b"001001000".to_vec(), u64::MAX >> 8);
        iter.seek(&target).unwrap();
        assert_eq!(iter.current().unwrap().0.get_user_key(), b"00100101");
    }

    #[test]
    fn tables_without_filters_are_still_readable() {
        let mut options = options_with_small_blocks();
        options.filter_policy = None;
        let table = build_and_open_table(&options);

        let seek_key = InternalKey::new_for_seeking(b"00100000".to_vec(), u64::MAX >> 8);
        assert!(table
            .get(&ReadOptions::default(), &seek_key)
            .unwrap()
            .is_some());
    }
}
