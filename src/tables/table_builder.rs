/*!
This module contains the builder that produces table files.
*/

use crc::{Crc, CRC_32_ISCSI};
use integer_encoding::{FixedInt, VarInt};
use std::convert::TryFrom;
use std::io::Write;

use crate::config::TableFileCompressionType;
use crate::fs::RandomAccessFile;
use crate::key::InternalKey;
use crate::options::DbOptions;
use crate::utils::crc::mask_checksum;

use super::block::BlockBuilder;
use super::errors::{TableBuildError, TableBuildResult};
use super::footer::{BlockHandle, Footer};
use super::index_key_for;

/// CRC calculator using the iSCSI polynomial.
const CRC_CALCULATOR: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/**
Builds a table file from entries added in ascending internal key order.

The builder owns the output file. Entries accumulate into a data block until the block reaches
the configured size, at which point the block is written out and an index entry is queued. The
index entry's separator key is not computed until the first key of the *next* block is known,
which lets the comparator shorten it.
*/
pub(crate) struct TableBuilder {
    /// Database options sourcing the block size, compression, comparator and filter policy.
    options: DbOptions,

    /// The file being written.
    file: Box<dyn RandomAccessFile>,

    /// The file number of the table being built.
    file_number: u64,

    /// The builder for the data block currently being filled.
    data_block_builder: BlockBuilder,

    /// The builder accumulating index entries.
    index_block_builder: BlockBuilder,

    /**
    The last user key of the most recently flushed data block plus that block's handle,
    awaiting the next key so a shortened separator can be chosen.
    */
    pending_index_entry: Option<(Vec<u8>, BlockHandle)>,

    /// Every distinct user key added, for the file-level filter.
    filter_keys: Vec<Vec<u8>>,

    /// The file offset the next block will be written at.
    offset: u64,

    /// The total number of entries added.
    num_entries: usize,

    /// The most recently added key, for order checking.
    last_internal_key: Option<InternalKey>,
}

/// Crate-only methods
impl TableBuilder {
    /// Create a new instance of [`TableBuilder`] writing table file `file_number`.
    pub(crate) fn new(options: DbOptions, file_number: u64) -> TableBuildResult<Self> {
        let file_path = options
            .file_name_resolver()
            .get_table_file_path(file_number);
        log::debug!("Creating a new table file at {file_path:?}.");
        let file = options
            .filesystem_provider()
            .create_file(&file_path, false)?;
        let restart_interval = options.block_restart_interval;

        Ok(Self {
            options,
            file,
            file_number,
            data_block_builder: BlockBuilder::new(restart_interval),
            index_block_builder: BlockBuilder::new(1),
            pending_index_entry: None,
            filter_keys: vec![],
            offset: 0,
            num_entries: 0,
            last_internal_key: None,
        })
    }

    /**
    Append an entry to the table.

    # Invariants

    Entries must be added in strictly ascending internal key order.
    */
    pub(crate) fn add_entry(&mut self, key: &InternalKey, value: &[u8]) -> TableBuildResult<()> {
        if let Some(last_key) = self.last_internal_key.as_ref() {
            if key <= last_key {
                return Err(TableBuildError::OutOfOrder(format!(
                    "Entries must be added to table file {number} in ascending order. Got \
                    {key:?} after {last_key:?}.",
                    number = self.file_number
                )));
            }
        }

        if let Some((last_block_user_key, handle)) = self.pending_index_entry.take() {
            let separator = self
                .options
                .comparator()
                .find_shortest_separator(&last_block_user_key, key.get_user_key());
            self.add_index_entry(separator, handle);
        }

        let is_new_user_key = self
            .filter_keys
            .last()
            .map_or(true, |previous| previous != key.get_user_key());
        if is_new_user_key {
            self.filter_keys.push(key.get_user_key().to_vec());
        }

        self.data_block_builder.add_entry(&Vec::from(key), value);
        self.num_entries += 1;
        self.last_internal_key = Some(key.clone());

        if self.data_block_builder.current_size_estimate() >= self.options.block_size {
            self.flush_data_block()?;
        }

        Ok(())
    }

    /// The number of entries added so far.
    pub(crate) fn num_entries(&self) -> usize {
        self.num_entries
    }

    /// The approximate size of the file so far, including the block being built.
    pub(crate) fn current_file_size(&self) -> u64 {
        self.offset + self.data_block_builder.current_size_estimate() as u64
    }

    /**
    Finish the table: flush outstanding blocks, write the filter block, index block and footer,
    and sync the file. Returns the final file size in bytes.
    */
    pub(crate) fn finalize(mut self) -> TableBuildResult<u64> {
        if !self.data_block_builder.is_empty() {
            self.flush_data_block()?;
        }

        if let Some((last_block_user_key, handle)) = self.pending_index_entry.take() {
            let successor = self
                .options
                .comparator()
                .find_short_successor(&last_block_user_key);
            self.add_index_entry(successor, handle);
        }

        let filter_handle = self.write_filter_block()?;

        let index_payload = self.index_block_builder.finish();
        let index_handle = self.write_physical_block(&index_payload)?;

        let footer = Footer::new(filter_handle, index_handle);
        self.file.write_all(&footer.encode())?;
        self.offset += super::footer::FOOTER_LENGTH_BYTES as u64;
        self.file.flush()?;
        self.file.sync()?;

        log::debug!(
            "Finished table file {number} with {num_entries} entries at {size} bytes.",
            number = self.file_number,
            num_entries = self.num_entries,
            size = self.offset
        );

        Ok(self.offset)
    }
}

/// Private methods
impl TableBuilder {
    /// Write out the data block being built and queue its index entry.
    fn flush_data_block(&mut self) -> TableBuildResult<()> {
        debug_assert!(!self.data_block_builder.is_empty());

        let last_user_key = self
            .last_internal_key
            .as_ref()
            .map(|key| key.get_user_key().to_vec())
            .unwrap_or_default();
        let payload = self.data_block_builder.finish();
        let handle = self.write_physical_block(&payload)?;
        self.pending_index_entry = Some((last_user_key, handle));

        Ok(())
    }

    /// Add a finished data block's entry to the index block.
    fn add_index_entry(&mut self, separator_user_key: Vec<u8>, handle: BlockHandle) {
        let index_key = index_key_for(separator_user_key);
        self.index_block_builder
            .add_entry(&Vec::from(&index_key), &handle.encode());
    }

    /// Build and write the file-level filter block, if a filter policy is configured.
    fn write_filter_block(&mut self) -> TableBuildResult<Option<BlockHandle>> {
        let policy = match self.options.filter_policy() {
            Some(policy) => policy,
            None => return Ok(None),
        };
        if self.filter_keys.is_empty() {
            return Ok(None);
        }

        let filter = policy.create_filter(&self.filter_keys);
        let name = policy.name().as_bytes();
        let mut payload = (name.len() as u64).encode_var_vec();
        payload.extend_from_slice(name);
        payload.extend(filter);

        Ok(Some(self.write_physical_block(&payload)?))
    }

    /**
    Write a block payload with its trailer: optional compression, a compression type byte, and
    a masked checksum over the stored bytes plus the type byte.
    */
    fn write_physical_block(&mut self, payload: &[u8]) -> TableBuildResult<BlockHandle> {
        let (stored_bytes, compression_type) = match self.options.compression {
            TableFileCompressionType::None => (payload.to_vec(), TableFileCompressionType::None),
            TableFileCompressionType::Snappy => {
                let compressed = snap::raw::Encoder::new()
                    .compress_vec(payload)
                    .map_err(|err| {
                        TableBuildError::IO(crate::errors::DBIOError::new(
                            std::io::ErrorKind::Other,
                            format!("Snappy compression failed: {err}"),
                        ))
                    })?;
                if compressed.len() < payload.len() {
                    (compressed, TableFileCompressionType::Snappy)
                } else {
                    // Incompressible payload; store raw
                    (payload.to_vec(), TableFileCompressionType::None)
                }
            }
        };

        let handle = BlockHandle::new(self.offset, stored_bytes.len() as u64);

        let mut digest = CRC_CALCULATOR.digest();
        digest.update(&stored_bytes);
        digest.update(&[compression_type as u8]);
        let checksum = mask_checksum(digest.finalize());

        self.file.write_all(&stored_bytes)?;
        self.file.write_all(&[compression_type as u8])?;
        self.file.write_all(&u32::encode_fixed_vec(checksum))?;
        self.offset +=
            stored_bytes.len() as u64 + super::BLOCK_TRAILER_LENGTH_BYTES as u64;

        Ok(handle)
    }
}

/// Read back a physical block written by [`TableBuilder::write_physical_block`].
pub(crate) fn read_physical_block(
    file: &dyn crate::fs::ReadonlyRandomAccessFile,
    handle: BlockHandle,
) -> super::errors::TableReadResult<Vec<u8>> {
    use super::errors::TableReadError;
    use crate::utils::crc::unmask_checksum;

    let stored_length = handle.get_size() as usize;
    let mut buffer = vec![0_u8; stored_length + super::BLOCK_TRAILER_LENGTH_BYTES];
    let bytes_read = file.read_from(&mut buffer, handle.get_offset() as usize)?;
    if bytes_read < buffer.len() {
        return Err(TableReadError::Corruption(format!(
            "A block at offset {offset} was cut short. Expected {expected} bytes but could \
            only read {bytes_read}.",
            offset = handle.get_offset(),
            expected = buffer.len()
        )));
    }

    let stored_bytes = &buffer[..stored_length];
    let compression_byte = buffer[stored_length];
    let stored_checksum =
        unmask_checksum(u32::decode_fixed(&buffer[stored_length + 1..]));

    let mut digest = CRC_CALCULATOR.digest();
    digest.update(stored_bytes);
    digest.update(&[compression_byte]);
    if digest.finalize() != stored_checksum {
        return Err(TableReadError::Corruption(format!(
            "The checksum of the block at offset {offset} did not match its contents.",
            offset = handle.get_offset()
        )));
    }

    let compression_type = TableFileCompressionType::try_from(compression_byte)
        .map_err(TableReadError::Corruption)?;
    match compression_type {
        TableFileCompressionType::None => Ok(stored_bytes.to_vec()),
        TableFileCompressionType::Snappy => snap::raw::Decoder::new()
            .decompress_vec(stored_bytes)
            .map_err(|err| {
                TableReadError::Corruption(format!(
                    "Snappy decompression of the block at offset {offset} failed: {err}",
                    offset = handle.get_offset()
                ))
            }),
    }
}
