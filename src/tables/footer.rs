/*!
The footer is the fixed-size trailer of a table file that bootstraps reading.

It stores the block handles of the filter block and the index block, zero padding, and a magic
number that distinguishes table files from arbitrary content.
*/

use integer_encoding::{FixedInt, VarInt};

use super::errors::{TableReadError, TableReadResult};

/// The length of the footer's handle area in bytes: two maximally-sized varint pairs.
const HANDLE_AREA_LENGTH_BYTES: usize = 40;

/// The serialized length of the footer in bytes.
pub(crate) const FOOTER_LENGTH_BYTES: usize = HANDLE_AREA_LENGTH_BYTES + 8;

/// The magic number identifying CairnDB table files.
const TABLE_MAGIC: u64 = 0xca19_0db5_7a81_e5f1;

/// The location of a block within a table file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct BlockHandle {
    /// The byte offset of the block within the file.
    offset: u64,

    /// The length of the block payload, excluding the block trailer.
    size: u64,
}

/// Crate-only methods
impl BlockHandle {
    /// Create a new instance of [`BlockHandle`].
    pub(crate) fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// The byte offset of the block within the file.
    pub(crate) fn get_offset(&self) -> u64 {
        self.offset
    }

    /// The length of the block payload, excluding the block trailer.
    pub(crate) fn get_size(&self) -> u64 {
        self.size
    }

    /// Serialize the handle as a varint pair.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buffer = self.offset.encode_var_vec();
        buffer.extend(self.size.encode_var_vec());

        buffer
    }

    /// Decode a handle from the front of `buffer`, returning it and the bytes consumed.
    pub(crate) fn decode(buffer: &[u8]) -> TableReadResult<(BlockHandle, usize)> {
        let (offset, offset_length) = u64::decode_var(buffer).ok_or_else(|| {
            TableReadError::Corruption("Could not decode a block handle offset.".to_string())
        })?;
        let (size, size_length) = u64::decode_var(&buffer[offset_length..]).ok_or_else(|| {
            TableReadError::Corruption("Could not decode a block handle size.".to_string())
        })?;

        Ok((BlockHandle::new(offset, size), offset_length + size_length))
    }
}

/// The footer of a table file.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Footer {
    /// The handle of the file-level filter block, if the file carries a filter.
    filter_handle: Option<BlockHandle>,

    /// The handle of the index block.
    index_handle: BlockHandle,
}

/// Crate-only methods
impl Footer {
    /// Create a new instance of [`Footer`].
    pub(crate) fn new(filter_handle: Option<BlockHandle>, index_handle: BlockHandle) -> Self {
        Self {
            filter_handle,
            index_handle,
        }
    }

    /// The handle of the file-level filter block, if present.
    pub(crate) fn get_filter_handle(&self) -> Option<BlockHandle> {
        self.filter_handle
    }

    /// The handle of the index block.
    pub(crate) fn get_index_handle(&self) -> BlockHandle {
        self.index_handle
    }

    /// Serialize the footer to its fixed on-disk length.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(FOOTER_LENGTH_BYTES);

        // A zero-sized handle at offset zero marks the filter as absent
        let filter_handle = self
            .filter_handle
            .unwrap_or_else(|| BlockHandle::new(0, 0));
        buffer.extend(filter_handle.encode());
        buffer.extend(self.index_handle.encode());
        buffer.resize(HANDLE_AREA_LENGTH_BYTES, 0);
        buffer.extend(u64::encode_fixed_vec(TABLE_MAGIC));

        buffer
    }

    /// Decode a footer from the final [`FOOTER_LENGTH_BYTES`] of a table file.
    pub(crate) fn decode(buffer: &[u8]) -> TableReadResult<Footer> {
        if buffer.len() != FOOTER_LENGTH_BYTES {
            return Err(TableReadError::Corruption(format!(
                "The footer buffer must be exactly {FOOTER_LENGTH_BYTES} bytes but was {len}.",
                len = buffer.len()
            )));
        }

        let magic = u64::decode_fixed(&buffer[HANDLE_AREA_LENGTH_BYTES..]);
        if magic != TABLE_MAGIC {
            return Err(TableReadError::Corruption(
                "The file does not end with the table magic number.".to_string(),
            ));
        }

        let (filter_handle, consumed) = BlockHandle::decode(buffer)?;
        let (index_handle, _) = BlockHandle::decode(&buffer[consumed..])?;

        let filter_handle = if filter_handle.get_size() == 0 {
            None
        } else {
            Some(filter_handle)
        };

        Ok(Footer::new(filter_handle, index_handle))
    }
}
