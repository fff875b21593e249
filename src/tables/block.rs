/*!
Block encoding and decoding for table files.

A block payload is a run of prefix-compressed entries followed by a restart array. Each entry
stores how many leading bytes it shares with the previous entry's key, the remaining key bytes,
and the value. Every `restart_interval` entries the shared prefix resets to zero; the offsets
of those restart entries are collected at the end of the payload so that readers built around
partial decoding could land on them. CairnDB's reader decodes blocks whole (blocks are small)
and binary searches the decoded entries.
*/

use integer_encoding::{FixedInt, VarInt};
use std::convert::TryFrom;

use crate::key::InternalKey;

use super::errors::{TableReadError, TableReadResult};

/// Builds the payload of a single block.
pub(crate) struct BlockBuilder {
    /// The number of entries between restart points.
    restart_interval: usize,

    /// The encoded entries so far.
    buffer: Vec<u8>,

    /// Offsets of the restart entries within `buffer`.
    restarts: Vec<u32>,

    /// The number of entries encoded since the last restart point.
    entries_since_restart: usize,

    /// The serialized key of the most recently added entry.
    last_key_bytes: Vec<u8>,

    /// The total number of entries added.
    num_entries: usize,
}

/// Crate-only methods
impl BlockBuilder {
    /// Create a new instance of [`BlockBuilder`].
    pub(crate) fn new(restart_interval: usize) -> Self {
        Self {
            restart_interval: restart_interval.max(1),
            buffer: vec![],
            restarts: vec![0],
            entries_since_restart: 0,
            last_key_bytes: vec![],
            num_entries: 0,
        }
    }

    /**
    Append an entry to the block.

    Keys must be added in ascending serialized order.
    */
    pub(crate) fn add_entry(&mut self, key_bytes: &[u8], value: &[u8]) {
        let mut shared_length = 0;
        if self.entries_since_restart < self.restart_interval {
            // Count how many leading bytes this key shares with the previous one
            let max_shared = self.last_key_bytes.len().min(key_bytes.len());
            while shared_length < max_shared
                && self.last_key_bytes[shared_length] == key_bytes[shared_length]
            {
                shared_length += 1;
            }
        } else {
            self.restarts.push(self.buffer.len() as u32);
            self.entries_since_restart = 0;
        }

        let non_shared = &key_bytes[shared_length..];
        self.buffer.extend((shared_length as u64).encode_var_vec());
        self.buffer
            .extend((non_shared.len() as u64).encode_var_vec());
        self.buffer.extend((value.len() as u64).encode_var_vec());
        self.buffer.extend_from_slice(non_shared);
        self.buffer.extend_from_slice(value);

        self.last_key_bytes = key_bytes.to_vec();
        self.entries_since_restart += 1;
        self.num_entries += 1;
    }

    /// The current size of the payload being built, including the restart array.
    pub(crate) fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    /// The number of entries added so far.
    pub(crate) fn num_entries(&self) -> usize {
        self.num_entries
    }

    /// Returns true if no entries have been added.
    pub(crate) fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    /// Finish the block, returning the payload and resetting the builder for reuse.
    pub(crate) fn finish(&mut self) -> Vec<u8> {
        let mut payload = std::mem::take(&mut self.buffer);
        for restart_offset in &self.restarts {
            payload.extend(u32::encode_fixed_vec(*restart_offset));
        }
        payload.extend(u32::encode_fixed_vec(self.restarts.len() as u32));

        self.restarts = vec![0];
        self.entries_since_restart = 0;
        self.last_key_bytes.clear();
        self.num_entries = 0;

        payload
    }
}

/// A fully decoded block held in memory (and in the block cache).
pub struct DataBlock {
    /// The decoded entries in key order.
    entries: Vec<(InternalKey, Vec<u8>)>,
}

/// Crate-only methods
impl DataBlock {
    /// Decode a block payload produced by [`BlockBuilder`].
    pub(crate) fn decode(payload: &[u8]) -> TableReadResult<DataBlock> {
        if payload.len() < 4 {
            return Err(TableReadError::BlockDecode(
                "The block payload is too short to hold a restart count.".to_string(),
            ));
        }

        let restart_count = u32::decode_fixed(&payload[payload.len() - 4..]) as usize;
        let restart_array_length = restart_count * 4 + 4;
        if payload.len() < restart_array_length {
            return Err(TableReadError::BlockDecode(
                "The block payload is too short to hold its restart array.".to_string(),
            ));
        }
        let entries_end = payload.len() - restart_array_length;

        let mut entries = vec![];
        let mut last_key_bytes: Vec<u8> = vec![];
        let mut cursor = 0;
        while cursor < entries_end {
            let (shared, consumed) = u64::decode_var(&payload[cursor..entries_end])
                .ok_or_else(|| malformed_entry_error(cursor))?;
            cursor += consumed;
            let (non_shared, consumed) = u64::decode_var(&payload[cursor..entries_end])
                .ok_or_else(|| malformed_entry_error(cursor))?;
            cursor += consumed;
            let (value_length, consumed) = u64::decode_var(&payload[cursor..entries_end])
                .ok_or_else(|| malformed_entry_error(cursor))?;
            cursor += consumed;

            let shared = shared as usize;
            let non_shared = non_shared as usize;
            let value_length = value_length as usize;
            if shared > last_key_bytes.len() || cursor + non_shared + value_length > entries_end {
                return Err(malformed_entry_error(cursor));
            }

            let mut key_bytes = last_key_bytes[..shared].to_vec();
            key_bytes.extend_from_slice(&payload[cursor..cursor + non_shared]);
            cursor += non_shared;
            let value = payload[cursor..cursor + value_length].to_vec();
            cursor += value_length;

            let key = InternalKey::try_from(key_bytes.as_slice()).map_err(|err| {
                TableReadError::BlockDecode(format!(
                    "Could not deserialize an internal key from a block entry. Error: {err}"
                ))
            })?;
            entries.push((key, value));
            last_key_bytes = key_bytes;
        }

        Ok(DataBlock { entries })
    }

    /// The decoded entries in key order.
    pub(crate) fn entries(&self) -> &[(InternalKey, Vec<u8>)] {
        &self.entries
    }

    /// The index of the first entry with a key at or after `target`, if one exists.
    pub(crate) fn find_entry_at_or_after(&self, target: &InternalKey) -> Option<usize> {
        let index = self.entries.partition_point(|(key, _)| key < target);
        if index < self.entries.len() {
            Some(index)
        } else {
            None
        }
    }

    /// The number of entries in the block.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the block holds no entries.
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Build the error for a block entry that does not decode cleanly.
fn malformed_entry_error(offset: usize) -> TableReadError {
    TableReadError::BlockDecode(format!(
        "Found a malformed block entry at payload offset {offset}."
    ))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::key::Operation;

    use super::*;

    fn make_key(user_key: &str, sequence: u64) -> InternalKey {
        InternalKey::new(user_key.as_bytes().to_vec(), sequence, Operation::Put)
    }

    #[test]
    fn blocks_round_trip_with_prefix_compression() {
        let mut builder = BlockBuilder::new(4);
        let keys: Vec<InternalKey> = (0..100_u64)
            .map(|n| make_key(&format!("user-key-{n:04}"), 1000 - n))
            .collect();
        for key in &keys {
            builder.add_entry(&Vec::from(key), format!("value-{key:?}").as_bytes());
        }

        let payload = builder.finish();
        let block = DataBlock::decode(&payload).unwrap();

        assert_eq!(block.len(), keys.len());
        for (idx, (decoded_key, _)) in block.entries().iter().enumerate() {
            assert_eq!(decoded_key, &keys[idx]);
        }
    }

    #[test]
    fn entries_can_be_located_by_binary_search() {
        let mut builder = BlockBuilder::new(16);
        for n in (0..100_u64).step_by(2) {
            let key = make_key(&format!("{n:04}"), 7);
            builder.add_entry(&Vec::from(&key), b"value");
        }
        let block = DataBlock::decode(&builder.finish()).unwrap();

        // An exact match
        let target = InternalKey::new_for_seeking(b"0042".to_vec(), 100);
        let index = block.find_entry_at_or_after(&target).unwrap();
        assert_eq!(block.entries()[index].0.get_user_key(), b"0042");

        // A key between stored entries lands on the next one
        let target = InternalKey::new_for_seeking(b"0043".to_vec(), 100);
        let index = block.find_entry_at_or_after(&target).unwrap();
        assert_eq!(block.entries()[index].0.get_user_key(), b"0044");

        // A key past the end finds nothing
        let target = InternalKey::new_for_seeking(b"9999".to_vec(), 100);
        assert!(block.find_entry_at_or_after(&target).is_none());
    }

    #[test]
    fn a_builder_can_be_reused_after_finishing() {
        let mut builder = BlockBuilder::new(4);
        builder.add_entry(&Vec::from(&make_key("a", 1)), b"1");
        let first_payload = builder.finish();

        assert!(builder.is_empty());
        builder.add_entry(&Vec::from(&make_key("b", 2)), b"2");
        let second_payload = builder.finish();

        let first = DataBlock::decode(&first_payload).unwrap();
        let second = DataBlock::decode(&second_payload).unwrap();
        assert_eq!(first.entries()[0].0.get_user_key(), b"a");
        assert_eq!(second.entries()[0].0.get_user_key(), b"b");
    }

    #[test]
    fn truncated_payloads_are_rejected() {
        let mut builder = BlockBuilder::new(4);
        builder.add_entry(&Vec::from(&make_key("abc", 1)), b"value");
        let payload = builder.finish();

        assert!(DataBlock::decode(&payload[..payload.len() - 6]).is_err());
        assert!(DataBlock::decode(&[]).is_err());
    }
}
