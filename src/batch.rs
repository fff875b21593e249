/*!
This module contains the representation of atomic sets of write operations.

A [`Batch`] is the unit persisted to the write-ahead log: the leader of a group commit merges
the batches of queued writers into one combined batch, assigns it a contiguous range of
sequence numbers, appends it to the log, and only then applies it to the memtable.
*/

use bincode::Options;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

use crate::key::Operation;

/// The per-element overhead used when estimating the encoded size of a batch.
const APPROXIMATE_ELEMENT_OVERHEAD_BYTES: usize = 16;

/// A single operation within a [`Batch`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BatchElement {
    /// The operation being performed.
    operation: Operation,

    /// The key of the record to perform the operation on.
    key: Vec<u8>,

    /// The value to set for [`Operation::Put`]; [`None`] for deletes.
    value: Option<Vec<u8>>,
}

/// Crate-only methods
impl BatchElement {
    /// The operation being performed.
    pub(crate) fn get_operation(&self) -> Operation {
        self.operation
    }

    /// The key being operated on.
    pub(crate) fn get_key(&self) -> &[u8] {
        &self.key
    }

    /// The value being written, if there is one.
    pub(crate) fn get_value(&self) -> Option<&Vec<u8>> {
        self.value.as_ref()
    }
}

/// A set of operations to be applied atomically.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Batch {
    /**
    The sequence number assigned to the first operation in the batch.

    Subsequent operations implicitly take consecutive sequence numbers. The field is only
    populated once the batch reaches the front of the write queue.
    */
    starting_sequence_number: Option<u64>,

    /// The operations in this batch in insertion order.
    elements: Vec<BatchElement>,
}

/// Public methods
impl Batch {
    /// Create a new, empty [`Batch`].
    pub fn new() -> Self {
        Batch::default()
    }

    /// Queue a put of `value` at `key`.
    pub fn add_put(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.elements.push(BatchElement {
            operation: Operation::Put,
            key,
            value: Some(value),
        });

        self
    }

    /// Queue a deletion of `key`.
    pub fn add_delete(&mut self, key: Vec<u8>) -> &mut Self {
        self.elements.push(BatchElement {
            operation: Operation::Delete,
            key,
            value: None,
        });

        self
    }

    /// The number of operations in the batch.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns true if the batch contains no operations.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Crate-only methods
impl Batch {
    /// Iterate the operations in insertion order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &BatchElement> {
        self.elements.iter()
    }

    /// Append all operations of `other` onto this batch.
    pub(crate) fn append_batch(&mut self, other: &Batch) {
        self.elements.extend(other.elements.iter().cloned());
    }

    /// The sequence number assigned to the first operation, if assigned yet.
    pub(crate) fn get_starting_sequence_number(&self) -> Option<u64> {
        self.starting_sequence_number
    }

    /// Assign the sequence number for the first operation in the batch.
    pub(crate) fn set_starting_sequence_number(&mut self, sequence_number: u64) {
        self.starting_sequence_number = Some(sequence_number);
    }

    /**
    An estimate of the encoded size of this batch.

    Used to bound the size of group commits; does not need to match the serialized size
    exactly.
    */
    pub(crate) fn approximate_size(&self) -> usize {
        self.elements
            .iter()
            .map(|element| {
                element.key.len()
                    + element.value.as_ref().map_or(0, |value| value.len())
                    + APPROXIMATE_ELEMENT_OVERHEAD_BYTES
            })
            .sum()
    }
}

impl TryFrom<&[u8]> for Batch {
    type Error = bincode::Error;

    fn try_from(value: &[u8]) -> bincode::Result<Batch> {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .deserialize(value)
    }
}

impl From<&Batch> for Vec<u8> {
    fn from(value: &Batch) -> Vec<u8> {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .serialize(value)
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn operations_are_kept_in_insertion_order() {
        let mut batch = Batch::new();
        batch.add_put(b"a".to_vec(), b"1".to_vec());
        batch.add_delete(b"b".to_vec());
        batch.add_put(b"c".to_vec(), b"3".to_vec());

        let operations: Vec<Operation> = batch.iter().map(|e| e.get_operation()).collect();
        assert_eq!(
            operations,
            vec![Operation::Put, Operation::Delete, Operation::Put]
        );
    }

    #[test]
    fn batches_can_be_merged_for_group_commits() {
        let mut leader_batch = Batch::new();
        leader_batch.add_put(b"a".to_vec(), b"1".to_vec());
        let mut follower_batch = Batch::new();
        follower_batch.add_delete(b"b".to_vec());

        leader_batch.append_batch(&follower_batch);

        assert_eq!(leader_batch.len(), 2);
        assert_eq!(leader_batch.iter().last().unwrap().get_key(), b"b");
    }

    #[test]
    fn batches_round_trip_through_serialization() {
        let mut batch = Batch::new();
        batch.add_put(b"key".to_vec(), b"value".to_vec());
        batch.add_delete(b"gone".to_vec());
        batch.set_starting_sequence_number(42);

        let encoded: Vec<u8> = Vec::from(&batch);
        let decoded = Batch::try_from(encoded.as_slice()).unwrap();

        assert_eq!(batch, decoded);
        assert_eq!(decoded.get_starting_sequence_number(), Some(42));
    }

    #[test]
    fn approximate_size_grows_with_content() {
        let mut batch = Batch::new();
        let empty_size = batch.approximate_size();
        batch.add_put(b"key".to_vec(), vec![0_u8; 1000]);

        assert!(batch.approximate_size() > empty_size + 1000);
    }
}
