/*!
Entries in the database are keyed by an internal key that wraps the user-provided key with
additional metadata: a sequence number and the operation that produced the entry.

The sequence number is a globally monotonic 56-bit unsigned integer assigned per logical write
operation. It is never reset. Because writes are append-only there may be multiple entries for
the same user key; the sequence number decides which one is the most recent version.
*/

use bincode::Options;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::convert::TryFrom;
use std::fmt;

/**
The maximum sequence number.

Sequence numbers are stored in 56 bits so that an entry's sequence and operation tag can be
packed into a single word by encoders that want to.
*/
pub(crate) const MAX_SEQUENCE_NUMBER: u64 = (1 << 56) - 1;

/// The operation that produced an entry in the database.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Operation {
    /// A tombstone. There is no value associated with the operation.
    Delete = 0,

    /// Adds a new key-value pair or updates an existing key-value pair.
    Put = 1,
}

impl TryFrom<u8> for Operation {
    type Error = String;

    fn try_from(value: u8) -> Result<Operation, Self::Error> {
        match value {
            0 => Ok(Operation::Delete),
            1 => Ok(Operation::Put),
            _ => Err(format!(
                "There was a problem parsing an operation tag. The value received was {value}."
            )),
        }
    }
}

/**
The key actually stored by CairnDB: the user key plus versioning metadata.

# Ordering

Internal keys order by user key ascending, then by sequence number *descending*, then by
operation tag descending. The newest version of a user key therefore sorts first within that
user key's run of entries, which is what lets point lookups stop at the first entry at or after
a seek key.
*/
#[derive(Clone, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct InternalKey {
    /// The user-supplied key.
    user_key: Vec<u8>,

    /// The sequence number of the operation associated with this key.
    sequence_number: u64,

    /// The operation being performed with this key.
    operation: Operation,
}

/// Crate-only methods
impl InternalKey {
    /// Construct a new [`InternalKey`].
    pub(crate) fn new(user_key: Vec<u8>, sequence_number: u64, operation: Operation) -> Self {
        debug_assert!(sequence_number <= MAX_SEQUENCE_NUMBER);

        InternalKey {
            user_key,
            sequence_number,
            operation,
        }
    }

    /**
    Construct a key for seeking to the newest entry visible at `sequence_number`.

    The seek key uses the [`Operation::Put`] tag so that it orders before every entry of the
    same user key with a sequence number at or below `sequence_number`.
    */
    pub(crate) fn new_for_seeking(user_key: Vec<u8>, sequence_number: u64) -> Self {
        InternalKey::new(user_key, sequence_number, Operation::Put)
    }

    /// Return the user key portion.
    pub(crate) fn get_user_key(&self) -> &[u8] {
        &self.user_key
    }

    /// Return the sequence number.
    pub(crate) fn get_sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Return the operation tag.
    pub(crate) fn get_operation(&self) -> Operation {
        self.operation
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Order by the user keys if they are not equal
        let user_key_order = self.user_key.as_slice().cmp(other.user_key.as_slice());
        if user_key_order != CmpOrdering::Equal {
            return user_key_order;
        }

        // Newer sequence numbers sort first
        let sequence_order = other.sequence_number.cmp(&self.sequence_number);
        if sequence_order != CmpOrdering::Equal {
            return sequence_order;
        }

        (other.operation as u8).cmp(&(self.operation as u8))
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl TryFrom<&[u8]> for InternalKey {
    type Error = bincode::Error;

    fn try_from(value: &[u8]) -> bincode::Result<InternalKey> {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .deserialize(value)
    }
}

impl From<&InternalKey> for Vec<u8> {
    fn from(value: &InternalKey) -> Vec<u8> {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .serialize(value)
            .unwrap()
    }
}

impl fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{user_key}@{seq}:{op:?}",
            user_key = String::from_utf8_lossy(&self.user_key),
            seq = self.sequence_number,
            op = self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn orders_by_user_key_ascending_first() {
        let key1 = InternalKey::new(b"abc".to_vec(), 30, Operation::Put);
        let key2 = InternalKey::new(b"abd".to_vec(), 10, Operation::Put);

        assert!(key1 < key2);
    }

    #[test]
    fn orders_newer_sequence_numbers_first_within_a_user_key() {
        let newer = InternalKey::new(b"abc".to_vec(), 30, Operation::Put);
        let older = InternalKey::new(b"abc".to_vec(), 10, Operation::Delete);

        assert!(newer < older);
    }

    #[test]
    fn seek_keys_order_before_visible_entries() {
        let seek_key = InternalKey::new_for_seeking(b"abc".to_vec(), 25);
        let visible = InternalKey::new(b"abc".to_vec(), 25, Operation::Delete);
        let newer_than_snapshot = InternalKey::new(b"abc".to_vec(), 26, Operation::Put);

        assert!(seek_key <= visible);
        assert!(newer_than_snapshot < seek_key);
    }

    #[test]
    fn round_trips_through_serialization() {
        let key = InternalKey::new(b"some-key".to_vec(), 12345, Operation::Delete);

        let encoded: Vec<u8> = Vec::from(&key);
        let decoded = InternalKey::try_from(encoded.as_slice()).unwrap();

        assert_eq!(key, decoded);
    }
}
