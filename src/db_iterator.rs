/*!
The user-facing database iterator.

A [`DbIterator`] merges the active memtable, the immutable memtable (when one exists), every
level-0 file, and one concatenating cursor per guard partition at every deeper level. On top of
that merge it applies the user-visible semantics: entries above the iterator's sequence number
are invisible, deletion markers hide older versions, and only the newest visible version of
each user key is surfaced.

An open iterator pins the version it was created from, which in turn keeps the files it reads
from being collected.
*/

use parking_lot::Mutex;
use std::sync::Arc;

use crate::errors::CairnDBResult;
use crate::iterator::StorageIterator;
use crate::key::{InternalKey, Operation};
use crate::utils::linked_list::SharedNode;
use crate::versioning::file_iterators::MergingIterator;
use crate::versioning::version::Version;

// The concrete type is only needed for the release-on-drop handshake
use crate::db::LockedDbFields;

/// The traversal direction the iterator most recently moved in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Direction {
    /// Moving toward larger user keys.
    Forward,

    /// Moving toward smaller user keys.
    Reverse,
}

/// An iterator over the user-visible entries of the database.
pub struct DbIterator {
    /// The merged cursor over every data source.
    inner: MergingIterator,

    /// The sequence number bounding visibility from above.
    sequence_number: u64,

    /// The direction of the most recent movement.
    direction: Direction,

    /// The user key and value at the current position.
    current: Option<(Vec<u8>, Vec<u8>)>,

    /// The version this iterator reads from, pinned until the iterator is dropped.
    pinned_version: Option<SharedNode<Version>>,

    /// A handle to the database state used to release the pinned version on drop.
    guarded_fields: Arc<Mutex<LockedDbFields>>,
}

/// Public methods
impl DbIterator {
    /// Position the iterator at the first key of the database.
    pub fn seek_to_first(&mut self) -> CairnDBResult<()> {
        self.direction = Direction::Forward;
        self.inner.seek_to_first()?;
        self.find_next_user_entry(None);

        Ok(())
    }

    /// Position the iterator at the last key of the database.
    pub fn seek_to_last(&mut self) -> CairnDBResult<()> {
        self.direction = Direction::Reverse;
        self.inner.seek_to_last()?;
        self.find_prev_user_entry();

        Ok(())
    }

    /// Position the iterator at the first key at or after `user_key`.
    pub fn seek(&mut self, user_key: &[u8]) -> CairnDBResult<()> {
        self.direction = Direction::Forward;
        let seek_key = InternalKey::new_for_seeking(user_key.to_vec(), self.sequence_number);
        self.inner.seek(&seek_key)?;
        self.find_next_user_entry(None);

        Ok(())
    }

    /// Advance to the next user key. Returns false when the iterator becomes invalid.
    pub fn next(&mut self) -> bool {
        let current_key = match self.current.as_ref() {
            Some((key, _)) => key.clone(),
            None => return false,
        };

        if self.direction == Direction::Reverse {
            // The merged cursor sits before the current key; re-align it forward
            self.direction = Direction::Forward;
            let seek_key =
                InternalKey::new_for_seeking(current_key.clone(), self.sequence_number);
            if self.inner.seek(&seek_key).is_err() {
                self.current = None;
                return false;
            }
        }

        // Step past every remaining internal entry of the current user key
        while let Some((key, _)) = self.inner.current() {
            if key.get_user_key() != current_key {
                break;
            }
            if self.inner.next().is_none() {
                break;
            }
        }

        self.find_next_user_entry(Some(current_key));
        self.current.is_some()
    }

    /// Move back to the previous user key. Returns false when the iterator becomes invalid.
    pub fn prev(&mut self) -> bool {
        let current_key = match self.current.as_ref() {
            Some((key, _)) => key.clone(),
            None => return false,
        };

        if self.direction == Direction::Forward {
            // The merged cursor sits on the current entry; walk it behind the current user
            // key before scanning backward
            loop {
                if self.inner.prev().is_none() {
                    self.current = None;
                    return false;
                }
                let positioned_before = self
                    .inner
                    .current()
                    .map(|(key, _)| key.get_user_key() < current_key.as_slice())
                    .unwrap_or(true);
                if positioned_before {
                    break;
                }
            }
            self.direction = Direction::Reverse;
        }

        self.find_prev_user_entry();
        self.current.is_some()
    }

    /// The user key at the current position.
    pub fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(key, _)| key.as_slice())
    }

    /// The value at the current position.
    pub fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, value)| value.as_slice())
    }

    /// Whether the iterator is positioned at an entry.
    pub fn is_valid(&self) -> bool {
        self.current.is_some()
    }
}

/// Crate-only methods
impl DbIterator {
    /// Create a new instance of [`DbIterator`].
    pub(crate) fn new(
        inner: MergingIterator,
        sequence_number: u64,
        pinned_version: SharedNode<Version>,
        guarded_fields: Arc<Mutex<LockedDbFields>>,
    ) -> Self {
        Self {
            inner,
            sequence_number,
            direction: Direction::Forward,
            current: None,
            pinned_version: Some(pinned_version),
            guarded_fields,
        }
    }
}

/// Private methods
impl DbIterator {
    /**
    Scan forward from the merged cursor's position to the newest visible entry of the next
    surfaced user key.

    `skip_user_key` suppresses entries of a user key that was already surfaced (or whose
    newest visible entry was a deletion).
    */
    fn find_next_user_entry(&mut self, mut skip_user_key: Option<Vec<u8>>) {
        loop {
            let (key, value) = match self.inner.current() {
                Some((key, value)) => (key.clone(), value.clone()),
                None => {
                    self.current = None;
                    return;
                }
            };

            if key.get_sequence_number() <= self.sequence_number {
                let is_skipped = skip_user_key
                    .as_ref()
                    .map(|skipped| skipped.as_slice() == key.get_user_key())
                    .unwrap_or(false);
                if !is_skipped {
                    match key.get_operation() {
                        Operation::Delete => {
                            // Older entries of this user key are shadowed by the tombstone
                            skip_user_key = Some(key.get_user_key().to_vec());
                        }
                        Operation::Put => {
                            self.current = Some((key.get_user_key().to_vec(), value));
                            return;
                        }
                    }
                }
            }

            if self.inner.next().is_none() {
                self.current = None;
                return;
            }
        }
    }

    /**
    Scan backward from the merged cursor's position to the newest visible entry of the
    previous surfaced user key.

    Walking backward visits a user key's entries oldest first, so the decision for a user key
    is only final when the scan crosses onto a smaller user key: the last visible entry seen
    for the key decides between a value and a deletion.
    */
    fn find_prev_user_entry(&mut self) {
        let mut saved: Option<(Vec<u8>, Vec<u8>)> = None;
        let mut saved_is_value = false;

        loop {
            let maybe_entry = self
                .inner
                .current()
                .map(|(key, value)| (key.clone(), value.clone()));

            match maybe_entry {
                None => break,
                Some((key, value)) => {
                    if key.get_sequence_number() <= self.sequence_number {
                        if saved_is_value
                            && key.get_user_key()
                                < saved.as_ref().unwrap().0.as_slice()
                        {
                            // The scan crossed onto a smaller user key; the saved entry is
                            // the answer
                            break;
                        }

                        match key.get_operation() {
                            Operation::Delete => {
                                saved = None;
                                saved_is_value = false;
                            }
                            Operation::Put => {
                                saved = Some((key.get_user_key().to_vec(), value));
                                saved_is_value = true;
                            }
                        }
                    }

                    if self.inner.prev().is_none() {
                        break;
                    }
                }
            }
        }

        if saved_is_value {
            self.current = saved;
        } else {
            self.current = None;
        }
    }
}

impl Drop for DbIterator {
    fn drop(&mut self) {
        if let Some(version_node) = self.pinned_version.take() {
            let mut fields_guard = self.guarded_fields.lock();
            fields_guard.version_set.release_version(version_node);
        }
    }
}
