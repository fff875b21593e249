/*!
Snapshots scope a read to the state of the database at a point in time.

A snapshot pins a sequence number: reads through the snapshot observe exactly the writes with a
sequence number at or below the pinned one, and compactions will not drop entries that a live
snapshot can still see.
*/

use std::sync::Arc;

use crate::utils::linked_list::{LinkedList, SharedNode};

/**
A handle to the state of the database at a particular point in time.

Snapshots are immutable and entirely opaque to database clients; they are obtained from
[`DB::get_snapshot`](crate::DB::get_snapshot) and must be returned via
[`DB::release_snapshot`](crate::DB::release_snapshot).
*/
#[derive(Clone)]
pub struct Snapshot {
    inner: SharedNode<InnerSnapshot>,
}

/// Crate-only methods
impl Snapshot {
    /// Create a new instance of [`Snapshot`].
    pub(crate) fn new(inner: SharedNode<InnerSnapshot>) -> Self {
        Self { inner }
    }

    /// Get a handle to the snapshot's internal representation.
    pub(crate) fn inner(&self) -> SharedNode<InnerSnapshot> {
        Arc::clone(&self.inner)
    }

    /// The sequence number this snapshot pins.
    pub(crate) fn sequence_number(&self) -> u64 {
        self.inner.read().element.sequence_number()
    }
}

/// The internal representation of a snapshot.
pub(crate) struct InnerSnapshot {
    /// The sequence number at which this snapshot was taken.
    sequence_number: u64,
}

/// Crate-only methods
impl InnerSnapshot {
    /// The sequence number at which this snapshot was taken.
    pub(crate) fn sequence_number(&self) -> u64 {
        self.sequence_number
    }
}

/// The list of live snapshots, oldest at the front.
pub(crate) struct SnapshotList {
    list: LinkedList<InnerSnapshot>,
}

/// Crate-only methods
impl SnapshotList {
    /// Create a new instance of [`SnapshotList`].
    pub(crate) fn new() -> Self {
        Self {
            list: LinkedList::new(),
        }
    }

    /**
    Create a new snapshot pinning `sequence_number` and append it to the list.

    # Panics

    The specified sequence number must not be lower than any currently in the list. This holds
    trivially because sequence numbers only increase over the lifetime of the database.
    */
    pub(crate) fn new_snapshot(&mut self, sequence_number: u64) -> Snapshot {
        assert!(
            self.is_empty() || self.newest().read().element.sequence_number() <= sequence_number
        );

        Snapshot::new(self.list.push(InnerSnapshot { sequence_number }))
    }

    /// Remove a snapshot from the list.
    pub(crate) fn release_snapshot(&mut self, snapshot: Snapshot) {
        self.list.remove_node(snapshot.inner());
    }

    /// Returns true if there are no live snapshots.
    pub(crate) fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /**
    The oldest live snapshot.

    # Panics

    This method cannot be called on an empty list.
    */
    pub(crate) fn oldest(&self) -> SharedNode<InnerSnapshot> {
        self.list.head().unwrap()
    }

    /**
    The newest live snapshot.

    # Panics

    This method cannot be called on an empty list.
    */
    pub(crate) fn newest(&self) -> SharedNode<InnerSnapshot> {
        self.list.tail().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshots_are_ordered_oldest_to_newest() {
        let mut snapshots = SnapshotList::new();
        let snapshot1 = snapshots.new_snapshot(1000);

        assert!(Arc::ptr_eq(&snapshot1.inner(), &snapshots.newest()));

        let snapshot2 = snapshots.new_snapshot(2000);

        assert!(Arc::ptr_eq(&snapshot2.inner(), &snapshots.newest()));
        assert!(Arc::ptr_eq(&snapshot1.inner(), &snapshots.oldest()));
        assert_eq!(snapshots.oldest().read().element.sequence_number(), 1000);
    }

    #[test]
    fn snapshots_can_be_released_in_any_order() {
        let mut snapshots = SnapshotList::new();
        let snapshot1 = snapshots.new_snapshot(1000);
        let snapshot2 = snapshots.new_snapshot(2000);
        let snapshot3 = snapshots.new_snapshot(3000);

        snapshots.release_snapshot(snapshot2);
        assert_eq!(snapshots.oldest().read().element.sequence_number(), 1000);

        snapshots.release_snapshot(snapshot1);
        assert!(Arc::ptr_eq(&snapshot3.inner(), &snapshots.oldest()));

        snapshots.release_snapshot(snapshot3);
        assert!(snapshots.is_empty());
    }
}
