/*!
This module provides the representation of threads queued to perform write operations.

Writers form a FIFO. The writer at the front of the queue is the *leader*: it merges the
batches of queued followers into one group commit, performs the log and memtable work, and
then releases each follower with its individual result. Followers park on a per-writer
condition until the leader signals them.
*/

use std::ptr;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::batch::Batch;
use crate::db::LockedDbFields;
use crate::errors::CairnDBResult;

/**
Mutable fields within a [`Writer`].

These are wrapped by their own mutex for interior mutability, so that a lock does not have to
be placed around the entire parent [`Writer`].
*/
struct WriterInner {
    /// Whether the requested operation has completed, successfully or not.
    operation_completed: bool,

    /**
    The result of the operation.

    Populated when `operation_completed` is set. This is what communicates a group commit's
    result to writers whose batches were piggybacked onto the leader's.
    */
    operation_result: Option<CairnDBResult<()>>,
}

/// A thread requesting a write operation.
pub(crate) struct Writer {
    /// The batch of operations this writer wants performed.
    batch: Batch,

    /// Whether the write should be durably synced before returning.
    synchronous_write: bool,

    /// Fields of the writer that need to be mutable.
    inner: Mutex<WriterInner>,

    /// The condition this writer's thread parks on while waiting for its turn.
    thread_signaller: Condvar,
}

impl PartialEq for Writer {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(&self.inner, &other.inner)
    }
}

/// Crate-only methods
impl Writer {
    /// Create a new instance of [`Writer`].
    pub(crate) fn new(batch: Batch, synchronous_write: bool) -> Self {
        Self {
            batch,
            synchronous_write,
            inner: Mutex::new(WriterInner {
                operation_completed: false,
                operation_result: None,
            }),
            thread_signaller: Condvar::new(),
        }
    }

    /// Whether the writer requested a synchronous write.
    pub(crate) fn is_synchronous_write(&self) -> bool {
        self.synchronous_write
    }

    /// The operations this writer wants performed.
    pub(crate) fn batch(&self) -> &Batch {
        &self.batch
    }

    /// Park the calling thread until it is signalled, releasing the database mutex meanwhile.
    pub(crate) fn wait_for_turn(&self, fields_guard: &mut MutexGuard<LockedDbFields>) {
        self.thread_signaller.wait(fields_guard)
    }

    /// Wake the writer's thread; it may now be its turn or its operation may have completed.
    pub(crate) fn notify_writer(&self) -> bool {
        self.thread_signaller.notify_one()
    }

    /// Whether the operation has completed.
    pub(crate) fn is_operation_complete(&self) -> bool {
        self.inner.lock().operation_completed
    }

    /// Get a copy of the result of the write operation, if it has completed.
    pub(crate) fn get_operation_result(&self) -> Option<CairnDBResult<()>> {
        self.inner.lock().operation_result.clone()
    }

    /// Record the result of the write operation and mark it complete.
    pub(crate) fn set_operation_result(&self, operation_result: CairnDBResult<()>) {
        let mut inner_guard = self.inner.lock();
        inner_guard.operation_result = Some(operation_result);
        inner_guard.operation_completed = true;
    }
}
