/*!
The flush worker drains immutable memtables into level-0 table files.

A flush splits the memtable's sorted stream at the complete level-0 guard boundaries, producing
one table per touched partition plus a sentinel table, discovers new guard candidates from the
keys it writes, and installs the result through the manifest protocol. Only after the edit is
durable is the immutable memtable discarded and its write-ahead log released for collection.
*/

use parking_lot::MutexGuard;
use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::db::{self, DbContext, LockedDbFields};
use crate::guards::{self, GuardKey};
use crate::iterator::StorageIterator;
use crate::key::InternalKey;
use crate::memtable::MemTable;
use crate::options::DbOptions;
use crate::tables::TableBuilder;
use crate::versioning::{VersionEdit, VersionSet};

use super::errors::{CompactionWorkerError, CompactionWorkerResult};
use super::stats::LevelCompactionStats;
use super::WorkerTask;

/// Name of the flush thread.
const FLUSH_THREAD_NAME: &str = "cairndb-flush";

/// One table file produced by draining a memtable.
pub(crate) struct Level0Output {
    /// The file number of the produced table.
    pub(crate) file_number: u64,

    /// The size of the produced table in bytes.
    pub(crate) file_size: u64,

    /// The smallest key written to the table.
    pub(crate) smallest_key: InternalKey,

    /// The largest key written to the table.
    pub(crate) largest_key: InternalKey,

    /**
    The guard partition the table landed in: an index into the complete level-0 guard set, or
    [`None`] for the sentinel partition.
    */
    pub(crate) partition: Option<usize>,
}

/// Everything a memtable drain produced.
pub(crate) struct Level0BuildOutcome {
    /// The produced tables in key order.
    pub(crate) outputs: Vec<Level0Output>,

    /// Guard candidates discovered among the written keys, with their shallowest levels.
    pub(crate) discovered_guards: Vec<(usize, GuardKey)>,
}

/**
Drain a sorted stream of entries into level-0 tables split at the provided complete guard
boundaries.

This is shared by the background flush and by write-ahead log replay during recovery, which is
why file numbers come from a caller-supplied allocator instead of the version set directly.
*/
pub(crate) fn build_level0_tables(
    options: &DbOptions,
    complete_l0_guards: &[GuardKey],
    entries: &mut dyn StorageIterator,
    allocate_file_number: &mut dyn FnMut() -> u64,
) -> CompactionWorkerResult<Level0BuildOutcome> {
    let mut outputs: Vec<Level0Output> = vec![];
    let mut discovered: BTreeSet<(usize, GuardKey)> = BTreeSet::new();

    let mut builder: Option<TableBuilder> = None;
    let mut current_output: Option<Level0Output> = None;
    let mut last_user_key: Option<Vec<u8>> = None;

    entries.seek_to_first().map_err(|err| {
        CompactionWorkerError::UnexpectedState(format!(
            "Could not start iterating a memtable for flushing. Error: {err}"
        ))
    })?;

    loop {
        let (key, value) = match entries.current() {
            Some((key, value)) => (key.clone(), value.clone()),
            None => break,
        };
        let user_key = key.get_user_key().to_vec();

        let is_new_user_key = last_user_key
            .as_ref()
            .map_or(true, |previous| previous != &user_key);
        if is_new_user_key {
            if let Some(guard_level) = guards::shallowest_guard_level(&user_key) {
                discovered.insert((guard_level, GuardKey::new(user_key.clone())));
            }
            last_user_key = Some(user_key.clone());
        }

        let partition = guards::partition_for_key_in_keys(complete_l0_guards, &user_key);
        let crosses_partition = current_output
            .as_ref()
            .map_or(false, |output| output.partition != partition);
        if crosses_partition {
            finish_output(&mut builder, &mut current_output, &mut outputs)?;
        }

        if builder.is_none() {
            let file_number = allocate_file_number();
            builder = Some(TableBuilder::new(options.clone(), file_number)?);
            current_output = Some(Level0Output {
                file_number,
                file_size: 0,
                smallest_key: key.clone(),
                largest_key: key.clone(),
                partition,
            });
        }

        builder.as_mut().unwrap().add_entry(&key, &value)?;
        current_output.as_mut().unwrap().largest_key = key;

        if entries.next().is_none() {
            break;
        }
    }

    finish_output(&mut builder, &mut current_output, &mut outputs)?;

    Ok(Level0BuildOutcome {
        outputs,
        discovered_guards: discovered.into_iter().collect(),
    })
}

/// Finalize the open output table, if any, and record it.
fn finish_output(
    builder: &mut Option<TableBuilder>,
    current_output: &mut Option<Level0Output>,
    outputs: &mut Vec<Level0Output>,
) -> CompactionWorkerResult<()> {
    if let Some(open_builder) = builder.take() {
        let file_size = open_builder.finalize()?;
        let mut output = current_output.take().unwrap();
        output.file_size = file_size;
        outputs.push(output);
    }

    Ok(())
}

/**
The worker owning the memtable flush thread.

Tasks arrive over a channel so the same thread serves the lifetime of the database instead of
spawning per flush.
*/
pub(crate) struct FlushWorker {
    /// The join handle of the flush thread, used for graceful shutdown.
    maybe_handle: Option<JoinHandle<()>>,
}

/// Crate-only methods
impl FlushWorker {
    /// Create a new instance of [`FlushWorker`], spawning its thread.
    pub(crate) fn new(
        context: DbContext,
        task_receiver: Receiver<WorkerTask>,
    ) -> CompactionWorkerResult<Self> {
        log::info!("Starting the background flush thread.");
        let handle = thread::Builder::new()
            .name(FLUSH_THREAD_NAME.to_string())
            .spawn(move || loop {
                match task_receiver.recv() {
                    Ok(WorkerTask::Work) => FlushWorker::flush_task(&context),
                    Ok(WorkerTask::Terminate) => {
                        log::info!("Flush thread received the termination command.");
                        break;
                    }
                    Err(_) => {
                        log::warn!("The flush task channel disconnected. Shutting down.");
                        break;
                    }
                }
            })?;

        Ok(Self {
            maybe_handle: Some(handle),
        })
    }

    /// Wait for the flush thread to exit.
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.maybe_handle.take() {
            if handle.join().is_err() {
                log::error!("The flush thread panicked while shutting down.");
            }
        }
    }
}

/// Private methods
impl FlushWorker {
    /// Entry point for one scheduled flush.
    fn flush_task(context: &DbContext) {
        let mut fields_guard = context.guarded_fields.lock();

        if context.is_shutting_down.load(Ordering::Acquire) {
            log::info!("Flush thread observed database shutdown. Halting flush work.");
        } else if fields_guard.maybe_bad_database_state.is_some() {
            log::warn!("Flush thread observed a bad database state. Halting flush work.");
        } else if fields_guard.maybe_immutable_memtable.is_some() {
            FlushWorker::flush_memtable(context, &mut fields_guard);
        }

        fields_guard.background_flush_scheduled = false;
        context.background_work_finished_signal.notify_all();
    }

    /**
    Flush the immutable memtable to level-0 tables and install the result.

    # Panics

    An immutable memtable must exist when this method is called.
    */
    fn flush_memtable(context: &DbContext, fields_guard: &mut MutexGuard<LockedDbFields>) {
        assert!(fields_guard.maybe_immutable_memtable.is_some());

        log::info!("Flushing the immutable memtable to level-0 table files.");
        let flush_start = Instant::now();
        let immutable_memtable: Arc<dyn MemTable> =
            Arc::clone(fields_guard.maybe_immutable_memtable.as_ref().unwrap());
        let base_version = fields_guard.version_set.get_current_version();
        let complete_l0_guards: Vec<GuardKey> =
            base_version.read().element.complete_guards[0].clone();
        fields_guard.version_set.release_version(base_version);

        // Build the tables with the database mutex released; file numbers are allocated by
        // briefly re-taking the mutex
        let (build_result, allocated_file_numbers) =
            MutexGuard::<'_, LockedDbFields>::unlocked_fair(fields_guard, || {
                let mut allocated: Vec<u64> = vec![];
                let mut allocate = || {
                    let mut reacquired = context.guarded_fields.lock();
                    let file_number = reacquired.version_set.get_new_file_number();
                    reacquired.pending_outputs.insert(file_number);
                    allocated.push(file_number);
                    file_number
                };

                let mut entries = immutable_memtable.iter();
                let result = build_level0_tables(
                    &context.options,
                    &complete_l0_guards,
                    entries.as_mut(),
                    &mut allocate,
                );

                (result, allocated)
            });

        let outcome = match build_result {
            Ok(outcome) => outcome,
            Err(build_error) => {
                for file_number in allocated_file_numbers {
                    fields_guard.pending_outputs.remove(&file_number);
                }
                log::error!(
                    "Failed to build level-0 tables from the immutable memtable. The memtable \
                    is retained for retry. Error: {build_error}"
                );
                db::set_bad_database_state(context, fields_guard, build_error.into());
                return;
            }
        };

        if context.is_shutting_down.load(Ordering::Acquire) {
            for file_number in allocated_file_numbers {
                fields_guard.pending_outputs.remove(&file_number);
            }
            log::info!("Database shutdown detected mid-flush. Abandoning the flush edit.");
            return;
        }

        // Assemble the edit: new level-0 files, guard promotions for partitions that received
        // a file, and newly discovered candidates
        let mut edit = VersionEdit::default();
        let mut bytes_written: u64 = 0;
        let mut promoted: BTreeSet<GuardKey> = BTreeSet::new();
        for output in &outcome.outputs {
            bytes_written += output.file_size;
            edit.add_file(
                0,
                output.file_number,
                output.file_size,
                output.smallest_key.clone()..output.largest_key.clone(),
            );
            if let Some(partition_index) = output.partition {
                promoted.insert(complete_l0_guards[partition_index].clone());
            }
        }
        for guard_key in promoted {
            edit.add_guard(0, guard_key);
        }
        for (guard_level, guard_key) in outcome.discovered_guards {
            edit.add_complete_guard(guard_level, guard_key);
        }

        // The memtable's log is obsolete once the edit lands
        edit.prev_wal_file_number = Some(0);
        edit.wal_file_number = Some(fields_guard.curr_wal_number);

        let apply_result = VersionSet::log_and_apply(context, fields_guard, &mut edit);
        for file_number in allocated_file_numbers {
            fields_guard.pending_outputs.remove(&file_number);
        }
        if let Err(apply_error) = apply_result {
            log::error!(
                "Failed to install the flush edit in the manifest. Error: {apply_error}"
            );
            db::set_bad_database_state(
                context,
                fields_guard,
                CompactionWorkerError::VersionWrite(apply_error).into(),
            );
            return;
        }

        let flush_stats = LevelCompactionStats {
            compaction_duration: flush_start.elapsed(),
            bytes_read: 0,
            bytes_written,
        };
        fields_guard.compaction_stats[0].add_stats(&flush_stats);

        fields_guard.maybe_immutable_memtable = None;
        context.has_immutable_memtable.store(false, Ordering::Release);
        fields_guard.version_set.set_prev_wal_number(None);

        db::remove_obsolete_files(context, fields_guard);

        log::info!(
            "Memtable flush complete: {num_outputs} level-0 files, {bytes_written} bytes. \
            {summary}",
            num_outputs = outcome.outputs.len(),
            summary = fields_guard.version_set.level_summary()
        );

        // The new level-0 files may have tipped a score over the threshold
        db::maybe_schedule_compaction(context, fields_guard);
    }
}
