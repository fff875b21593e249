/*!
The compaction worker merges overloaded guard partitions into the next level.

Work selection is score driven: the version tracks which level is most over budget, the picker
chooses the fullest partition there, and the merge rewrites those files plus every touched
partition of the destination level. Entries shadowed by newer versions are dropped once no
live snapshot can see them, and deletion markers are dropped at the key's base level.
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
use crate::key::{InternalKey, Operation, MAX_SEQUENCE_NUMBER};
use crate::tables::TableBuilder;
use crate::versioning::{VersionEdit, VersionSet};

use super::errors::{CompactionWorkerError, CompactionWorkerResult};
use super::job::CompactionJob;
use super::stats::LevelCompactionStats;
use super::WorkerTask;

/// Name of the compaction thread.
const COMPACTION_THREAD_NAME: &str = "cairndb-compact";

/// How many merged entries are processed between shutdown checks.
const SHUTDOWN_CHECK_INTERVAL: usize = 1000;

/// One table file produced by a compaction.
struct CompactionOutput {
    /// The file number of the produced table.
    file_number: u64,

    /// The size of the produced table in bytes.
    file_size: u64,

    /// The smallest key written to the table.
    smallest_key: InternalKey,

    /// The largest key written to the table.
    largest_key: InternalKey,

    /**
    The output-level guard partition the table landed in: an index into the complete guard
    set of the output level, or [`None`] for the sentinel partition.
    */
    partition: Option<usize>,
}

/// Everything the merge phase of a compaction produced.
struct CompactionOutcome {
    /// The produced tables in key order.
    outputs: Vec<CompactionOutput>,

    /// Guard candidates discovered among the written keys, with their shallowest levels.
    discovered_guards: Vec<(usize, GuardKey)>,
}

/**
The worker owning the level compaction thread.

Tasks arrive over a channel so the same thread serves the lifetime of the database instead of
spawning per compaction.
*/
pub(crate) struct CompactionWorker {
    /// The join handle of the compaction thread, used for graceful shutdown.
    maybe_handle: Option<JoinHandle<()>>,
}

/// Crate-only methods
impl CompactionWorker {
    /// Create a new instance of [`CompactionWorker`], spawning its thread.
    pub(crate) fn new(
        context: DbContext,
        task_receiver: Receiver<WorkerTask>,
    ) -> CompactionWorkerResult<Self> {
        log::info!("Starting the background compaction thread.");
        let handle = thread::Builder::new()
            .name(COMPACTION_THREAD_NAME.to_string())
            .spawn(move || loop {
                match task_receiver.recv() {
                    Ok(WorkerTask::Work) => CompactionWorker::compaction_task(&context),
                    Ok(WorkerTask::Terminate) => {
                        log::info!("Compaction thread received the termination command.");
                        break;
                    }
                    Err(_) => {
                        log::warn!("The compaction task channel disconnected. Shutting down.");
                        break;
                    }
                }
            })?;

        Ok(Self {
            maybe_handle: Some(handle),
        })
    }

    /// Wait for the compaction thread to exit.
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.maybe_handle.take() {
            if handle.join().is_err() {
                log::error!("The compaction thread panicked while shutting down.");
            }
        }
    }
}

/// Private methods
impl CompactionWorker {
    /// Entry point for one scheduled compaction pass.
    fn compaction_task(context: &DbContext) {
        let mut fields_guard = context.guarded_fields.lock();

        if context.is_shutting_down.load(Ordering::Acquire) {
            log::info!("Compaction thread observed database shutdown. Halting work.");
        } else if fields_guard.maybe_bad_database_state.is_some() {
            log::warn!("Compaction thread observed a bad database state. Halting work.");
        } else {
            CompactionWorker::coordinate_compaction(context, &mut fields_guard);
        }

        fields_guard.background_compaction_scheduled = false;

        // The pass may have pushed another level over its budget, or a manual request may
        // still be outstanding
        if fields_guard.version_set.needs_compaction()
            || fields_guard.maybe_manual_compaction.is_some()
        {
            db::maybe_schedule_compaction(context, &mut fields_guard);
        }

        context.background_work_finished_signal.notify_all();
    }

    /// Select and run one compaction, preferring manual requests.
    fn coordinate_compaction(
        context: &DbContext,
        fields_guard: &mut MutexGuard<LockedDbFields>,
    ) {
        let maybe_job = if let Some(manual) = fields_guard.maybe_manual_compaction.clone() {
            let (level, begin, end) = {
                let manual_guard = manual.lock();
                (
                    manual_guard.level,
                    manual_guard.begin.clone(),
                    manual_guard.end.clone(),
                )
            };
            log::info!("Serving a manual compaction request for level {level}.");

            let maybe_job = CompactionJob::pick_manual(
                &fields_guard.version_set,
                &context.options,
                level,
                begin.as_deref(),
                end.as_deref(),
            );
            if maybe_job.is_none() {
                // Nothing overlaps the requested range; the request is complete
                manual.lock().done = true;
                fields_guard.maybe_manual_compaction = None;
            }

            maybe_job
        } else {
            CompactionJob::pick(&fields_guard.version_set, &context.options)
        };

        let job = match maybe_job {
            Some(job) => job,
            None => return,
        };
        let was_manual = job.is_manual;

        let compaction_result = CompactionWorker::compact_files(context, fields_guard, job);
        match compaction_result {
            Ok(()) => {
                if was_manual {
                    if let Some(manual) = fields_guard.maybe_manual_compaction.take() {
                        manual.lock().done = true;
                    }
                }
            }
            Err(compaction_error) => {
                // Compaction failures are retried on the next scheduling tick; reads are
                // unaffected because the input version remains current
                log::error!(
                    "A compaction failed and will be retried. Error: {compaction_error}"
                );
                if was_manual {
                    if let Some(manual) = fields_guard.maybe_manual_compaction.take() {
                        manual.lock().done = true;
                    }
                }
            }
        }
    }

    /**
    Execute the merge described by `job` and install the result.

    # Panics

    The job must have input files at its compaction level.
    */
    fn compact_files(
        context: &DbContext,
        fields_guard: &mut MutexGuard<LockedDbFields>,
        job: CompactionJob,
    ) -> CompactionWorkerResult<()> {
        assert!(!job.level_inputs.is_empty());

        if fields_guard.levels_locked[job.level] || fields_guard.levels_locked[job.output_level]
        {
            // Another compaction is touching these levels; retry on a later tick
            let input_version = job.input_version;
            fields_guard.version_set.release_version(input_version);
            return Ok(());
        }
        fields_guard.levels_locked[job.level] = true;
        fields_guard.levels_locked[job.output_level] = true;

        log::info!(
            "Compacting {num_level_files} files at level {level} with {num_parent_files} \
            files at level {output_level}.",
            num_level_files = job.level_inputs.len(),
            level = job.level,
            num_parent_files = job.parent_inputs.len(),
            output_level = job.output_level
        );

        let compaction_start = Instant::now();
        let bytes_read = job.total_input_bytes();

        // Entries below every live snapshot can be dropped once shadowed
        let smallest_snapshot = if fields_guard.snapshots.is_empty() {
            fields_guard.version_set.get_prev_sequence_number()
        } else {
            fields_guard
                .snapshots
                .oldest()
                .read()
                .element
                .sequence_number()
        };

        let result = CompactionWorker::merge_inputs(
            context,
            fields_guard,
            &job,
            smallest_snapshot,
        );

        let install_result = match result {
            Ok((outcome, allocated)) => {
                let install = CompactionWorker::install_compaction_results(
                    context,
                    fields_guard,
                    &job,
                    &outcome,
                );
                for file_number in allocated {
                    fields_guard.pending_outputs.remove(&file_number);
                }

                match install {
                    Ok(()) => {
                        let bytes_written: u64 =
                            outcome.outputs.iter().map(|output| output.file_size).sum();
                        let stats = LevelCompactionStats {
                            compaction_duration: compaction_start.elapsed(),
                            bytes_read,
                            bytes_written,
                        };
                        fields_guard.compaction_stats[job.output_level].add_stats(&stats);

                        db::remove_obsolete_files(context, fields_guard);
                        log::info!(
                            "Compaction into level {output_level} complete: {num_outputs} \
                            output files, {bytes_written} bytes. {summary}",
                            output_level = job.output_level,
                            num_outputs = outcome.outputs.len(),
                            summary = fields_guard.version_set.level_summary()
                        );

                        Ok(())
                    }
                    Err(install_error) => Err(install_error),
                }
            }
            Err((merge_error, allocated)) => {
                // Orphaned outputs are swept once their numbers leave `pending_outputs`
                for file_number in allocated {
                    fields_guard.pending_outputs.remove(&file_number);
                }
                db::remove_obsolete_files(context, fields_guard);

                Err(merge_error)
            }
        };

        fields_guard.levels_locked[job.level] = false;
        fields_guard.levels_locked[job.output_level] = false;

        let input_version = job.input_version;
        fields_guard.version_set.release_version(input_version);

        install_result
    }

    /**
    Run the merge loop with the database mutex released.

    Returns the produced outputs and the file numbers allocated along the way (which the
    caller must clear from `pending_outputs` whatever the outcome).
    */
    #[allow(clippy::type_complexity)]
    fn merge_inputs(
        context: &DbContext,
        fields_guard: &mut MutexGuard<LockedDbFields>,
        job: &CompactionJob,
        smallest_snapshot: u64,
    ) -> Result<(CompactionOutcome, Vec<u64>), (CompactionWorkerError, Vec<u64>)> {
        MutexGuard::<'_, LockedDbFields>::unlocked_fair(fields_guard, || {
            let mut allocated: Vec<u64> = vec![];

            let merge_result = (|| -> CompactionWorkerResult<CompactionOutcome> {
                let mut entries = job
                    .make_merging_iterator(Arc::clone(&context.table_cache))
                    .map_err(|err| {
                        CompactionWorkerError::UnexpectedState(format!(
                            "Could not open the compaction inputs. Error: {err}"
                        ))
                    })?;
                entries.seek_to_first().map_err(|err| {
                    CompactionWorkerError::UnexpectedState(format!(
                        "Could not position the compaction cursor. Error: {err}"
                    ))
                })?;

                let mut outputs: Vec<CompactionOutput> = vec![];
                let mut discovered: BTreeSet<(usize, GuardKey)> = BTreeSet::new();
                let mut builder: Option<TableBuilder> = None;
                let mut current_output: Option<CompactionOutput> = None;

                let mut maybe_current_user_key: Option<Vec<u8>> = None;
                let mut last_sequence_for_key = MAX_SEQUENCE_NUMBER;
                let mut entries_processed: usize = 0;

                loop {
                    let (key, value) = match entries.current() {
                        Some((key, value)) => (key.clone(), value.clone()),
                        None => break,
                    };

                    entries_processed += 1;
                    if entries_processed % SHUTDOWN_CHECK_INTERVAL == 0
                        && context.is_shutting_down.load(Ordering::Acquire)
                    {
                        return Err(CompactionWorkerError::UnexpectedState(
                            "Database shutdown detected mid-compaction.".to_string(),
                        ));
                    }

                    let user_key = key.get_user_key().to_vec();
                    let is_first_occurrence = maybe_current_user_key
                        .as_ref()
                        .map_or(true, |current| current != &user_key);
                    if is_first_occurrence {
                        maybe_current_user_key = Some(user_key.clone());
                        last_sequence_for_key = MAX_SEQUENCE_NUMBER;

                        if let Some(guard_level) = guards::shallowest_guard_level(&user_key) {
                            discovered.insert((guard_level, GuardKey::new(user_key.clone())));
                        }
                    }

                    let mut should_drop_entry = false;
                    if last_sequence_for_key <= smallest_snapshot {
                        // A newer entry for this user key was already emitted and is visible
                        // to every live snapshot
                        should_drop_entry = true;
                    } else if key.get_operation() == Operation::Delete
                        && key.get_sequence_number() <= smallest_snapshot
                        && job.is_base_level_for_key(&user_key)
                    {
                        /*
                        This user key has no data below the output level, younger levels
                        hold only larger sequence numbers, and the smaller sequence numbers
                        within this compaction will be dropped by the shadowing rule above.
                        The marker itself is therefore unobservable.
                        */
                        should_drop_entry = true;
                    }
                    last_sequence_for_key = key.get_sequence_number();

                    if !should_drop_entry {
                        let partition = guards::partition_for_key_in_keys(
                            &job.output_guard_keys,
                            &user_key,
                        );

                        let must_roll_output = match (&builder, &current_output) {
                            (Some(open_builder), Some(output)) => {
                                output.partition != partition
                                    || open_builder.current_file_size()
                                        >= job.max_output_file_size
                            }
                            _ => false,
                        };
                        if must_roll_output {
                            CompactionWorker::finish_output(
                                &mut builder,
                                &mut current_output,
                                &mut outputs,
                            )?;
                        }

                        if builder.is_none() {
                            let file_number = {
                                let mut reacquired = context.guarded_fields.lock();
                                let number = reacquired.version_set.get_new_file_number();
                                reacquired.pending_outputs.insert(number);
                                number
                            };
                            allocated.push(file_number);
                            builder =
                                Some(TableBuilder::new(context.options.clone(), file_number)?);
                            current_output = Some(CompactionOutput {
                                file_number,
                                file_size: 0,
                                smallest_key: key.clone(),
                                largest_key: key.clone(),
                                partition,
                            });
                        }

                        builder.as_mut().unwrap().add_entry(&key, &value)?;
                        current_output.as_mut().unwrap().largest_key = key;
                    }

                    if entries.next().is_none() {
                        break;
                    }
                }

                CompactionWorker::finish_output(&mut builder, &mut current_output, &mut outputs)?;

                Ok(CompactionOutcome {
                    outputs,
                    discovered_guards: discovered.into_iter().collect(),
                })
            })();

            match merge_result {
                Ok(outcome) => Ok((outcome, allocated)),
                Err(error) => Err((error, allocated)),
            }
        })
    }

    /// Finalize the open output table, if any, and record it.
    fn finish_output(
        builder: &mut Option<TableBuilder>,
        current_output: &mut Option<CompactionOutput>,
        outputs: &mut Vec<CompactionOutput>,
    ) -> CompactionWorkerResult<()> {
        if let Some(open_builder) = builder.take() {
            let file_size = open_builder.finalize()?;
            let mut output = current_output.take().unwrap();
            output.file_size = file_size;
            outputs.push(output);
        }

        Ok(())
    }

    /// Build and apply the edit describing a finished compaction.
    fn install_compaction_results(
        context: &DbContext,
        fields_guard: &mut MutexGuard<LockedDbFields>,
        job: &CompactionJob,
        outcome: &CompactionOutcome,
    ) -> CompactionWorkerResult<()> {
        let mut edit = VersionEdit::default();

        for file in &job.level_inputs {
            edit.remove_file(job.level, file.file_number());
        }
        for file in &job.parent_inputs {
            edit.remove_file(job.output_level, file.file_number());
        }

        let mut promoted: BTreeSet<GuardKey> = BTreeSet::new();
        for output in &outcome.outputs {
            edit.add_file(
                job.output_level,
                output.file_number,
                output.file_size,
                output.smallest_key.clone()..output.largest_key.clone(),
            );
            if let Some(partition_index) = output.partition {
                promoted.insert(job.output_guard_keys[partition_index].clone());
            }
        }
        for guard_key in promoted {
            edit.add_guard(job.output_level, guard_key);
        }
        for (guard_level, guard_key) in &outcome.discovered_guards {
            edit.add_complete_guard(*guard_level, guard_key.clone());
        }

        VersionSet::log_and_apply(context, fields_guard, &mut edit)
            .map_err(CompactionWorkerError::VersionWrite)
    }
}
