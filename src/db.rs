/*!
The database module contains the primary API for interacting with the key-value store.

The `DB` type orchestrates everything the other modules provide: the writer queue and group
commit protocol, memtable rotation with level-0 admission control, the snapshot-consistent
read path across memtables and versions, background flush and compaction scheduling, recovery
from the manifest and write-ahead logs, and collection of obsolete files.
*/

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use crate::batch::Batch;
use crate::compaction::flush::build_level0_tables;
use crate::compaction::manual::ManualCompaction;
use crate::compaction::stats::LevelCompactionStats;
use crate::compaction::{CompactionWorker, FlushWorker, WorkerTask};
use crate::config::{
    GROUP_COMMIT_SMALL_WRITE_THRESHOLD_BYTES, L0_SLOWDOWN_WRITES_TRIGGER,
    L0_STOP_WRITES_TRIGGER, MAX_GROUP_COMMIT_SIZE_BYTES, MAX_NUM_LEVELS,
    SMALL_WRITE_ADDITIONAL_GROUP_COMMIT_SIZE_BYTES,
};
use crate::db_iterator::DbIterator;
use crate::errors::{CairnDBError, CairnDBResult};
use crate::file_names::{FileNameResolver, ParsedFileType};
use crate::fs::FileLock;
use crate::guards::GuardKey;
use crate::iterator::StorageIterator;
use crate::key::InternalKey;
use crate::logs::{LogReader, LogWriter};
use crate::memtable::{MemTable, MemtableLookupResult, SkipMapMemTable};
use crate::options::{DbOptions, ReadOptions, WriteOptions};
use crate::snapshots::{Snapshot, SnapshotList};
use crate::table_cache::TableCache;
use crate::tables::{Table, TableBuilder};
use crate::versioning::file_iterators::{LevelPartitionIterator, MergingIterator};
use crate::versioning::version::VersionLookupResult;
use crate::versioning::{VersionEdit, VersionSet};
use crate::writers::Writer;

/// How long a write sleeps when level 0 crosses the slowdown threshold.
const L0_SLOWDOWN_SLEEP: Duration = Duration::from_millis(1);

/**
The fields of the database protected by the primary mutex.

The mutex is held only for pointer swaps and bookkeeping; all heavy I/O (log appends, table
builds, manifest writes) happens with the mutex released.
*/
pub(crate) struct LockedDbFields {
    /// The memtable currently absorbing writes.
    pub(crate) memtable: Arc<dyn MemTable>,

    /// The memtable being flushed to level 0, when one is outstanding.
    pub(crate) maybe_immutable_memtable: Option<Arc<dyn MemTable>>,

    /// The writer for the active write-ahead log. Only the leader writer appends to it.
    pub(crate) wal: Arc<Mutex<LogWriter>>,

    /**
    The file number of the active write-ahead log.

    Updated optimistically at rotation time; the manifest learns of it via the flush edit.
    */
    pub(crate) curr_wal_number: u64,

    /// The version set holding the persistent level structure.
    pub(crate) version_set: VersionSet,

    /// Queued writers. The front writer is the leader performing the group commit.
    pub(crate) writer_queue: VecDeque<Arc<Writer>>,

    /// The live snapshots, oldest first.
    pub(crate) snapshots: SnapshotList,

    /**
    File numbers of tables currently being produced by a flush or compaction.

    These are not referenced by any version yet and must be protected from collection.
    */
    pub(crate) pending_outputs: HashSet<u64>,

    /// Cumulative statistics for work written into each level.
    pub(crate) compaction_stats: [LevelCompactionStats; MAX_NUM_LEVELS],

    /**
    A sticky error recorded when a background task or log write fails in a way that makes
    continuing unsafe. Writes fail with this error until the database is reopened.
    */
    pub(crate) maybe_bad_database_state: Option<CairnDBError>,

    /// Whether a flush task has been handed to the flush worker and not yet completed.
    pub(crate) background_flush_scheduled: bool,

    /// Whether a compaction task has been handed to the compaction worker.
    pub(crate) background_compaction_scheduled: bool,

    /// Token serializing manifest log-and-apply operations.
    pub(crate) manifest_log_occupied: bool,

    /// An outstanding caller-requested compaction, when one exists.
    pub(crate) maybe_manual_compaction: Option<Arc<Mutex<ManualCompaction>>>,

    /// Per-level flags preventing two simultaneous compactions from touching one level.
    pub(crate) levels_locked: [bool; MAX_NUM_LEVELS],
}

/**
The shareable, mutex-free portion of database state handed to background workers.

Everything here is either immutable or internally synchronized.
*/
#[derive(Clone)]
pub(crate) struct DbContext {
    /// Database options.
    pub(crate) options: DbOptions,

    /// The mutex-protected fields.
    pub(crate) guarded_fields: Arc<Mutex<LockedDbFields>>,

    /// Set when the database begins shutting down.
    pub(crate) is_shutting_down: Arc<AtomicBool>,

    /// Mirrors whether an immutable memtable exists, readable without the mutex.
    pub(crate) has_immutable_memtable: Arc<AtomicBool>,

    /// Signalled whenever a background task finishes a unit of work.
    pub(crate) background_work_finished_signal: Arc<Condvar>,

    /// Signalled when the manifest log-and-apply token is released.
    pub(crate) manifest_log_signal: Arc<Condvar>,

    /// The shared cache of open table readers.
    pub(crate) table_cache: Arc<TableCache>,

    /// Resolver for the file names used by the database.
    pub(crate) file_name_resolver: Arc<FileNameResolver>,

    /// Channel for scheduling flush work.
    pub(crate) flush_task_sender: Arc<Mutex<mpsc::Sender<WorkerTask>>>,

    /// Channel for scheduling compaction work.
    pub(crate) compaction_task_sender: Arc<Mutex<mpsc::Sender<WorkerTask>>>,
}

/// An embedded, persistent, ordered key-value store on a guarded log-structured merge-tree.
pub struct DB {
    /// Database options.
    options: DbOptions,

    /// The state bundle shared with background workers.
    context: DbContext,

    /// The mutex-protected fields. Same allocation as `context.guarded_fields`.
    guarded_fields: Arc<Mutex<LockedDbFields>>,

    /// Resolver for the file names used by the database.
    file_name_resolver: Arc<FileNameResolver>,

    /// The worker owning the flush thread.
    flush_worker: Mutex<Option<FlushWorker>>,

    /// The worker owning the compaction thread.
    compaction_worker: Mutex<Option<CompactionWorker>>,

    /// The held database directory lock. Released on drop.
    maybe_db_lock: Mutex<Option<FileLock>>,
}

/// Public methods
impl DB {
    /// Open (and if missing and permitted, create) the database at `options.db_path`.
    pub fn open(options: DbOptions) -> CairnDBResult<DB> {
        log::info!("Opening CairnDB with options {options:#?}");

        let filesystem_provider = options.filesystem_provider();
        let file_name_resolver = Arc::new(options.file_name_resolver());
        let db_path = file_name_resolver.get_db_path();

        if options.create_if_missing {
            filesystem_provider.create_dir_all(&db_path)?;
        }

        let db_lock = filesystem_provider.lock_file(&file_name_resolver.get_lock_file_path())?;

        let database_exists = filesystem_provider
            .get_file_size(&file_name_resolver.get_current_file_path())
            .is_ok();
        if database_exists && options.error_if_exists {
            return Err(CairnDBError::InvalidArgument(format!(
                "A database already exists at {db_path:?} and `error_if_exists` is set."
            )));
        }
        if !database_exists && !options.create_if_missing {
            return Err(CairnDBError::InvalidArgument(format!(
                "No database exists at {db_path:?} and `create_if_missing` is not set."
            )));
        }

        let table_cache = Arc::new(TableCache::new(options.clone(), options.max_open_files));
        let mut version_set = VersionSet::new(options.clone(), Arc::clone(&table_cache));

        let mut recovery_edit = VersionEdit::default();
        if database_exists {
            let reused_manifest = version_set.recover()?;
            log::info!(
                "Recovered the version set from the manifest (reused: {reused_manifest})."
            );

            DB::replay_write_ahead_logs(
                &options,
                file_name_resolver.as_ref(),
                &mut version_set,
                &mut recovery_edit,
            )?;
        }

        // Fresh write-ahead log for the new active memtable
        let wal_number = version_set.get_new_file_number();
        let wal_writer = LogWriter::new(
            Arc::clone(&filesystem_provider),
            file_name_resolver.get_wal_file_path(wal_number),
            false,
        )
        .map_err(CairnDBError::Log)?;
        recovery_edit.wal_file_number = Some(wal_number);
        recovery_edit.prev_wal_file_number = Some(0);

        let (flush_task_sender, flush_task_receiver) = mpsc::channel();
        let (compaction_task_sender, compaction_task_receiver) = mpsc::channel();

        let locked_fields = LockedDbFields {
            memtable: Arc::new(SkipMapMemTable::new()),
            maybe_immutable_memtable: None,
            wal: Arc::new(Mutex::new(wal_writer)),
            curr_wal_number: wal_number,
            version_set,
            writer_queue: VecDeque::new(),
            snapshots: SnapshotList::new(),
            pending_outputs: HashSet::new(),
            compaction_stats: Default::default(),
            maybe_bad_database_state: None,
            background_flush_scheduled: false,
            background_compaction_scheduled: false,
            manifest_log_occupied: false,
            maybe_manual_compaction: None,
            levels_locked: [false; MAX_NUM_LEVELS],
        };
        let guarded_fields = Arc::new(Mutex::new(locked_fields));

        let context = DbContext {
            options: options.clone(),
            guarded_fields: Arc::clone(&guarded_fields),
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            has_immutable_memtable: Arc::new(AtomicBool::new(false)),
            background_work_finished_signal: Arc::new(Condvar::new()),
            manifest_log_signal: Arc::new(Condvar::new()),
            table_cache: Arc::clone(&table_cache),
            file_name_resolver: Arc::clone(&file_name_resolver),
            flush_task_sender: Arc::new(Mutex::new(flush_task_sender)),
            compaction_task_sender: Arc::new(Mutex::new(compaction_task_sender)),
        };

        // Install the recovered (or initial) state; this also creates the first manifest and
        // `CURRENT` for a fresh database
        {
            let mut fields_guard = guarded_fields.lock();
            VersionSet::log_and_apply(&context, &mut fields_guard, &mut recovery_edit)
                .map_err(CairnDBError::VersionWrite)?;
            remove_obsolete_files(&context, &mut fields_guard);
        }

        let flush_worker = FlushWorker::new(context.clone(), flush_task_receiver)?;
        let compaction_worker = CompactionWorker::new(context.clone(), compaction_task_receiver)?;

        let db = DB {
            options,
            guarded_fields,
            file_name_resolver,
            flush_worker: Mutex::new(Some(flush_worker)),
            compaction_worker: Mutex::new(Some(compaction_worker)),
            maybe_db_lock: Mutex::new(Some(db_lock)),
            context,
        };

        {
            let mut fields_guard = db.guarded_fields.lock();
            maybe_schedule_compaction(&db.context, &mut fields_guard);
        }

        Ok(db)
    }

    /// Store `value` at `key`.
    pub fn put(
        &self,
        write_options: WriteOptions,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> CairnDBResult<()> {
        let mut batch = Batch::new();
        batch.add_put(key, value);

        self.write(write_options, batch)
    }

    /// Remove the entry at `key`, if one exists.
    pub fn delete(&self, write_options: WriteOptions, key: Vec<u8>) -> CairnDBResult<()> {
        let mut batch = Batch::new();
        batch.add_delete(key);

        self.write(write_options, batch)
    }

    /**
    Apply a batch of operations atomically.

    The calling thread queues behind concurrent writers; the thread at the front of the queue
    performs the combined log append and memtable insertion for as many queued batches as fit
    the group commit limits.
    */
    pub fn write(&self, write_options: WriteOptions, batch: Batch) -> CairnDBResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let writer = Arc::new(Writer::new(batch, write_options.sync));
        let mut fields_guard = self.guarded_fields.lock();
        fields_guard.writer_queue.push_back(Arc::clone(&writer));

        // Park until this writer's batch was absorbed into a group commit or it becomes the
        // leader
        while !writer.is_operation_complete()
            && !Arc::ptr_eq(&writer, fields_guard.writer_queue.front().unwrap())
        {
            writer.wait_for_turn(&mut fields_guard);
        }
        if writer.is_operation_complete() {
            return writer.get_operation_result().unwrap();
        }

        // This writer is the leader and performs the I/O for the whole group
        let mut group_status = self.make_room_for_write(&mut fields_guard, false);
        let mut writers_consumed = 1;

        if group_status.is_ok() {
            let (mut group_batch, group_size, requires_sync) =
                DB::build_group_commit(&fields_guard);
            writers_consumed = group_size;

            let starting_sequence = fields_guard.version_set.get_prev_sequence_number() + 1;
            group_batch.set_starting_sequence_number(starting_sequence);
            let last_sequence_in_group = starting_sequence + group_batch.len() as u64 - 1;

            let wal = Arc::clone(&fields_guard.wal);
            let memtable = Arc::clone(&fields_guard.memtable);
            let serialized_batch: Vec<u8> = Vec::from(&group_batch);

            // The log append and memtable inserts run with the mutex released. The entries
            // stay invisible to readers until the last-sequence bump below.
            let io_result = MutexGuard::<'_, LockedDbFields>::unlocked_fair(
                &mut fields_guard,
                || -> CairnDBResult<()> {
                    {
                        let mut wal_guard = wal.lock();
                        wal_guard.append(&serialized_batch).map_err(CairnDBError::Log)?;
                        if requires_sync {
                            wal_guard.sync().map_err(CairnDBError::Log)?;
                        }
                    }

                    let mut sequence = starting_sequence;
                    for element in group_batch.iter() {
                        memtable.insert(
                            InternalKey::new(
                                element.get_key().to_vec(),
                                sequence,
                                element.get_operation(),
                            ),
                            element.get_value().cloned().unwrap_or_default(),
                        );
                        sequence += 1;
                    }

                    Ok(())
                },
            );

            match io_result {
                Ok(()) => {
                    fields_guard
                        .version_set
                        .set_prev_sequence_number(last_sequence_in_group);
                    group_status = Ok(());
                }
                Err(write_error) => {
                    // A partial log append would corrupt replay ordering; fail all writes
                    // until the database is reopened
                    log::error!(
                        "A write-ahead log append failed; the database is entering a sticky \
                        error state. Error: {write_error}"
                    );
                    set_bad_database_state(&self.context, &mut fields_guard, write_error.clone());
                    group_status = Err(write_error);
                }
            }
        }

        // Release every writer in the group with the shared result
        for _ in 0..writers_consumed {
            let group_member = fields_guard.writer_queue.pop_front().unwrap();
            group_member.set_operation_result(group_status.clone());
            if !Arc::ptr_eq(&group_member, &writer) {
                group_member.notify_writer();
            }
        }

        // Wake the new leader, if any
        if let Some(next_leader) = fields_guard.writer_queue.front() {
            next_leader.notify_writer();
        }

        group_status
    }

    /**
    Get the value stored at `key`.

    Returns [`CairnDBError::KeyNotFound`] when no visible entry exists. Reads never block
    writes or compactions: they pin a version by reference count and probe the memtables and
    files outside the database mutex.
    */
    pub fn get(&self, read_options: ReadOptions, key: &[u8]) -> CairnDBResult<Vec<u8>> {
        let (sequence_number, memtable, maybe_immutable, version_node) = {
            let fields_guard = self.guarded_fields.lock();
            let sequence_number = read_options
                .snapshot
                .as_ref()
                .map(|snapshot| snapshot.sequence_number())
                .unwrap_or_else(|| fields_guard.version_set.get_prev_sequence_number());

            (
                sequence_number,
                Arc::clone(&fields_guard.memtable),
                fields_guard.maybe_immutable_memtable.clone(),
                fields_guard.version_set.get_current_version(),
            )
        };

        let seek_key = InternalKey::new_for_seeking(key.to_vec(), sequence_number);

        let mut result: Option<CairnDBResult<Vec<u8>>> = match memtable.get(&seek_key) {
            Some(MemtableLookupResult::Value(value)) => Some(Ok(value)),
            Some(MemtableLookupResult::Deleted) => Some(Err(CairnDBError::KeyNotFound)),
            None => None,
        };

        if result.is_none() {
            if let Some(immutable_memtable) = maybe_immutable.as_ref() {
                result = match immutable_memtable.get(&seek_key) {
                    Some(MemtableLookupResult::Value(value)) => Some(Ok(value)),
                    Some(MemtableLookupResult::Deleted) => {
                        Some(Err(CairnDBError::KeyNotFound))
                    }
                    None => None,
                };
            }
        }

        if result.is_none() {
            result = Some(
                match version_node.read().element.get(&read_options, &seek_key) {
                    Ok(VersionLookupResult::Found(value)) => Ok(value),
                    Ok(VersionLookupResult::Deleted) | Ok(VersionLookupResult::NotFound) => {
                        Err(CairnDBError::KeyNotFound)
                    }
                    Err(read_error) => Err(read_error.into()),
                },
            );
        }

        {
            let mut fields_guard = self.guarded_fields.lock();
            fields_guard.version_set.release_version(version_node);
        }

        result.unwrap()
    }

    /**
    Create an iterator over the user-visible entries of the database.

    The iterator observes the state at its creation (or at the read options' snapshot) and
    pins the files it reads until it is dropped.
    */
    pub fn new_iterator(&self, read_options: ReadOptions) -> CairnDBResult<DbIterator> {
        let mut fields_guard = self.guarded_fields.lock();
        let sequence_number = read_options
            .snapshot
            .as_ref()
            .map(|snapshot| snapshot.sequence_number())
            .unwrap_or_else(|| fields_guard.version_set.get_prev_sequence_number());

        let version_node = fields_guard.version_set.get_current_version();
        let table_cache = fields_guard.version_set.get_table_cache();

        let mut children: Vec<Box<dyn StorageIterator>> = vec![];
        children.push(fields_guard.memtable.iter());
        if let Some(immutable_memtable) = fields_guard.maybe_immutable_memtable.as_ref() {
            children.push(immutable_memtable.iter());
        }

        {
            let version = &version_node.read().element;

            // Level-0 ranges overlap, so every file is its own child
            for file in version.files_at_level(0) {
                children.push(Box::new(LevelPartitionIterator::new(
                    Arc::clone(&table_cache),
                    read_options.clone(),
                    vec![file],
                )));
            }

            // Deeper levels contribute one concatenating child per guard partition
            for level in 1..MAX_NUM_LEVELS {
                for partition_files in version.partition_file_lists(level) {
                    children.push(Box::new(LevelPartitionIterator::new(
                        Arc::clone(&table_cache),
                        read_options.clone(),
                        partition_files,
                    )));
                }
            }
        }

        drop(fields_guard);

        Ok(DbIterator::new(
            MergingIterator::new(children),
            sequence_number,
            version_node,
            Arc::clone(&self.guarded_fields),
        ))
    }

    /// Pin the current state for repeatable reads.
    pub fn get_snapshot(&self) -> Snapshot {
        let mut fields_guard = self.guarded_fields.lock();
        let sequence_number = fields_guard.version_set.get_prev_sequence_number();

        fields_guard.snapshots.new_snapshot(sequence_number)
    }

    /// Release a snapshot obtained from [`DB::get_snapshot`].
    pub fn release_snapshot(&self, snapshot: Snapshot) {
        let mut fields_guard = self.guarded_fields.lock();
        fields_guard.snapshots.release_snapshot(snapshot);
    }

    /**
    Estimate the on-disk size in bytes of each of the provided user key ranges.

    The estimate is computed from file metadata alone: a file wholly inside a range counts in
    full, a file straddling a range endpoint counts half. Memtable contents are not counted.
    */
    pub fn get_approximate_sizes(&self, ranges: &[(Vec<u8>, Vec<u8>)]) -> Vec<u64> {
        let mut fields_guard = self.guarded_fields.lock();
        let version_node = fields_guard.version_set.get_current_version();

        let estimates = {
            let version = &version_node.read().element;
            ranges
                .iter()
                .map(|(range_start, range_end)| {
                    let mut total: u64 = 0;
                    for level in 0..MAX_NUM_LEVELS {
                        for file in version.files_at_level(level) {
                            let file_start = file.smallest_key().get_user_key();
                            let file_end = file.largest_key().get_user_key();
                            if file_start >= range_start.as_slice()
                                && file_end <= range_end.as_slice()
                            {
                                total += file.get_file_size();
                            } else if file.overlaps_user_key_range(
                                Some(range_start),
                                Some(range_end),
                            ) {
                                total += file.get_file_size() / 2;
                            }
                        }
                    }
                    total
                })
                .collect()
        };

        fields_guard.version_set.release_version(version_node);

        estimates
    }

    /**
    Compact every level whose files overlap the provided user key range.

    The active memtable is flushed first, then each overlapping level is compacted into the
    next one, waiting for each step to complete. On an already-compacted range this is a
    no-op, which makes it idempotent.
    */
    pub fn compact_range(
        &self,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> CairnDBResult<()> {
        self.force_memtable_flush()?;

        for level in 0..(MAX_NUM_LEVELS - 1) {
            let level_has_overlap = {
                let mut fields_guard = self.guarded_fields.lock();
                let version_node = fields_guard.version_set.get_current_version();
                let has_overlap = !version_node
                    .read()
                    .element
                    .get_overlapping_compaction_inputs(level, begin, end)
                    .is_empty();
                fields_guard.version_set.release_version(version_node);
                has_overlap
            };
            if !level_has_overlap {
                continue;
            }

            let manual_request = Arc::new(Mutex::new(ManualCompaction {
                level,
                begin: begin.map(|key| key.to_vec()),
                end: end.map(|key| key.to_vec()),
                done: false,
            }));

            let mut fields_guard = self.guarded_fields.lock();
            while fields_guard.maybe_manual_compaction.is_some() {
                self.check_for_terminal_state(&fields_guard)?;
                self.context
                    .background_work_finished_signal
                    .wait(&mut fields_guard);
            }
            fields_guard.maybe_manual_compaction = Some(Arc::clone(&manual_request));
            maybe_schedule_compaction(&self.context, &mut fields_guard);

            while !manual_request.lock().done {
                self.check_for_terminal_state(&fields_guard)?;
                self.context
                    .background_work_finished_signal
                    .wait(&mut fields_guard);
            }
        }

        Ok(())
    }

    /**
    Query a named database property.

    Recognized names: `num-files-at-level<N>`, `num-guards-at-level<N>`,
    `num-guard-files-at-level<N>`, `num-sentinel-files-at-level<N>`,
    `guard-details-at-level<N>`, `sentinel-details-at-level<N>`, `sstables`, `stats` and
    `approximate-memory-usage`.
    */
    pub fn get_property(&self, property: &str) -> Option<String> {
        let fields_guard = self.guarded_fields.lock();
        let version_guard = fields_guard.version_set.current_version().read();
        let version = &version_guard.element;

        let parse_level = |rest: &str| -> Option<usize> {
            rest.parse::<usize>().ok().filter(|level| *level < MAX_NUM_LEVELS)
        };

        let value = if let Some(rest) = property.strip_prefix("num-files-at-level") {
            parse_level(rest).map(|level| version.num_files_at_level(level).to_string())
        } else if let Some(rest) = property.strip_prefix("num-guards-at-level") {
            parse_level(rest).map(|level| version.num_guards_at_level(level).to_string())
        } else if let Some(rest) = property.strip_prefix("num-guard-files-at-level") {
            parse_level(rest).map(|level| version.num_guard_files_at_level(level).to_string())
        } else if let Some(rest) = property.strip_prefix("num-sentinel-files-at-level") {
            parse_level(rest)
                .map(|level| version.num_sentinel_files_at_level(level).to_string())
        } else if let Some(rest) = property.strip_prefix("guard-details-at-level") {
            parse_level(rest).map(|level| {
                let mut details = String::new();
                for guard in &version.guards[level] {
                    let files: Vec<String> = guard
                        .get_files()
                        .iter()
                        .map(|file| {
                            format!(
                                "{number}({size})",
                                number = file.file_number(),
                                size = file.get_file_size()
                            )
                        })
                        .collect();
                    details.push_str(&format!(
                        "guard {key:?}: [{files}]\n",
                        key = guard.get_key(),
                        files = files.join(", ")
                    ));
                }
                details
            })
        } else if let Some(rest) = property.strip_prefix("sentinel-details-at-level") {
            parse_level(rest).map(|level| {
                let files: Vec<String> = version.sentinel_files[level]
                    .iter()
                    .map(|file| {
                        format!(
                            "{number}({size})",
                            number = file.file_number(),
                            size = file.get_file_size()
                        )
                    })
                    .collect();
                format!("sentinel: [{files}]\n", files = files.join(", "))
            })
        } else if property == "sstables" {
            let mut dump = String::new();
            for level in 0..MAX_NUM_LEVELS {
                dump.push_str(&format!("--- level {level} ---\n"));
                for file in version.files_at_level(level) {
                    dump.push_str(&format!(
                        "{number}: {size} bytes [{smallest:?} .. {largest:?}]\n",
                        number = file.file_number(),
                        size = file.get_file_size(),
                        smallest = file.smallest_key(),
                        largest = file.largest_key()
                    ));
                }
            }
            Some(dump)
        } else if property == "stats" {
            let mut dump = String::from(
                "Level  Files  Size(MB)  Time(sec)  Read(MB)  Write(MB)\n\
                 -------------------------------------------------------\n",
            );
            for level in 0..MAX_NUM_LEVELS {
                let stats = &fields_guard.compaction_stats[level];
                let num_files = version.num_files_at_level(level);
                if num_files == 0 && stats.is_empty() {
                    continue;
                }
                dump.push_str(&format!(
                    "{level:>5}  {files:>5}  {size:>8.1}  {time:>9.3}  {read:>8.1}  \
                    {write:>9.1}\n",
                    files = num_files,
                    size = version.get_level_size(level) as f64 / 1_048_576.0,
                    time = stats.compaction_duration.as_secs_f64(),
                    read = stats.bytes_read as f64 / 1_048_576.0,
                    write = stats.bytes_written as f64 / 1_048_576.0,
                ));
            }
            Some(dump)
        } else if property == "approximate-memory-usage" {
            let mut usage = fields_guard.memtable.approximate_memory_usage();
            if let Some(immutable_memtable) = fields_guard.maybe_immutable_memtable.as_ref() {
                usage += immutable_memtable.approximate_memory_usage();
            }
            Some(usage.to_string())
        } else {
            None
        };

        value
    }

    /**
    Snapshot every live file of the current version into the sibling directory
    `backup-<name>`.

    Table files are hard linked (they are immutable); the manifest and `CURRENT` are copied.
    The write pipeline is paused for the duration, giving the backup checkpoint semantics.
    */
    pub fn live_backup(&self, backup_name: &str) -> CairnDBResult<()> {
        if backup_name.is_empty() || backup_name.contains(std::path::is_separator) {
            return Err(CairnDBError::InvalidArgument(format!(
                "Backup names must be non-empty path components. Got {backup_name:?}."
            )));
        }

        let filesystem_provider = self.options.filesystem_provider();
        let fields_guard = self.guarded_fields.lock();

        let backup_dir = self.file_name_resolver.get_backup_dir_path(backup_name);
        filesystem_provider.create_dir_all(&backup_dir)?;

        for file_number in fields_guard.version_set.get_live_files() {
            let mut source = self.file_name_resolver.get_table_file_path(file_number);
            if filesystem_provider.get_file_size(&source).is_err() {
                source = self
                    .file_name_resolver
                    .get_legacy_table_file_path(file_number);
            }
            let destination = backup_dir.join(source.file_name().unwrap());
            if filesystem_provider.get_file_size(&destination).is_ok() {
                // Already present from an earlier backup attempt with the same name
                continue;
            }
            filesystem_provider.hard_link(&source, &destination)?;
        }

        let manifest_path = self
            .file_name_resolver
            .get_manifest_file_path(fields_guard.version_set.get_manifest_file_number());
        DB::copy_file_into(&*filesystem_provider, &manifest_path, &backup_dir)?;
        let current_path = self.file_name_resolver.get_current_file_path();
        DB::copy_file_into(&*filesystem_provider, &current_path, &backup_dir)?;

        log::info!("Live backup complete at {backup_dir:?}.");
        Ok(())
    }

    /**
    Shut the database down: stop background work, join the worker threads and release the
    directory lock. Further operations fail.

    Called automatically on drop if not called explicitly.
    */
    pub fn close(&self) -> CairnDBResult<()> {
        if self.context.is_shutting_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        log::info!("Shutting down the database.");

        {
            let mut fields_guard = self.guarded_fields.lock();
            // Wake anything parked on database conditions so it can observe the shutdown
            self.context.background_work_finished_signal.notify_all();
            self.context.manifest_log_signal.notify_all();

            while fields_guard.background_flush_scheduled
                || fields_guard.background_compaction_scheduled
            {
                self.context
                    .background_work_finished_signal
                    .wait(&mut fields_guard);
            }
        }

        let _ = self
            .context
            .flush_task_sender
            .lock()
            .send(WorkerTask::Terminate);
        let _ = self
            .context
            .compaction_task_sender
            .lock()
            .send(WorkerTask::Terminate);

        if let Some(mut flush_worker) = self.flush_worker.lock().take() {
            flush_worker.join();
        }
        if let Some(mut compaction_worker) = self.compaction_worker.lock().take() {
            compaction_worker.join();
        }

        self.maybe_db_lock.lock().take();
        log::info!("Database shutdown complete.");

        Ok(())
    }

    /**
    Remove every file belonging to the database at `options.db_path`.

    Unrecognized files are left alone. The directory itself is removed if it ends up empty.
    */
    pub fn destroy(options: DbOptions) -> CairnDBResult<()> {
        let filesystem_provider = options.filesystem_provider();
        let file_name_resolver = options.file_name_resolver();
        let db_path = file_name_resolver.get_db_path();

        let dir_entries = match filesystem_provider.list_dir(&db_path) {
            Ok(entries) => entries,
            // Nothing to destroy
            Err(_) => return Ok(()),
        };

        // Hold the lock while destroying so a live instance cannot race the deletion
        let db_lock = filesystem_provider.lock_file(&file_name_resolver.get_lock_file_path())?;

        for entry in dir_entries {
            match FileNameResolver::get_file_type_from_name(&entry) {
                Ok(ParsedFileType::DBLockFile) => continue,
                Ok(_) => {
                    if let Err(remove_error) = filesystem_provider.remove_file(&entry) {
                        log::warn!(
                            "Failed to remove {entry:?} while destroying the database. Error: \
                            {remove_error}"
                        );
                    }
                }
                Err(_) => continue,
            }
        }

        drop(db_lock);
        let _ = filesystem_provider.remove_file(&file_name_resolver.get_lock_file_path());
        let _ = filesystem_provider.remove_dir(&db_path);

        Ok(())
    }

    /**
    Best-effort salvage of a damaged database directory.

    Surviving table files are inventoried (their key ranges and sequence numbers recovered by
    scanning), orphaned write-ahead logs are replayed into fresh tables, and a new manifest is
    written that mounts every salvaged table into the level-0 sentinel partition. Normal
    compaction re-sorts the tree from there. Guard sets restart empty; the predicate
    rediscovers candidates as data is rewritten.
    */
    pub fn repair(options: DbOptions) -> CairnDBResult<()> {
        let filesystem_provider = options.filesystem_provider();
        let file_name_resolver = options.file_name_resolver();
        let db_path = file_name_resolver.get_db_path();

        let _db_lock =
            filesystem_provider.lock_file(&file_name_resolver.get_lock_file_path())?;

        let mut table_numbers: Vec<u64> = vec![];
        let mut wal_numbers: Vec<u64> = vec![];
        let mut expendable: Vec<PathBuf> = vec![];
        let mut max_file_number: u64 = 0;
        for entry in filesystem_provider.list_dir(&db_path)? {
            match FileNameResolver::get_file_type_from_name(&entry) {
                Ok(ParsedFileType::TableFile(number)) => {
                    table_numbers.push(number);
                    max_file_number = max_file_number.max(number);
                }
                Ok(ParsedFileType::WriteAheadLog(number)) => {
                    wal_numbers.push(number);
                    max_file_number = max_file_number.max(number);
                    expendable.push(entry);
                }
                Ok(ParsedFileType::ManifestFile(number)) => {
                    max_file_number = max_file_number.max(number);
                    expendable.push(entry);
                }
                Ok(ParsedFileType::TempFile(_)) | Ok(ParsedFileType::CurrentFile) => {
                    expendable.push(entry);
                }
                _ => {}
            }
        }
        wal_numbers.sort_unstable();

        let mut next_file_number = max_file_number + 1;
        let mut salvaged_max_sequence: u64 = 0;
        let mut edit = VersionEdit::default();

        // Convert every orphaned log into a fresh table
        for wal_number in wal_numbers {
            let salvage_result = DB::salvage_write_ahead_log(
                &options,
                &file_name_resolver,
                wal_number,
                &mut next_file_number,
                &mut edit,
                &mut salvaged_max_sequence,
            );
            if let Err(salvage_error) = salvage_result {
                log::warn!(
                    "Skipping unsalvageable write-ahead log {wal_number}. Error: \
                    {salvage_error}"
                );
            }
        }

        // Inventory surviving tables by scanning their contents
        for table_number in table_numbers {
            match DB::inventory_table(&options, &file_name_resolver, table_number) {
                Ok((file_size, smallest, largest, max_sequence)) => {
                    salvaged_max_sequence = salvaged_max_sequence.max(max_sequence);
                    edit.add_file(0, table_number, file_size, smallest..largest);
                }
                Err(inventory_error) => {
                    log::warn!(
                        "Skipping unreadable table file {table_number} during repair. Error: \
                        {inventory_error}"
                    );
                }
            }
        }

        // Write the replacement manifest and point CURRENT at it
        let manifest_number = next_file_number;
        next_file_number += 1;
        edit.wal_file_number = Some(0);
        edit.prev_wal_file_number = Some(0);
        edit.next_file_number = Some(next_file_number);
        edit.last_sequence_number = Some(salvaged_max_sequence);

        let manifest_path = file_name_resolver.get_manifest_file_path(manifest_number);
        let mut manifest_writer = LogWriter::new(
            Arc::clone(&filesystem_provider),
            &manifest_path,
            false,
        )
        .map_err(CairnDBError::Log)?;
        manifest_writer
            .append(&Vec::from(&edit))
            .map_err(CairnDBError::Log)?;
        manifest_writer.sync().map_err(CairnDBError::Log)?;
        drop(manifest_writer);

        VersionSet::set_current_file(
            Arc::clone(&filesystem_provider),
            &file_name_resolver,
            manifest_number,
        )?;

        // The replayed logs and superseded manifests are no longer needed
        for entry in expendable {
            if entry == file_name_resolver.get_current_file_path() {
                continue;
            }
            if let Err(remove_error) = filesystem_provider.remove_file(&entry) {
                log::warn!(
                    "Failed to remove {entry:?} after repair. Error: {remove_error}"
                );
            }
        }

        log::info!(
            "Repair of {db_path:?} complete: salvaged up to sequence {salvaged_max_sequence}."
        );
        Ok(())
    }
}

/// Private methods
impl DB {
    /**
    Ensure the active memtable has room for an incoming write.

    This is where the admission control of the write pipeline lives: the level-0 slowdown
    sleep, waiting out an unfinished flush, the level-0 hard stop, and memtable rotation with
    a fresh write-ahead log.
    */
    fn make_room_for_write(
        &self,
        fields_guard: &mut MutexGuard<LockedDbFields>,
        force_rotation: bool,
    ) -> CairnDBResult<()> {
        let mut allow_delay = !force_rotation;
        let mut force_rotation = force_rotation;

        loop {
            if self.context.is_shutting_down.load(Ordering::Acquire) {
                return Err(CairnDBError::Other(
                    "The database is shutting down.".to_string(),
                ));
            }
            if let Some(bad_state) = fields_guard.maybe_bad_database_state.as_ref() {
                return Err(bad_state.clone());
            }

            if allow_delay
                && fields_guard.version_set.num_files_at_level(0)
                    >= L0_SLOWDOWN_WRITES_TRIGGER
            {
                /*
                Level 0 is close to its hard limit. Surrender the mutex and this write's
                time slice briefly so the compaction threads can catch up, penalizing each
                write a little instead of stalling some writes for seconds.
                */
                MutexGuard::<'_, LockedDbFields>::unlocked_fair(fields_guard, || {
                    thread::sleep(L0_SLOWDOWN_SLEEP);
                });
                allow_delay = false;
                continue;
            }

            if !force_rotation
                && fields_guard.memtable.approximate_memory_usage()
                    < self.options.write_buffer_size
            {
                // There is room in the current memtable
                return Ok(());
            }

            if fields_guard.maybe_immutable_memtable.is_some() {
                log::info!("Waiting for the previous memtable flush to finish.");
                maybe_schedule_flush(&self.context, fields_guard);
                self.context
                    .background_work_finished_signal
                    .wait(fields_guard);
                continue;
            }

            if fields_guard.version_set.num_files_at_level(0) >= L0_STOP_WRITES_TRIGGER {
                log::warn!("Too many level-0 files. Stalling writes.");
                maybe_schedule_compaction(&self.context, fields_guard);
                self.context
                    .background_work_finished_signal
                    .wait(fields_guard);
                continue;
            }

            // Rotate: retire the current memtable and start a fresh one with a fresh log
            let new_wal_number = fields_guard.version_set.get_new_file_number();
            let wal_path = self.file_name_resolver.get_wal_file_path(new_wal_number);
            let new_wal = match LogWriter::new(
                self.options.filesystem_provider(),
                &wal_path,
                false,
            ) {
                Ok(wal_writer) => wal_writer,
                Err(wal_error) => {
                    fields_guard.version_set.reuse_file_number(new_wal_number);
                    return Err(CairnDBError::Log(wal_error));
                }
            };

            log::info!(
                "Rotating the memtable. New write-ahead log is {new_wal_number}; the old \
                memtable becomes immutable."
            );
            let old_wal_number = fields_guard.curr_wal_number;
            fields_guard.wal = Arc::new(Mutex::new(new_wal));
            fields_guard.curr_wal_number = new_wal_number;
            fields_guard
                .version_set
                .set_prev_wal_number(Some(old_wal_number));

            let retired_memtable = std::mem::replace(
                &mut fields_guard.memtable,
                Arc::new(SkipMapMemTable::new()),
            );
            fields_guard.maybe_immutable_memtable = Some(retired_memtable);
            self.context
                .has_immutable_memtable
                .store(true, Ordering::Release);
            maybe_schedule_flush(&self.context, fields_guard);

            force_rotation = false;
            // Loop around: the fresh memtable will accept the write
        }
    }

    /**
    Merge the batches of queued writers into one group commit.

    Returns the combined batch, the number of writers consumed from the front of the queue,
    and whether the combined write must be synced. A non-synchronous leader never absorbs a
    synchronous follower (that would silently upgrade the follower's durability to depend on
    the leader's weaker setting).
    */
    fn build_group_commit(fields_guard: &LockedDbFields) -> (Batch, usize, bool) {
        let leader = fields_guard.writer_queue.front().unwrap();
        let mut group_batch = leader.batch().clone();
        let mut group_size_bytes = group_batch.approximate_size();
        let requires_sync = leader.is_synchronous_write();
        let mut writers_consumed = 1;

        let max_group_size = if group_size_bytes <= GROUP_COMMIT_SMALL_WRITE_THRESHOLD_BYTES {
            group_size_bytes + SMALL_WRITE_ADDITIONAL_GROUP_COMMIT_SIZE_BYTES
        } else {
            MAX_GROUP_COMMIT_SIZE_BYTES
        };

        for follower in fields_guard.writer_queue.iter().skip(1) {
            if follower.is_synchronous_write() && !requires_sync {
                break;
            }

            let follower_size = follower.batch().approximate_size();
            if group_size_bytes + follower_size > max_group_size {
                break;
            }

            group_batch.append_batch(follower.batch());
            group_size_bytes += follower_size;
            writers_consumed += 1;
        }

        (group_batch, writers_consumed, requires_sync)
    }

    /// Rotate the memtable and wait until everything in memory has reached level 0.
    fn force_memtable_flush(&self) -> CairnDBResult<()> {
        let mut fields_guard = self.guarded_fields.lock();
        if fields_guard.memtable.is_empty() && fields_guard.maybe_immutable_memtable.is_none() {
            return Ok(());
        }

        self.make_room_for_write(&mut fields_guard, true)?;
        while fields_guard.maybe_immutable_memtable.is_some() {
            self.check_for_terminal_state(&fields_guard)?;
            maybe_schedule_flush(&self.context, &mut fields_guard);
            self.context
                .background_work_finished_signal
                .wait(&mut fields_guard);
        }

        Ok(())
    }

    /// Fail fast when the database has shut down or entered a sticky error state.
    fn check_for_terminal_state(
        &self,
        fields_guard: &MutexGuard<LockedDbFields>,
    ) -> CairnDBResult<()> {
        if self.context.is_shutting_down.load(Ordering::Acquire) {
            return Err(CairnDBError::Other(
                "The database is shutting down.".to_string(),
            ));
        }
        if let Some(bad_state) = fields_guard.maybe_bad_database_state.as_ref() {
            return Err(bad_state.clone());
        }

        Ok(())
    }

    /**
    Replay every write-ahead log at or past the manifest's log number into level-0 tables.

    Each log's contents are rebuilt in a scratch memtable and drained through the same
    guard-splitting path a background flush uses, so recovery produces the same level-0
    shape a clean shutdown would have.
    */
    fn replay_write_ahead_logs(
        options: &DbOptions,
        file_name_resolver: &FileNameResolver,
        version_set: &mut VersionSet,
        edit: &mut VersionEdit,
    ) -> CairnDBResult<()> {
        let filesystem_provider = options.filesystem_provider();
        let min_wal_number = version_set.get_curr_wal_number();
        let prev_wal_number = version_set.maybe_prev_wal_number();

        let mut wal_numbers: Vec<u64> = vec![];
        for entry in filesystem_provider.list_dir(&file_name_resolver.get_db_path())? {
            if let Ok(ParsedFileType::WriteAheadLog(number)) =
                FileNameResolver::get_file_type_from_name(&entry)
            {
                if number >= min_wal_number || Some(number) == prev_wal_number {
                    wal_numbers.push(number);
                }
            }
        }
        wal_numbers.sort_unstable();

        let mut max_sequence: u64 = 0;
        for wal_number in wal_numbers {
            log::info!("Replaying write-ahead log {wal_number}.");
            DB::replay_one_wal(
                options,
                file_name_resolver,
                version_set,
                wal_number,
                edit,
                &mut max_sequence,
            )?;
        }

        if max_sequence > version_set.get_prev_sequence_number() {
            version_set.set_prev_sequence_number(max_sequence);
        }

        Ok(())
    }

    /// Replay a single write-ahead log, draining its contents into level-0 tables.
    fn replay_one_wal(
        options: &DbOptions,
        file_name_resolver: &FileNameResolver,
        version_set: &mut VersionSet,
        wal_number: u64,
        edit: &mut VersionEdit,
        max_sequence: &mut u64,
    ) -> CairnDBResult<()> {
        let filesystem_provider = options.filesystem_provider();
        let wal_path = file_name_resolver.get_wal_file_path(wal_number);
        let mut reader = LogReader::new(filesystem_provider, &wal_path)
            .map_err(CairnDBError::Log)?;

        let replay_memtable = SkipMapMemTable::new();
        loop {
            let record = match reader.read_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(read_error) => {
                    if options.paranoid_checks {
                        return Err(CairnDBError::Corruption(format!(
                            "Corruption replaying write-ahead log {wal_path:?}: {read_error}"
                        )));
                    }
                    log::warn!(
                        "Truncating write-ahead log {wal_path:?} at a corrupt record: \
                        {read_error}"
                    );
                    break;
                }
            };

            let batch = match Batch::try_from(record.as_slice()) {
                Ok(batch) => batch,
                Err(decode_error) => {
                    if options.paranoid_checks {
                        return Err(CairnDBError::Corruption(format!(
                            "Undecodable batch in write-ahead log {wal_path:?}: {decode_error}"
                        )));
                    }
                    log::warn!(
                        "Truncating write-ahead log {wal_path:?} at an undecodable batch: \
                        {decode_error}"
                    );
                    break;
                }
            };

            let starting_sequence = match batch.get_starting_sequence_number() {
                Some(sequence) => sequence,
                None => {
                    log::warn!(
                        "A replayed batch in {wal_path:?} carried no sequence number. \
                        Skipping it."
                    );
                    continue;
                }
            };

            let mut sequence = starting_sequence;
            for element in batch.iter() {
                replay_memtable.insert(
                    InternalKey::new(
                        element.get_key().to_vec(),
                        sequence,
                        element.get_operation(),
                    ),
                    element.get_value().cloned().unwrap_or_default(),
                );
                sequence += 1;
            }
            *max_sequence = (*max_sequence).max(sequence.saturating_sub(1));
        }

        if replay_memtable.is_empty() {
            return Ok(());
        }

        // Drain through the guard-splitting flush path
        let complete_l0_guards: Vec<GuardKey> = {
            let version_node = version_set.get_current_version();
            let complete_guards = version_node.read().element.complete_guards[0].clone();
            version_set.release_version(version_node);
            complete_guards
        };
        let mut entries = replay_memtable.iter();
        let mut allocate = || version_set.get_new_file_number();
        let outcome = build_level0_tables(
            options,
            &complete_l0_guards,
            entries.as_mut(),
            &mut allocate,
        )
        .map_err(CairnDBError::Compaction)?;

        let mut promoted: BTreeSet<GuardKey> = BTreeSet::new();
        for output in &outcome.outputs {
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

        Ok(())
    }

    /// Replay one orphaned log into a single fresh table during repair.
    fn salvage_write_ahead_log(
        options: &DbOptions,
        file_name_resolver: &FileNameResolver,
        wal_number: u64,
        next_file_number: &mut u64,
        edit: &mut VersionEdit,
        max_sequence: &mut u64,
    ) -> CairnDBResult<()> {
        let filesystem_provider = options.filesystem_provider();
        let wal_path = file_name_resolver.get_wal_file_path(wal_number);
        let mut reader = LogReader::new(filesystem_provider, &wal_path)
            .map_err(CairnDBError::Log)?;

        let salvage_memtable = SkipMapMemTable::new();
        loop {
            let record = match reader.read_record() {
                Ok(Some(record)) => record,
                // Salvage everything readable and stop at the first sign of damage
                Ok(None) => break,
                Err(_) => break,
            };
            let batch = match Batch::try_from(record.as_slice()) {
                Ok(batch) => batch,
                Err(_) => break,
            };
            let starting_sequence = match batch.get_starting_sequence_number() {
                Some(sequence) => sequence,
                None => continue,
            };

            let mut sequence = starting_sequence;
            for element in batch.iter() {
                salvage_memtable.insert(
                    InternalKey::new(
                        element.get_key().to_vec(),
                        sequence,
                        element.get_operation(),
                    ),
                    element.get_value().cloned().unwrap_or_default(),
                );
                sequence += 1;
            }
            *max_sequence = (*max_sequence).max(sequence.saturating_sub(1));
        }

        if salvage_memtable.is_empty() {
            return Ok(());
        }

        let table_number = *next_file_number;
        *next_file_number += 1;
        let mut builder = TableBuilder::new(options.clone(), table_number)
            .map_err(|err| CairnDBError::Other(err.to_string()))?;
        let mut entries = salvage_memtable.iter();
        entries.seek_to_first()?;
        let mut smallest: Option<InternalKey> = None;
        let mut largest: Option<InternalKey> = None;
        loop {
            let (key, value) = match entries.current() {
                Some((key, value)) => (key.clone(), value.clone()),
                None => break,
            };
            if smallest.is_none() {
                smallest = Some(key.clone());
            }
            largest = Some(key.clone());
            builder
                .add_entry(&key, &value)
                .map_err(|err| CairnDBError::Other(err.to_string()))?;
            if entries.next().is_none() {
                break;
            }
        }
        let file_size = builder
            .finalize()
            .map_err(|err| CairnDBError::Other(err.to_string()))?;

        edit.add_file(0, table_number, file_size, smallest.unwrap()..largest.unwrap());
        log::info!(
            "Salvaged write-ahead log {wal_number} into table file {table_number} \
            ({file_size} bytes)."
        );

        Ok(())
    }

    /// Recover a surviving table's size, key range and maximum sequence number by scanning.
    fn inventory_table(
        options: &DbOptions,
        file_name_resolver: &FileNameResolver,
        table_number: u64,
    ) -> CairnDBResult<(u64, InternalKey, InternalKey, u64)> {
        let filesystem_provider = options.filesystem_provider();
        let mut table_path = file_name_resolver.get_table_file_path(table_number);
        if filesystem_provider.get_file_size(&table_path).is_err() {
            table_path = file_name_resolver.get_legacy_table_file_path(table_number);
        }
        let file_size = filesystem_provider.get_file_size(&table_path)?;

        let table_file = filesystem_provider.open_file(&table_path)?;
        let table = Arc::new(
            Table::open(options.clone(), table_number, table_file)
                .map_err(CairnDBError::TableRead)?,
        );

        let mut iterator = Table::iter_with(table, ReadOptions::default());
        iterator.seek_to_first()?;
        let mut smallest: Option<InternalKey> = None;
        let mut largest: Option<InternalKey> = None;
        let mut max_sequence: u64 = 0;
        loop {
            let key = match iterator.current() {
                Some((key, _)) => key.clone(),
                None => break,
            };
            if smallest.is_none() {
                smallest = Some(key.clone());
            }
            max_sequence = max_sequence.max(key.get_sequence_number());
            largest = Some(key);
            if iterator.next().is_none() {
                break;
            }
        }

        match (smallest, largest) {
            (Some(smallest), Some(largest)) => {
                Ok((file_size, smallest, largest, max_sequence))
            }
            _ => Err(CairnDBError::Corruption(format!(
                "Table file {table_number} holds no readable entries."
            ))),
        }
    }

    /// Copy a (small) file into the destination directory, preserving its name.
    fn copy_file_into(
        filesystem_provider: &dyn crate::fs::FileSystem,
        source: &std::path::Path,
        destination_dir: &std::path::Path,
    ) -> CairnDBResult<()> {
        let mut contents = vec![];
        filesystem_provider
            .open_file(source)?
            .read_to_end(&mut contents)?;

        let destination = destination_dir.join(source.file_name().unwrap());
        let mut destination_file = filesystem_provider.create_file(&destination, false)?;
        use std::io::Write;
        destination_file.write_all(&contents)?;
        destination_file.sync()?;

        Ok(())
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(close_error) = self.close() {
            log::error!("Error while closing the database on drop: {close_error}");
        }
    }
}

/// Record a sticky error; writes fail with it until the database is reopened.
pub(crate) fn set_bad_database_state(
    context: &DbContext,
    fields_guard: &mut MutexGuard<LockedDbFields>,
    error: CairnDBError,
) {
    log::error!("Recording a sticky database error: {error}");
    if fields_guard.maybe_bad_database_state.is_none() {
        fields_guard.maybe_bad_database_state = Some(error);
    }
    context.background_work_finished_signal.notify_all();
}

/// Hand the flush worker a task if there is flush work and none is scheduled.
pub(crate) fn maybe_schedule_flush(
    context: &DbContext,
    fields_guard: &mut MutexGuard<LockedDbFields>,
) {
    if fields_guard.background_flush_scheduled
        || fields_guard.maybe_immutable_memtable.is_none()
        || fields_guard.maybe_bad_database_state.is_some()
        || context.is_shutting_down.load(Ordering::Acquire)
    {
        return;
    }

    fields_guard.background_flush_scheduled = true;
    if context
        .flush_task_sender
        .lock()
        .send(WorkerTask::Work)
        .is_err()
    {
        log::error!("Could not reach the flush worker; its channel is closed.");
        fields_guard.background_flush_scheduled = false;
    }
}

/// Hand the compaction worker a task if there is compaction work and none is scheduled.
pub(crate) fn maybe_schedule_compaction(
    context: &DbContext,
    fields_guard: &mut MutexGuard<LockedDbFields>,
) {
    if fields_guard.background_compaction_scheduled
        || fields_guard.maybe_bad_database_state.is_some()
        || context.is_shutting_down.load(Ordering::Acquire)
    {
        return;
    }
    if !fields_guard.version_set.needs_compaction()
        && fields_guard.maybe_manual_compaction.is_none()
    {
        return;
    }

    fields_guard.background_compaction_scheduled = true;
    if context
        .compaction_task_sender
        .lock()
        .send(WorkerTask::Work)
        .is_err()
    {
        log::error!("Could not reach the compaction worker; its channel is closed.");
        fields_guard.background_compaction_scheduled = false;
    }
}


/**
Delete every file in the database directory that no live version, pending output or active
log references.

The directory scan and classification happen under the mutex; the actual deletions happen
with it released.
*/
pub(crate) fn remove_obsolete_files(
    context: &DbContext,
    fields_guard: &mut MutexGuard<LockedDbFields>,
) {
    if fields_guard.maybe_bad_database_state.is_some() {
        // After a background error the version state may not reflect reality; deleting
        // anything now could destroy data needed for recovery
        return;
    }

    let mut live_files = fields_guard.version_set.get_live_files();
    live_files.extend(fields_guard.pending_outputs.iter());
    let min_wal_number = fields_guard.version_set.get_curr_wal_number();
    let prev_wal_number = fields_guard.version_set.maybe_prev_wal_number();
    let manifest_number = fields_guard.version_set.get_manifest_file_number();

    let filesystem_provider = context.options.filesystem_provider();
    let db_path = context.file_name_resolver.get_db_path();
    let dir_entries = match filesystem_provider.list_dir(&db_path) {
        Ok(entries) => entries,
        Err(list_error) => {
            log::warn!(
                "Could not enumerate the database directory for garbage collection. Error: \
                {list_error}"
            );
            return;
        }
    };

    let mut files_to_delete: Vec<(PathBuf, Option<u64>)> = vec![];
    for entry in dir_entries {
        let keep = match FileNameResolver::get_file_type_from_name(&entry) {
            Ok(ParsedFileType::WriteAheadLog(number)) => {
                number >= min_wal_number || Some(number) == prev_wal_number
            }
            Ok(ParsedFileType::ManifestFile(number)) => number >= manifest_number,
            Ok(ParsedFileType::TableFile(number)) => live_files.contains(&number),
            Ok(ParsedFileType::TempFile(number)) => live_files.contains(&number),
            Ok(ParsedFileType::CurrentFile) | Ok(ParsedFileType::DBLockFile) => true,
            // Unrecognized files are not ours to delete
            Err(_) => true,
        };

        if !keep {
            let maybe_table_number = match FileNameResolver::get_file_type_from_name(&entry) {
                Ok(ParsedFileType::TableFile(number)) => Some(number),
                _ => None,
            };
            files_to_delete.push((entry, maybe_table_number));
        }
    }

    if files_to_delete.is_empty() {
        return;
    }

    let table_cache = Arc::clone(&context.table_cache);
    MutexGuard::<'_, LockedDbFields>::unlocked_fair(fields_guard, || {
        for (path, maybe_table_number) in files_to_delete {
            if let Some(table_number) = maybe_table_number {
                table_cache.remove(table_number);
            }
            log::debug!("Garbage collecting obsolete file {path:?}.");
            if let Err(remove_error) = filesystem_provider.remove_file(&path) {
                log::warn!(
                    "Failed to garbage collect {path:?}. Error: {remove_error}"
                );
            }
        }
    });
}
