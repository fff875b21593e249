/*!
The version set owns the list of versions, the file number allocator, and the manifest log.

All mutation of the persistent level structure funnels through
[`VersionSet::log_and_apply`]: an edit is serialized to the manifest (creating or rolling the
manifest file over as needed, with the `CURRENT` pointer swapped atomically), and only after
the record is durable is the new version installed in memory.
*/

use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::config::MAX_NUM_LEVELS;
use crate::db::{DbContext, LockedDbFields};
use crate::file_names::{FileNameResolver, ParsedFileType};
use crate::fs::FileSystem;
use crate::logs::{LogReader, LogWriter};
use crate::options::DbOptions;
use crate::table_cache::TableCache;
use crate::utils::linked_list::{LinkedList, SharedNode};

use super::errors::{
    CurrentFileReadErrorKind, ManifestWriteErrorKind, RecoverError, RecoverResult, WriteError,
    WriteResult,
};
use super::version::Version;
use super::version_builder::VersionBuilder;
use super::version_edit::VersionEdit;

/// Manages the versions of the database.
pub(crate) struct VersionSet {
    /// Database options to refer to when reading and writing database state.
    options: DbOptions,

    /// A reference to the file system provider in use by the database.
    filesystem_provider: Arc<dyn FileSystem>,

    /// Resolver for the file names used by the database.
    file_name_resolver: Arc<FileNameResolver>,

    /// A cache for accessing table files. Shared with the versions.
    table_cache: Arc<TableCache>,

    /**
    The most recently allocated file number.

    File numbers are shared across write-ahead logs, table files and manifests so that a
    single counter orders every file the database ever creates.
    */
    curr_file_number: u64,

    /// The file number of the manifest currently being appended to.
    manifest_file_number: u64,

    /// The most recently used sequence number.
    prev_sequence_number: u64,

    /// The file number of the currently active write-ahead log.
    curr_wal_number: u64,

    /**
    The file number of the write-ahead log backing the immutable memtable.

    Only populated while a memtable flush is outstanding.
    */
    prev_wal_number: Option<u64>,

    /// The versions in the set, with the current version at the tail.
    versions: LinkedList<Version>,

    /// The most up to date version.
    current_version: SharedNode<Version>,

    /// The manifest log writer, once one has been opened.
    maybe_manifest_file: Option<Arc<Mutex<LogWriter>>>,
}

/// Crate-only methods
impl VersionSet {
    /// Create a new instance of [`VersionSet`].
    pub(crate) fn new(options: DbOptions, table_cache: Arc<TableCache>) -> Self {
        let filesystem_provider = options.filesystem_provider();
        let file_name_resolver = Arc::new(options.file_name_resolver());

        let mut versions = LinkedList::<Version>::new();
        let base_version = Version::new(options.clone(), &table_cache, 0, 0);
        let current_version = versions.push(base_version);

        Self {
            options,
            filesystem_provider,
            file_name_resolver,
            table_cache,
            curr_file_number: 1,
            // Updated by `VersionSet::recover` or at initial database creation
            manifest_file_number: 0,
            prev_sequence_number: 0,
            curr_wal_number: 0,
            prev_wal_number: None,
            versions,
            current_version,
            maybe_manifest_file: None,
        }
    }

    /// Allocate and return a new file number.
    pub(crate) fn get_new_file_number(&mut self) -> u64 {
        self.curr_file_number += 1;
        self.curr_file_number
    }

    /// Mark the specified file number as used.
    pub(crate) fn mark_file_number_used(&mut self, file_number: u64) {
        if self.curr_file_number < file_number {
            self.curr_file_number = file_number;
        }
    }

    /**
    Reuse a file number.

    This reverses an allocation after a failure to create the file, which keeps the file
    number space from being exhausted by retries.

    **NOTE** The number being reused must have come from
    [`VersionSet::get_new_file_number`].
    */
    pub(crate) fn reuse_file_number(&mut self, file_number: u64) {
        if self.curr_file_number == file_number {
            self.curr_file_number -= 1;
        }
    }

    /// The number of table files at the specified level in the current version.
    pub(crate) fn num_files_at_level(&self, level: usize) -> usize {
        self.current_version.read().element.num_files_at_level(level)
    }

    /// The file number of the manifest currently in use.
    pub(crate) fn get_manifest_file_number(&self) -> u64 {
        self.manifest_file_number
    }

    /// The most recently used sequence number.
    pub(crate) fn get_prev_sequence_number(&self) -> u64 {
        self.prev_sequence_number
    }

    /// Set the most recently used sequence number.
    pub(crate) fn set_prev_sequence_number(&mut self, sequence_number: u64) {
        self.prev_sequence_number = sequence_number;
    }

    /// The file number of the currently active write-ahead log.
    pub(crate) fn get_curr_wal_number(&self) -> u64 {
        self.curr_wal_number
    }

    /// The write-ahead log number backing the immutable memtable, if one is outstanding.
    pub(crate) fn maybe_prev_wal_number(&self) -> Option<u64> {
        self.prev_wal_number
    }

    /// Set the write-ahead log number backing the immutable memtable.
    pub(crate) fn set_prev_wal_number(&mut self, prev_wal_number: Option<u64>) {
        self.prev_wal_number = prev_wal_number;
    }

    /// Get an owned reference to the table cache.
    pub(crate) fn get_table_cache(&self) -> Arc<TableCache> {
        Arc::clone(&self.table_cache)
    }

    /// Get a handle to the current version.
    pub(crate) fn get_current_version(&self) -> SharedNode<Version> {
        Arc::clone(&self.current_version)
    }

    /**
    Borrow the current version's node without taking a reference count.

    Use this for short inspections made entirely under the database mutex; handles that
    outlive the mutex must go through [`VersionSet::get_current_version`] and be returned
    with [`VersionSet::release_version`].
    */
    pub(crate) fn current_version(&self) -> &SharedNode<Version> {
        &self.current_version
    }

    /// Returns true if the current version's compaction score calls for a compaction.
    pub(crate) fn needs_compaction(&self) -> bool {
        self.current_version.read().element.requires_size_compaction()
    }

    /**
    Release a version handle, unlinking the version from the set when this was the last
    outside reference.

    **This method must be used to drop version handles so that versions also leave the
    version list.**
    */
    pub(crate) fn release_version(&mut self, version_node: SharedNode<Version>) {
        if Arc::strong_count(&version_node) == 2 {
            // One external reference plus the list's reference: unlink it
            log::debug!(
                "Unlinking version installed at sequence number {seq} with WAL file number \
                {wal}.",
                seq = version_node.read().element.last_sequence_number(),
                wal = version_node.read().element.wal_file_number()
            );

            self.versions.remove_node(version_node);
        } else {
            drop(version_node);
        }
    }

    /// The set of file numbers for table files referenced by any live version.
    pub(crate) fn get_live_files(&self) -> HashSet<u64> {
        let mut live_files: HashSet<u64> = HashSet::new();
        for version in self.versions.iter() {
            for level in 0..MAX_NUM_LEVELS {
                for file in version.read().element.files_at_level(level) {
                    live_files.insert(file.file_number());
                }
            }
        }

        live_files
    }

    /**
    Load the version state persisted in the manifest named by the `CURRENT` file.

    Returns true if the existing manifest file was reused for further appends.
    */
    pub(crate) fn recover(&mut self) -> RecoverResult<bool> {
        let current_file_path = self.file_name_resolver.get_current_file_path();
        let mut current_file =
            self.filesystem_provider
                .open_file(&current_file_path)
                .map_err(|err| {
                    RecoverError::CurrentFileRead(CurrentFileReadErrorKind::IO(err.into()))
                })?;
        let mut current_file_contents = String::new();
        current_file
            .read_to_string(&mut current_file_contents)
            .map_err(|err| {
                RecoverError::CurrentFileRead(CurrentFileReadErrorKind::Parse(err.to_string()))
            })?;

        if current_file_contents.is_empty() || !current_file_contents.ends_with('\n') {
            let error_msg = format!(
                "The CURRENT file ({file_size} bytes) was either empty or did not end with a \
                newline.",
                file_size = current_file_contents.len()
            );
            log::error!("{}", &error_msg);
            return Err(RecoverError::CurrentFileRead(
                CurrentFileReadErrorKind::Parse(error_msg),
            ));
        }

        current_file_contents.truncate(current_file_contents.len() - 1);
        let manifest_file_number = match FileNameResolver::get_file_type_from_name(Path::new(
            &current_file_contents,
        )) {
            Ok(ParsedFileType::ManifestFile(number)) => number,
            _ => {
                let error_msg = format!(
                    "The CURRENT file does not name a manifest file. Contents: \
                    {current_file_contents:?}."
                );
                log::error!("{}", &error_msg);
                return Err(RecoverError::CurrentFileRead(
                    CurrentFileReadErrorKind::Parse(error_msg),
                ));
            }
        };

        let manifest_file_path = self
            .file_name_resolver
            .get_manifest_file_path(manifest_file_number);
        let mut manifest_reader =
            LogReader::new(Arc::clone(&self.filesystem_provider), &manifest_file_path)
                .map_err(RecoverError::ManifestRead)?;

        // Aggregate state from the manifest records
        let mut maybe_next_file_number: Option<u64> = None;
        let mut maybe_last_sequence: Option<u64> = None;
        let mut maybe_wal_number: Option<u64> = None;
        let mut maybe_prev_wal_number: Option<u64> = None;
        let mut version_builder = VersionBuilder::new(self.get_current_version());
        let mut records_read: usize = 0;

        loop {
            let record = match manifest_reader.read_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(read_err) => {
                    log::error!(
                        "Error reading the manifest after {records_read} records. Error: \
                        {read_err}"
                    );
                    return Err(RecoverError::ManifestRead(read_err));
                }
            };
            records_read += 1;

            let edit = VersionEdit::try_from(record.as_slice())?;
            version_builder.accumulate_changes(&edit);

            if edit.wal_file_number.is_some() {
                maybe_wal_number = edit.wal_file_number;
            }
            if edit.prev_wal_file_number.is_some() {
                maybe_prev_wal_number = edit.prev_wal_file_number;
            }
            if edit.next_file_number.is_some() {
                maybe_next_file_number = edit.next_file_number;
            }
            if edit.last_sequence_number.is_some() {
                maybe_last_sequence = edit.last_sequence_number;
            }
        }

        let next_file_number = maybe_next_file_number.ok_or_else(|| {
            RecoverError::ManifestParse(
                "No manifest record carried the file number counter.".to_string(),
            )
        })?;
        let last_sequence = maybe_last_sequence.ok_or_else(|| {
            RecoverError::ManifestParse(
                "No manifest record carried the last sequence number.".to_string(),
            )
        })?;
        let wal_number = maybe_wal_number.ok_or_else(|| {
            RecoverError::ManifestParse(
                "No manifest record carried the write-ahead log number.".to_string(),
            )
        })?;

        let mut recovered_version = version_builder.apply_changes(wal_number, last_sequence);
        recovered_version.finalize();
        // The builder still holds a handle to the base version; give it up before the
        // install so the base can be unlinked
        drop(version_builder);
        self.append_new_version(recovered_version);

        self.curr_file_number = next_file_number;
        self.mark_file_number_used(wal_number);
        if let Some(prev_wal) = maybe_prev_wal_number {
            self.mark_file_number_used(prev_wal);
        }
        self.prev_sequence_number = last_sequence;
        self.curr_wal_number = wal_number;
        self.prev_wal_number = maybe_prev_wal_number.filter(|&number| number != 0);
        self.manifest_file_number = self.get_new_file_number();

        log::info!(
            "Recovered version state from {records_read} manifest records. Last sequence \
            {last_sequence}, WAL {wal_number}, next file number {next}.",
            next = self.curr_file_number
        );

        // Drop the reader (and its file handle) before trying to reuse the manifest
        drop(manifest_reader);
        if self.maybe_reuse_manifest(&manifest_file_path, manifest_file_number) {
            return Ok(true);
        }

        Ok(false)
    }

    /**
    Persist an edit to the manifest and install the resulting version as current.

    Only one `log_and_apply` may be in flight at a time; callers already inside the database
    mutex queue on the manifest-log condition. The database mutex is released around the disk
    writes.

    # Panics

    Panics if the edit carries a WAL file number below the current one. File numbers may be
    reused but never regress.
    */
    pub(crate) fn log_and_apply(
        context: &DbContext,
        fields_guard: &mut MutexGuard<LockedDbFields>,
        edit: &mut VersionEdit,
    ) -> WriteResult<()> {
        // Serialize manifest writers
        while fields_guard.manifest_log_occupied {
            context.manifest_log_signal.wait(fields_guard);
        }
        fields_guard.manifest_log_occupied = true;

        let result = VersionSet::log_and_apply_exclusive(context, fields_guard, edit);

        fields_guard.manifest_log_occupied = false;
        context.manifest_log_signal.notify_all();

        result
    }

    /// A human-readable summary of the files and guards at each level.
    pub(crate) fn level_summary(&self) -> String {
        self.current_version.read().element.level_summary()
    }

    /**
    Write the `CURRENT` file naming the specified manifest.

    The contents are staged in a temp file first and atomically renamed into place.
    */
    pub(crate) fn set_current_file(
        filesystem_provider: Arc<dyn FileSystem>,
        file_name_resolver: &FileNameResolver,
        manifest_file_number: u64,
    ) -> std::io::Result<()> {
        let manifest_file_name = file_name_resolver
            .get_manifest_file_path(manifest_file_number)
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();

        let temp_file_path = file_name_resolver.get_temp_file_path(manifest_file_number);
        let mut temp_file = filesystem_provider.create_file(&temp_file_path, false)?;
        temp_file.write_all(format!("{manifest_file_name}\n").as_bytes())?;
        temp_file.sync()?;
        drop(temp_file);

        filesystem_provider.rename(&temp_file_path, &file_name_resolver.get_current_file_path())
    }
}

/// Private methods
impl VersionSet {
    /// Add a new version to the set and make it current.
    fn append_new_version(&mut self, new_version: Version) {
        let old_version = self.get_current_version();
        self.current_version = self.versions.push(new_version);

        self.release_version(old_version);
    }

    /// The body of [`VersionSet::log_and_apply`], run while holding the manifest-log token.
    fn log_and_apply_exclusive(
        context: &DbContext,
        fields_guard: &mut MutexGuard<LockedDbFields>,
        edit: &mut VersionEdit,
    ) -> WriteResult<()> {
        let (new_version, created_new_manifest_file) = {
            let version_set = &mut fields_guard.version_set;

            if let Some(wal_file_number) = edit.wal_file_number {
                assert!(
                    wal_file_number >= version_set.curr_wal_number,
                    "The WAL file number in an edit must not regress."
                );
                assert!(wal_file_number <= version_set.curr_file_number);
            } else {
                // Not set when the edit does not rotate the log, e.g. pure compactions
                edit.wal_file_number = Some(version_set.curr_wal_number);
            }

            if edit.prev_wal_file_number.is_none() {
                edit.prev_wal_file_number = version_set.prev_wal_number;
            }

            /*
            Opening or rolling the manifest allocates a file number, so the counter is only
            recorded into the edit afterwards. Recording it earlier would let a recovered
            database re-allocate the live manifest's own number.
            */
            let created_new_manifest_file = version_set.ensure_manifest_available()?;
            edit.next_file_number = Some(version_set.curr_file_number);
            edit.last_sequence_number = Some(version_set.prev_sequence_number);

            let mut version_builder = VersionBuilder::new(version_set.get_current_version());
            version_builder.accumulate_changes(edit);
            let mut new_version = version_builder
                .apply_changes(edit.wal_file_number.unwrap(), version_set.prev_sequence_number);
            new_version.finalize();
            // The builder still holds a handle to the base version; give it up before the
            // install so the base can be unlinked
            drop(version_builder);

            (new_version, created_new_manifest_file)
        };

        let manifest_write_result =
            VersionSet::persist_edit(fields_guard, edit, created_new_manifest_file);

        let version_set = &mut fields_guard.version_set;
        match manifest_write_result {
            Ok(()) => {
                log::debug!(
                    "Installing version with WAL file number {wal:?} and sequence number \
                    {seq} as the current version.",
                    wal = edit.wal_file_number,
                    seq = version_set.prev_sequence_number
                );

                version_set.append_new_version(new_version);
                version_set.curr_wal_number = edit.wal_file_number.unwrap();
                version_set.prev_wal_number =
                    edit.prev_wal_file_number.filter(|&number| number != 0);

                Ok(())
            }
            Err(error) => {
                log::error!(
                    "Failed to write the version edit to the manifest. Cleaning up side \
                    effects. Original error: {error}."
                );

                if created_new_manifest_file {
                    let manifest_path = version_set
                        .file_name_resolver
                        .get_manifest_file_path(version_set.manifest_file_number);
                    version_set.maybe_manifest_file = None;
                    if let Err(remove_file_error) =
                        version_set.filesystem_provider.remove_file(&manifest_path)
                    {
                        log::error!(
                            "Failed to clean up the newly created manifest file after a write \
                            error. Error: {remove_file_error}."
                        );
                        return Err(WriteError::ManifestWrite(
                            ManifestWriteErrorKind::ManifestErrorCleanup(
                                remove_file_error.into(),
                            ),
                        ));
                    }
                }

                Err(error)
            }
        }
    }

    /**
    Make sure a manifest file is open and small enough to keep appending to.

    Opens a fresh manifest seeded with a snapshot of the current state when none is open or
    the open one has grown past the file size target. Returns true if a new manifest file was
    created (the caller must then swap `CURRENT` after the first successful append).
    */
    fn ensure_manifest_available(&mut self) -> WriteResult<bool> {
        if self.manifest_file_number == 0 {
            // Fresh database: the first manifest gets its own file number
            self.manifest_file_number = self.get_new_file_number();
        }

        if self.maybe_manifest_file.is_some() {
            let manifest_path = self
                .file_name_resolver
                .get_manifest_file_path(self.manifest_file_number);
            let manifest_size = self
                .filesystem_provider
                .get_file_size(&manifest_path)
                .unwrap_or(0);
            if (manifest_size as usize) < self.options.max_file_size {
                return Ok(false);
            }

            log::info!(
                "The manifest at {manifest_path:?} has grown to {manifest_size} bytes. \
                Rolling over to a new manifest file."
            );
            self.maybe_manifest_file = None;
            self.manifest_file_number = self.get_new_file_number();
        }

        let manifest_path = self
            .file_name_resolver
            .get_manifest_file_path(self.manifest_file_number);
        log::info!(
            "Creating a new manifest file at {manifest_path:?} seeded with a snapshot of the \
            current version state."
        );
        let mut manifest_file = LogWriter::new(
            Arc::clone(&self.filesystem_provider),
            manifest_path,
            false,
        )?;
        self.write_snapshot(&mut manifest_file)?;
        self.maybe_manifest_file = Some(Arc::new(Mutex::new(manifest_file)));

        Ok(true)
    }

    /// Serialize the full current state as a single edit record into the manifest.
    fn write_snapshot(&mut self, manifest_file: &mut LogWriter) -> WriteResult<()> {
        let mut snapshot_edit = VersionEdit {
            wal_file_number: Some(self.curr_wal_number),
            prev_wal_file_number: self.prev_wal_number,
            next_file_number: Some(self.curr_file_number),
            last_sequence_number: Some(self.prev_sequence_number),
            ..VersionEdit::default()
        };

        {
            let current_version_guard = self.current_version.read();
            let current_version = &current_version_guard.element;
            for level in 0..MAX_NUM_LEVELS {
                for file in current_version.files_at_level(level) {
                    snapshot_edit.add_file(
                        level,
                        file.file_number(),
                        file.get_file_size(),
                        file.smallest_key().clone()..file.largest_key().clone(),
                    );
                }

                for guard in &current_version.guards[level] {
                    snapshot_edit.add_guard(level, guard.get_key().clone());
                }

                for guard_key in &current_version.complete_guards[level] {
                    snapshot_edit.add_complete_guard(level, guard_key.clone());
                }
            }
        }

        let serialized: Vec<u8> = Vec::from(&snapshot_edit);
        manifest_file.append(&serialized)?;
        manifest_file.sync()?;

        Ok(())
    }

    /// Append the edit record to the manifest with the database mutex released.
    fn persist_edit(
        fields_guard: &mut MutexGuard<LockedDbFields>,
        edit: &VersionEdit,
        is_new_manifest_file: bool,
    ) -> WriteResult<()> {
        let version_set = &fields_guard.version_set;
        let filesystem_provider = Arc::clone(&version_set.filesystem_provider);
        let file_name_resolver = Arc::clone(&version_set.file_name_resolver);
        let manifest_file_number = version_set.manifest_file_number;
        let manifest_file = Arc::clone(version_set.maybe_manifest_file.as_ref().unwrap());
        let serialized: Vec<u8> = Vec::from(edit);

        MutexGuard::<'_, LockedDbFields>::unlocked_fair(fields_guard, || -> WriteResult<()> {
            // The disk writes happen without the database mutex so reads and writer queueing
            // make progress; the manifest-log condition keeps this section exclusive
            let mut manifest_guard = manifest_file.lock();
            manifest_guard.append(&serialized)?;
            manifest_guard.sync()?;

            if is_new_manifest_file {
                log::info!(
                    "Installing manifest file {manifest_file_number} as CURRENT."
                );
                if let Err(error) = VersionSet::set_current_file(
                    filesystem_provider,
                    file_name_resolver.as_ref(),
                    manifest_file_number,
                ) {
                    return Err(WriteError::ManifestWrite(
                        ManifestWriteErrorKind::SwapCurrentFile(error.into()),
                    ));
                }
            }

            Ok(())
        })
    }

    /**
    If possible, reuse the existing manifest file for further appends. Returns true on reuse.

    # Panics

    This method must not be called while a manifest file is already open.
    */
    fn maybe_reuse_manifest(
        &mut self,
        manifest_path: &Path,
        manifest_file_number: u64,
    ) -> bool {
        assert!(self.maybe_manifest_file.is_none());

        match self.filesystem_provider.get_file_size(manifest_path) {
            Ok(file_size) if (file_size as usize) < self.options.max_file_size => {}
            _ => return false,
        }

        log::info!("Attempting to reuse the existing manifest file at {manifest_path:?}.");
        match LogWriter::new(Arc::clone(&self.filesystem_provider), manifest_path, true) {
            Ok(manifest_writer) => {
                self.maybe_manifest_file = Some(Arc::new(Mutex::new(manifest_writer)));
                self.manifest_file_number = manifest_file_number;

                true
            }
            Err(manifest_err) => {
                log::error!(
                    "Could not reuse the existing manifest file; a new manifest will be \
                    created. Error: {err}",
                    err = manifest_err
                );
                false
            }
        }
    }
}
