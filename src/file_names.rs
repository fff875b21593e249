/*!
This module contains utilities for managing the file names used by the database.

All files live flat in the database directory provided via
[database options](crate::options::DbOptions):

- `CURRENT` — text file naming the active manifest
- `MANIFEST-NNNNNN` — the manifest log of version edits
- `NNNNNN.log` — write-ahead log backing the active memtable
- `NNNNNN.sst` — immutable sorted table files (the legacy `.ldb` extension is recognized when
  opening an existing database)
- `LOCK` — advisory lock preventing two processes from opening the same database
- `NNNNNN.dbtmp` — scratch files, e.g. the staging file for `CURRENT` swaps
*/

use std::path::{Path, PathBuf};

use crate::errors::{CairnDBError, CairnDBResult};

/// The name of the database lock file.
pub(crate) const LOCK_FILE_NAME: &str = "LOCK";

/// Name of the *CURRENT* file.
pub(crate) const CURRENT_FILE_NAME: &str = "CURRENT";

/// The prefix of manifest file names.
pub(crate) const MANIFEST_FILE_PREFIX: &str = "MANIFEST-";

/// Suffix for write-ahead log files.
pub(crate) const WAL_EXT: &str = "log";

/// Suffix for table files.
pub(crate) const TABLE_EXT: &str = "sst";

/// Legacy suffix for table files, recognized when opening an existing database.
pub(crate) const LEGACY_TABLE_EXT: &str = "ldb";

/// The temp file extension.
pub(crate) const TEMP_FILE_EXT: &str = "dbtmp";

/**
Enum of file types used by CairnDB.

Where appropriate, variants hold the file number parsed from the file path.
*/
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum ParsedFileType {
    /// A write-ahead log file.
    WriteAheadLog(u64),

    /// The database lock file.
    DBLockFile,

    /// A table file.
    TableFile(u64),

    /// A manifest file.
    ManifestFile(u64),

    /// The *CURRENT* pointer file.
    CurrentFile,

    /// A temporary file.
    TempFile(u64),
}

/// Resolves the paths of the files a database instance uses.
#[derive(Debug)]
pub(crate) struct FileNameResolver {
    /// The root directory of the database.
    db_path: String,
}

/// Crate-only methods
impl FileNameResolver {
    /// Create a new instance of [`FileNameResolver`].
    pub(crate) fn new(db_path: String) -> Self {
        FileNameResolver { db_path }
    }

    /// Get the path to the database directory as a [`PathBuf`].
    pub(crate) fn get_db_path(&self) -> PathBuf {
        PathBuf::from(&self.db_path)
    }

    /// Resolve the path to a write-ahead log file.
    pub(crate) fn get_wal_file_path(&self, wal_number: u64) -> PathBuf {
        let mut buf = self.get_db_path();
        buf.push(format!("{wal_number:06}"));
        buf.set_extension(WAL_EXT);

        buf
    }

    /// Resolve the path to a table file.
    pub(crate) fn get_table_file_path(&self, file_number: u64) -> PathBuf {
        let mut buf = self.get_db_path();
        buf.push(format!("{file_number:06}"));
        buf.set_extension(TABLE_EXT);

        buf
    }

    /// Resolve the path to a table file with the legacy extension.
    pub(crate) fn get_legacy_table_file_path(&self, file_number: u64) -> PathBuf {
        let mut buf = self.get_db_path();
        buf.push(format!("{file_number:06}"));
        buf.set_extension(LEGACY_TABLE_EXT);

        buf
    }

    /// Resolve the path to a manifest file.
    pub(crate) fn get_manifest_file_path(&self, manifest_number: u64) -> PathBuf {
        let mut buf = self.get_db_path();
        buf.push(format!("{MANIFEST_FILE_PREFIX}{manifest_number:06}"));

        buf
    }

    /// Resolve the path to the `CURRENT` file.
    pub(crate) fn get_current_file_path(&self) -> PathBuf {
        let mut buf = self.get_db_path();
        buf.push(CURRENT_FILE_NAME);

        buf
    }

    /// Resolve the path to a temp file.
    pub(crate) fn get_temp_file_path(&self, file_number: u64) -> PathBuf {
        let mut buf = self.get_db_path();
        buf.push(format!("{file_number:06}"));
        buf.set_extension(TEMP_FILE_EXT);

        buf
    }

    /// Resolve the path to the `LOCK` file.
    pub(crate) fn get_lock_file_path(&self) -> PathBuf {
        let mut buf = self.get_db_path();
        buf.push(LOCK_FILE_NAME);

        buf
    }

    /// Resolve the path of the sibling backup directory with the provided name.
    pub(crate) fn get_backup_dir_path(&self, backup_name: &str) -> PathBuf {
        let mut buf = self.get_db_path();
        buf.set_file_name(format!("backup-{backup_name}"));

        buf
    }

    /// Attempt to determine the file type and file number (if any) from the provided path.
    pub(crate) fn get_file_type_from_name(file_path: &Path) -> CairnDBResult<ParsedFileType> {
        let unrecognized_error = || {
            CairnDBError::PathResolution(format!(
                "The provided file path is not a recognized CairnDB file type. Provided path: \
                {file_path:?}."
            ))
        };

        let file_name = file_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(unrecognized_error)?;

        if file_name == CURRENT_FILE_NAME {
            return Ok(ParsedFileType::CurrentFile);
        }

        if file_name == LOCK_FILE_NAME {
            return Ok(ParsedFileType::DBLockFile);
        }

        if let Some(manifest_number) = file_name.strip_prefix(MANIFEST_FILE_PREFIX) {
            let file_number = manifest_number
                .parse::<u64>()
                .map_err(|_| unrecognized_error())?;
            return Ok(ParsedFileType::ManifestFile(file_number));
        }

        if let Some(file_extension) = file_path.extension().and_then(|ext| ext.to_str()) {
            let file_stem = file_path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .ok_or_else(unrecognized_error)?;
            let file_number = file_stem
                .parse::<u64>()
                .map_err(|_| unrecognized_error())?;

            return match file_extension {
                WAL_EXT => Ok(ParsedFileType::WriteAheadLog(file_number)),
                TABLE_EXT | LEGACY_TABLE_EXT => Ok(ParsedFileType::TableFile(file_number)),
                TEMP_FILE_EXT => Ok(ParsedFileType::TempFile(file_number)),
                _ => Err(unrecognized_error()),
            };
        }

        Err(unrecognized_error())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn resolves_paths_within_the_database_directory() {
        let resolver = FileNameResolver::new("/cairns/stack".to_string());
        let db_path = resolver.get_db_path();

        let wal_path = resolver.get_wal_file_path(43);
        assert!(wal_path.starts_with(&db_path));
        assert_eq!(wal_path.file_name().unwrap(), "000043.log");

        let table_path = resolver.get_table_file_path(7);
        assert_eq!(table_path.file_name().unwrap(), "000007.sst");

        let legacy_path = resolver.get_legacy_table_file_path(7);
        assert_eq!(legacy_path.file_name().unwrap(), "000007.ldb");

        let manifest_path = resolver.get_manifest_file_path(12);
        assert_eq!(manifest_path.file_name().unwrap(), "MANIFEST-000012");

        assert_eq!(
            resolver.get_current_file_path().file_name().unwrap(),
            "CURRENT"
        );
        assert_eq!(resolver.get_lock_file_path().file_name().unwrap(), "LOCK");
        assert_eq!(
            resolver.get_temp_file_path(9).file_name().unwrap(),
            "000009.dbtmp"
        );
    }

    #[test]
    fn backup_directories_are_siblings_of_the_database_directory() {
        let resolver = FileNameResolver::new("/cairns/stack".to_string());

        let backup_path = resolver.get_backup_dir_path("nightly");
        assert_eq!(backup_path, PathBuf::from("/cairns/backup-nightly"));
    }

    #[test]
    fn parses_valid_file_names() {
        let valid_paths = vec![
            ("000100.log", ParsedFileType::WriteAheadLog(100)),
            ("000000.log", ParsedFileType::WriteAheadLog(0)),
            ("LOCK", ParsedFileType::DBLockFile),
            ("000043.sst", ParsedFileType::TableFile(43)),
            ("000043.ldb", ParsedFileType::TableFile(43)),
            (
                "1238097123981723.sst",
                ParsedFileType::TableFile(1238097123981723),
            ),
            ("MANIFEST-001337", ParsedFileType::ManifestFile(1337)),
            ("CURRENT", ParsedFileType::CurrentFile),
            ("000009.dbtmp", ParsedFileType::TempFile(9)),
        ];

        for (path, expected) in valid_paths {
            let file_type =
                FileNameResolver::get_file_type_from_name(&PathBuf::from(path)).unwrap();
            assert_eq!(file_type, expected, "{path} should be parsed correctly.");
        }
    }

    #[test]
    fn rejects_unrecognized_file_names() {
        let invalid_paths = vec![
            "",
            "foo",
            "foo.log",
            "123-wal-123.log",
            "18446744073709551616.log",
            ".log",
            "1231x.log",
            "manifest",
            "MANIFEST-",
            "MANIFEST-3x",
            "XMANIFEST-3",
            "LOC",
            "LOCKx",
            "CURR",
            "CURRENTx",
            "100",
            "100.",
            "100.ss",
        ];

        for path in invalid_paths {
            let file_type_result =
                FileNameResolver::get_file_type_from_name(&PathBuf::from(path));
            assert!(
                file_type_result.is_err(),
                "{path} should not parse as a database file."
            );
        }
    }
}
