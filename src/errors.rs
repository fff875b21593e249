/*!
This module contains error types specific to CairnDB as well as wrappers and `From` implementations
for common errors to enable error propagation.
*/

use std::fmt;
use std::io;
use std::num::TryFromIntError;

use crate::compaction::CompactionWorkerError;
use crate::tables::errors::TableReadError;
use crate::versioning;

/// Alias for a [`Result`] that wraps [`CairnDBError`].
pub type CairnDBResult<T> = Result<T, CairnDBError>;

/// Top-level database errors.
#[derive(Clone, Debug, PartialEq)]
pub enum CairnDBError {
    /**
    Variant returned by point reads when the requested key does not exist.

    This is the only benign error kind. It is never sticky and never indicates an unhealthy
    database.
    */
    KeyNotFound,

    /// Variant for malformed requests e.g. opening a database that does not exist.
    InvalidArgument(String),

    /// Variant for requests the engine recognizes but does not serve.
    NotSupported(String),

    /// Variant for on-disk state that failed an integrity check.
    Corruption(String),

    /// Variant for errors stemming from top-level I/O operations.
    IO(DBIOError),

    /// Variant for errors stemming from operations on the write-ahead log or manifest log.
    Log(LogIOError),

    /// Variant for errors stemming from reading table files.
    TableRead(TableReadError),

    /// Variant for errors encountered while servicing a write request.
    Write(String),

    /// Variant for errors encountered while reading from a version.
    VersionRead(versioning::errors::ReadError),

    /// Variant for errors encountered while persisting version changes.
    VersionWrite(versioning::errors::WriteError),

    /// Variant for errors surfaced by the background workers.
    Compaction(CompactionWorkerError),

    /// Variant for errors recovering database state from disk.
    Recovery(versioning::errors::RecoverError),

    /// Variant for file path resolution failures.
    PathResolution(String),

    /// Variant used for one-off situations. This should be used sparingly.
    Other(String),
}

impl std::error::Error for CairnDBError {}

impl fmt::Display for CairnDBError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CairnDBError::KeyNotFound => write!(f, "The key was not found."),
            CairnDBError::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            CairnDBError::NotSupported(msg) => write!(f, "Not supported: {msg}"),
            CairnDBError::Corruption(msg) => write!(f, "Corruption: {msg}"),
            CairnDBError::IO(base_err) => write!(f, "{base_err}"),
            CairnDBError::Log(base_err) => write!(f, "{base_err}"),
            CairnDBError::TableRead(base_err) => write!(f, "{base_err}"),
            CairnDBError::Write(base_err) => write!(f, "{base_err}"),
            CairnDBError::VersionRead(base_err) => write!(f, "{base_err}"),
            CairnDBError::VersionWrite(base_err) => write!(f, "{base_err}"),
            CairnDBError::Compaction(base_err) => write!(f, "{base_err}"),
            CairnDBError::Recovery(base_err) => write!(f, "{base_err}"),
            CairnDBError::PathResolution(msg) => write!(f, "{msg}"),
            CairnDBError::Other(base_err) => write!(f, "{base_err}"),
        }
    }
}

impl From<io::Error> for CairnDBError {
    fn from(err: io::Error) -> Self {
        CairnDBError::IO(err.into())
    }
}

impl From<DBIOError> for CairnDBError {
    fn from(err: DBIOError) -> Self {
        CairnDBError::IO(err)
    }
}

impl From<LogIOError> for CairnDBError {
    fn from(err: LogIOError) -> Self {
        CairnDBError::Log(err)
    }
}

impl From<TableReadError> for CairnDBError {
    fn from(err: TableReadError) -> Self {
        CairnDBError::TableRead(err)
    }
}

impl From<versioning::errors::ReadError> for CairnDBError {
    fn from(err: versioning::errors::ReadError) -> Self {
        CairnDBError::VersionRead(err)
    }
}

impl From<versioning::errors::WriteError> for CairnDBError {
    fn from(err: versioning::errors::WriteError) -> Self {
        CairnDBError::VersionWrite(err)
    }
}

impl From<versioning::errors::RecoverError> for CairnDBError {
    fn from(err: versioning::errors::RecoverError) -> Self {
        CairnDBError::Recovery(err)
    }
}

impl From<CompactionWorkerError> for CairnDBError {
    fn from(err: CompactionWorkerError) -> Self {
        CairnDBError::Compaction(err)
    }
}

/**
A cloneable wrapper around [`io::Error`].

Writer threads propagate the result of a group commit to every member of the group, so errors
must be cloneable. [`io::Error`] is not, hence this projection of its kind and message.
*/
#[derive(Clone, Debug, PartialEq)]
pub struct DBIOError {
    /// The kind of the original I/O error.
    kind: io::ErrorKind,

    /// The message of the original I/O error.
    message: String,
}

/// Public methods
impl DBIOError {
    /// Create a new instance of [`DBIOError`].
    pub fn new(kind: io::ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    /// The kind of the underlying I/O error.
    pub fn kind(&self) -> io::ErrorKind {
        self.kind
    }
}

impl std::error::Error for DBIOError {}

impl fmt::Display for DBIOError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{kind}: {msg}", kind = self.kind, msg = self.message)
    }
}

impl From<io::Error> for DBIOError {
    fn from(err: io::Error) -> Self {
        DBIOError::new(err.kind(), err.to_string())
    }
}

/// Errors related to reading and writing block-framed log files (WAL and manifest).
#[derive(Clone, Debug, PartialEq)]
pub enum LogIOError {
    /// Variant for errors that are related to I/O.
    IO(DBIOError),

    /// Variant for malformed data found in a log file.
    Corruption(LogCorruptionErrorMetadata),

    /**
    Variant for parsing issues that arise specifically from deserializing data read from the
    file system.
    */
    Serialization(LogSerializationErrorKind),
}

impl std::error::Error for LogIOError {}

impl fmt::Display for LogIOError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogIOError::IO(base_err) => write!(f, "{base_err}"),
            LogIOError::Corruption(metadata) => write!(
                f,
                "Corruption in log file: {reason} ({num_bytes} bytes dropped)",
                reason = metadata.reason,
                num_bytes = metadata.bytes_corrupted
            ),
            LogIOError::Serialization(kind) => write!(f, "{kind:?}"),
        }
    }
}

impl From<io::Error> for LogIOError {
    fn from(err: io::Error) -> Self {
        LogIOError::IO(err.into())
    }
}

impl From<TryFromIntError> for LogIOError {
    fn from(err: TryFromIntError) -> Self {
        LogIOError::Serialization(LogSerializationErrorKind::FromInt(err))
    }
}

/// Metadata describing corruption detected in a log file.
#[derive(Clone, Debug, PartialEq)]
pub struct LogCorruptionErrorMetadata {
    /// The number of bytes that could not be recovered.
    pub(crate) bytes_corrupted: u64,

    /// A human-readable description of the detected problem.
    pub(crate) reason: String,
}

/**
Different kinds of errors that can arise from serialization and deserialization activities on
log files.
*/
#[derive(Clone, Debug, PartialEq)]
pub enum LogSerializationErrorKind {
    /// Variant for integer narrowing failures while framing records.
    FromInt(TryFromIntError),

    /// Variant for other serialization failures.
    Other(String),
}
