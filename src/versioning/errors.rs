/*!
This module contains error types specific to version operations as well as wrappers and `From`
implementations for common errors to enable error propagation.
*/

use std::fmt;

use crate::errors::{DBIOError, LogIOError};
use crate::tables::errors::TableReadError;

/// Alias for a [`Result`] that wraps [`ReadError`].
pub type ReadResult<T> = Result<T, ReadError>;

/// Alias for a [`Result`] that wraps [`WriteError`].
pub type WriteResult<T> = Result<T, WriteError>;

/// Alias for a [`Result`] that wraps [`RecoverError`].
pub type RecoverResult<T> = Result<T, RecoverError>;

/// Errors that can result from reading through a version.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadError {
    /// Variant for errors reading a table file referenced by the version.
    TableRead(TableReadError),
}

impl std::error::Error for ReadError {}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::TableRead(base_err) => write!(f, "{base_err}"),
        }
    }
}

impl From<TableReadError> for ReadError {
    fn from(err: TableReadError) -> Self {
        ReadError::TableRead(err)
    }
}

/// Errors that can result from persisting version changes.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteError {
    /// Variant for errors writing to the manifest.
    ManifestWrite(ManifestWriteErrorKind),
}

impl std::error::Error for WriteError {}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::ManifestWrite(base_err) => write!(f, "{base_err:?}"),
        }
    }
}

/// Different errors that can occur when writing to a manifest file.
#[derive(Clone, Debug, PartialEq)]
pub enum ManifestWriteErrorKind {
    /// Variant for errors stemming from log I/O operations.
    LogIO(LogIOError),

    /// Variant for errors that occur swapping the *CURRENT* file.
    SwapCurrentFile(DBIOError),

    /**
    Variant for errors that occur cleaning up side effects after a previous error writing to
    the manifest file.
    */
    ManifestErrorCleanup(DBIOError),
}

impl From<LogIOError> for WriteError {
    fn from(err: LogIOError) -> Self {
        WriteError::ManifestWrite(ManifestWriteErrorKind::LogIO(err))
    }
}

/// Errors that can result from recovering version state from disk.
#[derive(Clone, Debug, PartialEq)]
pub enum RecoverError {
    /// Variant for problems reading or interpreting the *CURRENT* file.
    CurrentFileRead(CurrentFileReadErrorKind),

    /// Variant for errors reading the manifest log.
    ManifestRead(LogIOError),

    /// Variant for manifest records that do not form a consistent state.
    ManifestParse(String),
}

impl std::error::Error for RecoverError {}

impl fmt::Display for RecoverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoverError::CurrentFileRead(kind) => write!(f, "{kind:?}"),
            RecoverError::ManifestRead(base_err) => write!(f, "{base_err}"),
            RecoverError::ManifestParse(msg) => write!(f, "{msg}"),
        }
    }
}

/// Different errors that can occur when reading the *CURRENT* file.
#[derive(Clone, Debug, PartialEq)]
pub enum CurrentFileReadErrorKind {
    /// Variant for errors stemming from I/O operations.
    IO(DBIOError),

    /// Variant for unparseable *CURRENT* file contents.
    Parse(String),
}
