/*!
This module contains error types for the background workers.
*/

use std::fmt;

use crate::errors::DBIOError;
use crate::tables::errors::{TableBuildError, TableReadError};
use crate::versioning::errors::WriteError;

/// Alias for a [`Result`] that wraps [`CompactionWorkerError`].
pub type CompactionWorkerResult<T> = Result<T, CompactionWorkerError>;

/// Errors surfaced by the flush and compaction workers.
#[derive(Clone, Debug, PartialEq)]
pub enum CompactionWorkerError {
    /// Variant for errors building table files.
    TableBuild(TableBuildError),

    /// Variant for errors reading table files during a merge.
    TableRead(TableReadError),

    /// Variant for errors persisting the resulting version edit.
    VersionWrite(WriteError),

    /// Variant for errors spawning or communicating with the worker thread.
    IO(DBIOError),

    /// Variant for invariant violations detected while a worker was running.
    UnexpectedState(String),
}

impl std::error::Error for CompactionWorkerError {}

impl fmt::Display for CompactionWorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompactionWorkerError::TableBuild(base_err) => write!(f, "{base_err}"),
            CompactionWorkerError::TableRead(base_err) => write!(f, "{base_err}"),
            CompactionWorkerError::VersionWrite(base_err) => write!(f, "{base_err}"),
            CompactionWorkerError::IO(base_err) => write!(f, "{base_err}"),
            CompactionWorkerError::UnexpectedState(msg) => write!(f, "{msg}"),
        }
    }
}

impl From<TableBuildError> for CompactionWorkerError {
    fn from(err: TableBuildError) -> Self {
        CompactionWorkerError::TableBuild(err)
    }
}

impl From<TableReadError> for CompactionWorkerError {
    fn from(err: TableReadError) -> Self {
        CompactionWorkerError::TableRead(err)
    }
}

impl From<WriteError> for CompactionWorkerError {
    fn from(err: WriteError) -> Self {
        CompactionWorkerError::VersionWrite(err)
    }
}

impl From<std::io::Error> for CompactionWorkerError {
    fn from(err: std::io::Error) -> Self {
        CompactionWorkerError::IO(err.into())
    }
}
