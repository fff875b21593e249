/*!
This module contains error types for table file operations.
*/

use std::fmt;

use crate::errors::DBIOError;

/// Alias for a [`Result`] that wraps [`TableReadError`].
pub type TableReadResult<T> = Result<T, TableReadError>;

/// Alias for a [`Result`] that wraps [`TableBuildError`].
pub type TableBuildResult<T> = Result<T, TableBuildError>;

/// Errors that can occur while reading a table file.
#[derive(Clone, Debug, PartialEq)]
pub enum TableReadError {
    /// Variant for errors stemming from I/O operations.
    IO(DBIOError),

    /// Variant for table content that failed an integrity check.
    Corruption(String),

    /// Variant for failures decoding block contents.
    BlockDecode(String),
}

impl std::error::Error for TableReadError {}

impl fmt::Display for TableReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableReadError::IO(base_err) => write!(f, "{base_err}"),
            TableReadError::Corruption(msg) => write!(f, "Corrupt table file: {msg}"),
            TableReadError::BlockDecode(msg) => {
                write!(f, "Failed to decode a table block: {msg}")
            }
        }
    }
}

impl From<std::io::Error> for TableReadError {
    fn from(err: std::io::Error) -> Self {
        TableReadError::IO(err.into())
    }
}

/// Errors that can occur while building a table file.
#[derive(Clone, Debug, PartialEq)]
pub enum TableBuildError {
    /// Variant for errors stemming from I/O operations.
    IO(DBIOError),

    /// Variant for entries added out of order or after finalization.
    OutOfOrder(String),
}

impl std::error::Error for TableBuildError {}

impl fmt::Display for TableBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableBuildError::IO(base_err) => write!(f, "{base_err}"),
            TableBuildError::OutOfOrder(msg) => write!(f, "{msg}"),
        }
    }
}

impl From<std::io::Error> for TableBuildError {
    fn from(err: std::io::Error) -> Self {
        TableBuildError::IO(err.into())
    }
}
