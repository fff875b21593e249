/*!
The traits that file system providers implement.
*/

use core::fmt::Debug;
use std::io::{Read, Result, Seek, Write};
use std::path::{Path, PathBuf};

/**
A source of binary content that is readonly and can be read from arbitrary offsets.
*/
pub trait ReadonlyRandomAccessFile: Read + Seek + Send + Sync {
    /// Read bytes into `buf` starting from the given offset, returning the number read.
    fn read_from(&self, buf: &mut [u8], offset: usize) -> Result<usize>;

    /// Get the length of the file.
    fn len(&self) -> Result<u64>;

    /// Return true if the file is empty. Otherwise, false.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/**
A source of binary content that is readable and writable and can operate on arbitrary offsets.
*/
pub trait RandomAccessFile: ReadonlyRandomAccessFile + Write {
    /// Append the buffer `buf` to the end of the file, returning the number of bytes written.
    fn append(&mut self, buf: &[u8]) -> Result<usize>;

    /**
    Force buffered writes down to persistent storage.

    This is the primitive behind `sync = true` writes and must not return until the data is
    durable as far as the operating system can guarantee.
    */
    fn sync(&mut self) -> Result<()>;
}

/// An interface for the file system operations the database needs.
pub trait FileSystem: Send + Sync {
    /// Return the name of the file system implementation.
    fn get_name(&self) -> String;

    /// Create a new, empty directory at the provided path.
    fn create_dir(&self, path: &Path) -> Result<()>;

    /// Recursively create a directory and all missing parent components.
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// List the contents of the given `path`.
    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Open a file in read-only mode.
    fn open_file(&self, path: &Path) -> Result<Box<dyn ReadonlyRandomAccessFile>>;

    /**
    Rename a file or directory, replacing any file already at the destination.

    For disk-backed implementations this corresponds to [`std::fs::rename`] with the same
    platform-specific caveats. Combined with a temp file this provides the atomic-swap
    primitive used to update the `CURRENT` file.
    */
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /**
    Open a file in read/write mode.

    Creates the file if it does not exist. With `append` set to true an existing file is
    appended to; otherwise an existing file is truncated to length 0.
    */
    fn create_file(&self, path: &Path, append: bool) -> Result<Box<dyn RandomAccessFile>>;

    /// Remove a file from the file system.
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Remove an empty directory.
    fn remove_dir(&self, path: &Path) -> Result<()>;

    /// Remove a directory and all of its contents.
    fn remove_dir_all(&self, path: &Path) -> Result<()>;

    /// Get the size in bytes of the file at the specified path.
    fn get_file_size(&self, path: &Path) -> Result<u64>;

    /**
    Create a hard link at `link` pointing at the content of `original`.

    Used by live backups to snapshot immutable files without copying them.
    */
    fn hard_link(&self, original: &Path, link: &Path) -> Result<()>;

    /**
    Place an advisory exclusive lock on the file at the specified path.

    The lock is advisory only: it keeps out other well-behaved database instances, not
    arbitrary writers.
    */
    fn lock_file(&self, path: &Path) -> Result<FileLock>;
}

impl Debug for dyn FileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get_name())
    }
}

/**
An opaque handle for a locked file.

The lock is released when the handle is dropped.
*/
pub struct FileLock {
    inner: Box<dyn UnlockableFile>,
}

impl FileLock {
    /// Create a new instance of [`FileLock`].
    pub fn new(file: Box<dyn UnlockableFile>) -> Self {
        Self { inner: file }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(unlock_error) = self.inner.unlock() {
            log::error!(
                "There was an error releasing the database lock. Error: {error}",
                error = unlock_error
            );
        }
    }
}

/// A file that can be unlocked.
pub trait UnlockableFile: Send {
    /// Unlock the file.
    fn unlock(&self) -> Result<()>;
}
