/*!
This module contains a file system provider rooted in a self-cleaning temporary directory.
*/

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::disk::OsFileSystem;
use super::traits::{FileLock, FileSystem, RandomAccessFile, ReadonlyRandomAccessFile};

/**
A disk-backed file system provider rooted at a temporary directory.

The temporary directory and everything beneath it is deleted when the provider is dropped.
This is primarily meant for tests that want real file I/O without leaving artifacts behind.
*/
pub struct TmpFileSystem {
    /// The temp directory acting as the root. Removed on drop.
    temp_dir: TempDir,

    /// The delegate performing the actual I/O.
    inner: OsFileSystem,
}

/// Public methods
impl TmpFileSystem {
    /**
    Create an instance of the [`TmpFileSystem`].

    If `root` is provided the temporary directory is created beneath it, otherwise beneath the
    system temp location.
    */
    pub fn new(root: Option<&Path>) -> Self {
        let temp_dir = match root {
            Some(base_path) => TempDir::new_in(base_path),
            None => TempDir::new(),
        }
        .expect("Failed to create a temporary directory for the TmpFileSystem.");

        Self {
            temp_dir,
            inner: OsFileSystem::new(),
        }
    }

    /// The root path all database files should be placed beneath.
    pub fn get_root_path(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }
}

impl FileSystem for TmpFileSystem {
    fn get_name(&self) -> String {
        "TmpFileSystem".to_string()
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        self.inner.create_dir(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.create_dir_all(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        self.inner.list_dir(path)
    }

    fn open_file(&self, path: &Path) -> io::Result<Box<dyn ReadonlyRandomAccessFile>> {
        self.inner.open_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.inner.rename(from, to)
    }

    fn create_file(&self, path: &Path, append: bool) -> io::Result<Box<dyn RandomAccessFile>> {
        self.inner.create_file(path, append)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_dir(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_dir_all(path)
    }

    fn get_file_size(&self, path: &Path) -> io::Result<u64> {
        self.inner.get_file_size(path)
    }

    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()> {
        self.inner.hard_link(original, link)
    }

    fn lock_file(&self, path: &Path) -> io::Result<FileLock> {
        self.inner.lock_file(path)
    }
}
