/*!
This module contains an in-memory file system provider for hermetic tests.

Files are byte vectors shared behind locks. Hard links genuinely alias the underlying content,
which mirrors how live backups behave on a real file system.
*/

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::traits::{
    FileLock, FileSystem, RandomAccessFile, ReadonlyRandomAccessFile, UnlockableFile,
};

/// The contents of one in-memory file, shared between open handles and hard links.
type SharedFileData = Arc<RwLock<Vec<u8>>>;

/// The mutable state of the in-memory file system.
struct InMemoryFsState {
    /// The files currently in existence keyed by their path.
    files: HashMap<PathBuf, SharedFileData>,

    /// The directories currently in existence.
    directories: HashSet<PathBuf>,

    /// Paths that currently hold an advisory lock.
    locked_paths: HashSet<PathBuf>,
}

impl InMemoryFsState {
    /// Whether `path` exists as a file or directory.
    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.directories.contains(path)
    }
}

/// A file system provider that keeps all content in process memory.
pub struct InMemoryFileSystem {
    state: Arc<Mutex<InMemoryFsState>>,
}

/// Public methods
impl InMemoryFileSystem {
    /// Create an instance of the [`InMemoryFileSystem`].
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryFsState {
                files: HashMap::new(),
                directories: HashSet::new(),
                locked_paths: HashSet::new(),
            })),
        }
    }
}

impl Default for InMemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for InMemoryFileSystem {
    fn get_name(&self) -> String {
        "InMemoryFileSystem".to_string()
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state.lock();
        state.directories.insert(path.to_path_buf());

        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state.lock();
        let mut current = Some(path);
        while let Some(ancestor) = current {
            state.directories.insert(ancestor.to_path_buf());
            current = ancestor.parent();
        }

        Ok(())
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let state = self.state.lock();
        let mut entries: Vec<PathBuf> = state
            .files
            .keys()
            .chain(state.directories.iter())
            .filter(|candidate| candidate.parent() == Some(path))
            .cloned()
            .collect();
        entries.sort();

        Ok(entries)
    }

    fn open_file(&self, path: &Path) -> io::Result<Box<dyn ReadonlyRandomAccessFile>> {
        let state = self.state.lock();
        let data = state.files.get(path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("No in-memory file at {path:?}."),
            )
        })?;

        Ok(Box::new(InMemoryFile {
            data: Arc::clone(data),
            cursor: 0,
        }))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut state = self.state.lock();
        if let Some(data) = state.files.remove(from) {
            state.files.insert(to.to_path_buf(), data);
            return Ok(());
        }

        if state.directories.remove(from) {
            state.directories.insert(to.to_path_buf());
            // Move everything rooted under the old directory path
            let nested: Vec<PathBuf> = state
                .files
                .keys()
                .filter(|path| path.starts_with(from))
                .cloned()
                .collect();
            for old_path in nested {
                let relocated = to.join(old_path.strip_prefix(from).unwrap());
                let data = state.files.remove(&old_path).unwrap();
                state.files.insert(relocated, data);
            }
            return Ok(());
        }

        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("No in-memory file or directory at {from:?}."),
        ))
    }

    fn create_file(&self, path: &Path, append: bool) -> io::Result<Box<dyn RandomAccessFile>> {
        let mut state = self.state.lock();
        let data = state
            .files
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(RwLock::new(vec![])));
        if !append {
            data.write().clear();
        }
        let cursor = data.read().len() as u64;

        Ok(Box::new(InMemoryFile {
            data: Arc::clone(data),
            cursor,
        }))
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state.lock();
        state.files.remove(path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("No in-memory file at {path:?}."),
            )
        })?;

        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state.lock();
        let has_children = state
            .files
            .keys()
            .any(|candidate| candidate.parent() == Some(path))
            || state
                .directories
                .iter()
                .any(|candidate| candidate.parent() == Some(path));
        if has_children {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("The in-memory directory at {path:?} is not empty."),
            ));
        }
        state.directories.remove(path);

        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state.lock();
        state.files.retain(|candidate, _| !candidate.starts_with(path));
        state
            .directories
            .retain(|candidate| !candidate.starts_with(path));

        Ok(())
    }

    fn get_file_size(&self, path: &Path) -> io::Result<u64> {
        let state = self.state.lock();
        let data = state.files.get(path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("No in-memory file at {path:?}."),
            )
        })?;
        let len = data.read().len() as u64;

        Ok(len)
    }

    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()> {
        let mut state = self.state.lock();
        let data = state.files.get(original).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("No in-memory file at {original:?}."),
            )
        })?;
        if state.exists(link) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("A file already exists at {link:?}."),
            ));
        }
        state.files.insert(link.to_path_buf(), data);

        Ok(())
    }

    fn lock_file(&self, path: &Path) -> io::Result<FileLock> {
        let mut state = self.state.lock();
        if state.locked_paths.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("The in-memory file at {path:?} is already locked."),
            ));
        }
        state.locked_paths.insert(path.to_path_buf());
        state
            .files
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(RwLock::new(vec![])));

        Ok(FileLock::new(Box::new(InMemoryLockedFile {
            state: Arc::clone(&self.state),
            path: path.to_path_buf(),
        })))
    }
}

/// A handle to an in-memory file.
struct InMemoryFile {
    /// The shared file content.
    data: SharedFileData,

    /// The position reads and writes go through.
    cursor: u64,
}

impl Read for InMemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes_read = self.read_from(buf, self.cursor as usize)?;
        self.cursor += bytes_read as u64;

        Ok(bytes_read)
    }
}

impl Seek for InMemoryFile {
    fn seek(&mut self, position: SeekFrom) -> io::Result<u64> {
        let length = self.data.read().len() as i64;
        let new_cursor = match position {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => length + offset,
            SeekFrom::Current(offset) => self.cursor as i64 + offset,
        };

        if new_cursor < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Attempted to seek before the start of the file.",
            ));
        }

        self.cursor = new_cursor as u64;
        Ok(self.cursor)
    }
}

impl Write for InMemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut data = self.data.write();
        let write_start = self.cursor as usize;
        if write_start + buf.len() > data.len() {
            data.resize(write_start + buf.len(), 0);
        }
        data[write_start..write_start + buf.len()].copy_from_slice(buf);
        self.cursor += buf.len() as u64;

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ReadonlyRandomAccessFile for InMemoryFile {
    fn read_from(&self, buf: &mut [u8], offset: usize) -> io::Result<usize> {
        let data = self.data.read();
        if offset >= data.len() {
            return Ok(0);
        }

        let bytes_to_read = buf.len().min(data.len() - offset);
        buf[..bytes_to_read].copy_from_slice(&data[offset..offset + bytes_to_read]);

        Ok(bytes_to_read)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.data.read().len() as u64)
    }
}

impl RandomAccessFile for InMemoryFile {
    fn append(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.seek(SeekFrom::End(0))?;
        self.write(buf)
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The lock handle returned by [`InMemoryFileSystem::lock_file`].
struct InMemoryLockedFile {
    state: Arc<Mutex<InMemoryFsState>>,
    path: PathBuf,
}

impl UnlockableFile for InMemoryLockedFile {
    fn unlock(&self) -> io::Result<()> {
        self.state.lock().locked_paths.remove(&self.path);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn files_can_be_written_and_read_back() {
        let fs = InMemoryFileSystem::new();
        let path = PathBuf::from("/db/000001.log");

        let mut file = fs.create_file(&path, false).unwrap();
        file.write_all(b"hello").unwrap();
        drop(file);

        let mut reader = fs.open_file(&path).unwrap();
        let mut contents = vec![];
        reader.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"hello");
        assert_eq!(fs.get_file_size(&path).unwrap(), 5);
    }

    #[test]
    fn appending_preserves_existing_content() {
        let fs = InMemoryFileSystem::new();
        let path = PathBuf::from("/db/000001.log");

        fs.create_file(&path, false)
            .unwrap()
            .write_all(b"first")
            .unwrap();
        fs.create_file(&path, true)
            .unwrap()
            .write_all(b"-second")
            .unwrap();

        let mut contents = vec![];
        fs.open_file(&path).unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"first-second");
    }

    #[test]
    fn directories_list_their_children() {
        let fs = InMemoryFileSystem::new();
        fs.create_dir_all(Path::new("/db")).unwrap();
        fs.create_file(Path::new("/db/CURRENT"), false).unwrap();
        fs.create_file(Path::new("/db/000001.sst"), false).unwrap();
        fs.create_file(Path::new("/elsewhere/000002.sst"), false)
            .unwrap();

        let entries = fs.list_dir(Path::new("/db")).unwrap();
        assert_eq!(
            entries,
            vec![
                PathBuf::from("/db/000001.sst"),
                PathBuf::from("/db/CURRENT")
            ]
        );
    }

    #[test]
    fn hard_links_alias_the_same_content() {
        let fs = InMemoryFileSystem::new();
        let original = PathBuf::from("/db/000001.sst");
        let link = PathBuf::from("/backup/000001.sst");
        fs.create_file(&original, false)
            .unwrap()
            .write_all(b"table-bytes")
            .unwrap();

        fs.hard_link(&original, &link).unwrap();
        fs.remove_file(&original).unwrap();

        let mut contents = vec![];
        fs.open_file(&link).unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"table-bytes");
    }

    #[test]
    fn a_locked_file_cannot_be_locked_again_until_released() {
        let fs = InMemoryFileSystem::new();
        let path = PathBuf::from("/db/LOCK");

        let lock = fs.lock_file(&path).unwrap();
        assert!(fs.lock_file(&path).is_err());

        drop(lock);
        assert!(fs.lock_file(&path).is_ok());
    }
}
