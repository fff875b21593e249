/*!
File system wrappers that allow different backing implementations to be plugged in.

The primary purpose of the abstraction is testability: integration tests run against an
in-memory or temp-dir backed file system without touching durable storage.
*/

mod disk;
mod memory;
mod temp;
mod traits;

pub use disk::OsFileSystem;
pub use memory::InMemoryFileSystem;
pub use temp::TmpFileSystem;
pub use traits::{
    FileLock, FileSystem, RandomAccessFile, ReadonlyRandomAccessFile, UnlockableFile,
};
