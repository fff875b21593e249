//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use cairndb::fs::{FileSystem, InMemoryFileSystem};
use cairndb::{DbOptions, ReadOptions, WriteOptions, DB};

/// Initialize logging for a test run.
pub fn setup() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Warn)
        .is_test(true)
        .try_init();
}

/// Options backed by a fresh in-memory file system, shared so tests can reopen the database.
pub fn memory_options() -> DbOptions {
    let filesystem: Arc<dyn FileSystem> = Arc::new(InMemoryFileSystem::new());

    DbOptions {
        db_path: "/cairndb-it".to_string(),
        create_if_missing: true,
        filesystem_provider: filesystem,
        ..DbOptions::default()
    }
}

/// Options that rotate the memtable quickly, to exercise flushes and compactions.
pub fn small_buffer_options(write_buffer_size: usize) -> DbOptions {
    DbOptions {
        write_buffer_size,
        max_file_size: write_buffer_size.max(4 * 1024),
        block_size: 1024,
        ..memory_options()
    }
}

/// Store a string value.
pub fn put(db: &DB, key: &str, value: &str) {
    db.put(
        WriteOptions::default(),
        key.as_bytes().to_vec(),
        value.as_bytes().to_vec(),
    )
    .expect("The put should succeed.");
}

/// Remove a key.
pub fn delete(db: &DB, key: &str) {
    db.delete(WriteOptions::default(), key.as_bytes().to_vec())
        .expect("The delete should succeed.");
}

/// Read a string value, mapping a missing key to [`None`].
pub fn get(db: &DB, key: &str) -> Option<String> {
    match db.get(ReadOptions::default(), key.as_bytes()) {
        Ok(value) => Some(String::from_utf8(value).unwrap()),
        Err(cairndb::CairnDBError::KeyNotFound) => None,
        Err(other) => panic!("Unexpected error reading {key:?}: {other}"),
    }
}

/// Read a string value through a snapshot, mapping a missing key to [`None`].
pub fn get_at_snapshot(db: &DB, key: &str, snapshot: &cairndb::Snapshot) -> Option<String> {
    let read_options = ReadOptions {
        snapshot: Some(snapshot.clone()),
        ..ReadOptions::default()
    };
    match db.get(read_options, key.as_bytes()) {
        Ok(value) => Some(String::from_utf8(value).unwrap()),
        Err(cairndb::CairnDBError::KeyNotFound) => None,
        Err(other) => panic!("Unexpected error reading {key:?} at a snapshot: {other}"),
    }
}

/**
Force the active memtable onto disk without compacting anything.

Compacting a range no file overlaps still flushes the memtable first, which is exactly the
lever these tests need.
*/
pub fn flush_memtable(db: &DB) {
    db.compact_range(Some(b"\xff\xff\xff-no-such-range"), Some(b"\xff\xff\xff-no-such-range2"))
        .expect("The flush should succeed.");
}

/// Collect every (key, value) pair visible in the database, in order.
pub fn scan_all(db: &DB) -> Vec<(String, String)> {
    let mut iter = db
        .new_iterator(ReadOptions::default())
        .expect("Creating an iterator should succeed.");
    iter.seek_to_first().unwrap();

    let mut entries = vec![];
    while iter.is_valid() {
        entries.push((
            String::from_utf8(iter.key().unwrap().to_vec()).unwrap(),
            String::from_utf8(iter.value().unwrap().to_vec()).unwrap(),
        ));
        if !iter.next() {
            break;
        }
    }

    entries
}

/// The total number of table files reported across all levels.
pub fn total_table_files(db: &DB) -> usize {
    (0..7)
        .map(|level| {
            db.get_property(&format!("num-files-at-level{level}"))
                .unwrap()
                .parse::<usize>()
                .unwrap()
        })
        .sum()
}
