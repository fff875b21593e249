//! Durability across close/reopen cycles, destruction and repair.

use pretty_assertions::assert_eq;

use cairndb::fs::FileSystem;
use cairndb::{CairnDBError, DbOptions, DB};

mod common;
use common::{flush_memtable, get, memory_options, put, scan_all};

#[test]
fn unflushed_writes_are_replayed_from_the_log_on_reopen() {
    common::setup();
    let options = memory_options();

    {
        let db = DB::open(options.clone()).unwrap();
        put(&db, "foo", "v1");
        put(&db, "baz", "v5");
        db.close().unwrap();
    }

    {
        let db = DB::open(options.clone()).unwrap();
        assert_eq!(get(&db, "foo"), Some("v1".to_string()));
        assert_eq!(get(&db, "baz"), Some("v5".to_string()));

        put(&db, "bar", "v2");
        put(&db, "foo", "v3");
        db.close().unwrap();
    }

    let db = DB::open(options).unwrap();
    assert_eq!(get(&db, "foo"), Some("v3".to_string()));
    assert_eq!(get(&db, "bar"), Some("v2".to_string()));
    assert_eq!(get(&db, "baz"), Some("v5".to_string()));
}

#[test]
fn flushed_state_is_recovered_through_the_manifest() {
    common::setup();
    let options = memory_options();

    {
        let db = DB::open(options.clone()).unwrap();
        for n in 0..500_u32 {
            put(&db, &format!("key-{n:04}"), &format!("value-{n}"));
        }
        flush_memtable(&db);
        // These land only in the new write-ahead log
        put(&db, "after-flush", "wal-only");
        db.close().unwrap();
    }

    let db = DB::open(options).unwrap();
    assert_eq!(get(&db, "key-0000"), Some("value-0".to_string()));
    assert_eq!(get(&db, "key-0499"), Some("value-499".to_string()));
    assert_eq!(get(&db, "after-flush"), Some("wal-only".to_string()));
    assert_eq!(scan_all(&db).len(), 501);
}

#[test]
fn the_key_set_is_identical_after_reopen() {
    common::setup();
    let options = common::small_buffer_options(16 * 1024);

    let expected = {
        let db = DB::open(options.clone()).unwrap();
        for n in 0..1500_u32 {
            put(&db, &format!("key-{n:05}"), &format!("value-{n}"));
        }
        // Mix of flushed and unflushed state
        for n in (0..1500_u32).step_by(3) {
            common::delete(&db, &format!("key-{n:05}"));
        }
        let snapshot_of_state = scan_all(&db);
        db.close().unwrap();
        snapshot_of_state
    };

    let db = DB::open(options).unwrap();
    assert_eq!(scan_all(&db), expected);
}

#[test]
fn guards_survive_reopen() {
    common::setup();
    let options = common::small_buffer_options(8 * 1024);

    let (guards_before, files_before) = {
        let db = DB::open(options.clone()).unwrap();
        for n in 0..3000_u32 {
            put(&db, &format!("key-{n:05}"), &"x".repeat(32));
        }
        db.compact_range(None, None).unwrap();
        let guards: Vec<String> = (0..7)
            .map(|level| {
                db.get_property(&format!("num-guards-at-level{level}"))
                    .unwrap()
            })
            .collect();
        let files = common::total_table_files(&db);
        db.close().unwrap();
        (guards, files)
    };

    let db = DB::open(options).unwrap();
    let guards_after: Vec<String> = (0..7)
        .map(|level| {
            db.get_property(&format!("num-guards-at-level{level}"))
                .unwrap()
        })
        .collect();

    assert_eq!(guards_before, guards_after);
    assert_eq!(files_before, common::total_table_files(&db));
}

#[test]
fn destroy_removes_the_database() {
    common::setup();
    let options = memory_options();

    {
        let db = DB::open(options.clone()).unwrap();
        put(&db, "k", "v");
        flush_memtable(&db);
        db.close().unwrap();
    }

    DB::destroy(options.clone()).unwrap();

    let reopen_result = DB::open(DbOptions {
        create_if_missing: false,
        ..options
    });
    assert!(matches!(
        reopen_result.err(),
        Some(CairnDBError::InvalidArgument(_))
    ));
}

#[test]
fn repair_rebuilds_a_database_with_a_missing_manifest() {
    common::setup();
    let options = memory_options();
    let filesystem = options.filesystem_provider();

    {
        let db = DB::open(options.clone()).unwrap();
        for n in 0..200_u32 {
            put(&db, &format!("key-{n:04}"), &format!("value-{n}"));
        }
        flush_memtable(&db);
        put(&db, "wal-resident", "still-counts");
        db.close().unwrap();
    }

    // Simulate damage: drop the CURRENT pointer so a normal open cannot proceed
    let current_path = std::path::Path::new("/cairndb-it").join("CURRENT");
    filesystem.remove_file(&current_path).unwrap();
    assert!(DB::open(options.clone()).is_err());

    DB::repair(options.clone()).unwrap();

    let db = DB::open(options).unwrap();
    assert_eq!(get(&db, "key-0000"), Some("value-0".to_string()));
    assert_eq!(get(&db, "key-0199"), Some("value-199".to_string()));
    assert_eq!(get(&db, "wal-resident"), Some("still-counts".to_string()));
}

#[test]
fn a_live_backup_captures_a_checkpoint() {
    common::setup();
    let options = memory_options();
    let db = DB::open(options.clone()).unwrap();

    for n in 0..300_u32 {
        put(&db, &format!("key-{n:04}"), &format!("value-{n}"));
    }
    // A backup snapshots the current version: flush so the data is in table files
    flush_memtable(&db);
    db.live_backup("nightly").unwrap();

    // Mutations after the backup must not appear in it
    put(&db, "post-backup", "not-in-backup");
    db.close().unwrap();
    drop(db);

    let backup_db = DB::open(DbOptions {
        db_path: "/backup-nightly".to_string(),
        create_if_missing: false,
        ..options
    })
    .unwrap();

    assert_eq!(get(&backup_db, "key-0000"), Some("value-0".to_string()));
    assert_eq!(get(&backup_db, "key-0299"), Some("value-299".to_string()));
    assert_eq!(get(&backup_db, "post-backup"), None);
}
