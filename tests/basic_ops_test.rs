//! Basic single-key operations against a live database.

use pretty_assertions::assert_eq;

use cairndb::{Batch, CairnDBError, DbOptions, WriteOptions, DB};

mod common;
use common::{delete, flush_memtable, get, memory_options, put};

#[test]
fn the_most_recent_put_wins() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    put(&db, "foo", "v1");
    put(&db, "bar", "v2");
    put(&db, "foo", "v3");

    assert_eq!(get(&db, "foo"), Some("v3".to_string()));
    assert_eq!(get(&db, "bar"), Some("v2".to_string()));
    assert_eq!(get(&db, "baz"), None);
}

#[test]
fn deleted_keys_are_not_found() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    put(&db, "foo", "v1");
    assert_eq!(get(&db, "foo"), Some("v1".to_string()));

    delete(&db, "foo");
    assert_eq!(get(&db, "foo"), None);

    // Deleting an absent key succeeds and leaves it absent
    delete(&db, "never-existed");
    assert_eq!(get(&db, "never-existed"), None);

    // The key can come back
    put(&db, "foo", "v2");
    assert_eq!(get(&db, "foo"), Some("v2".to_string()));
}

#[test]
fn values_survive_a_memtable_flush() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    put(&db, "persist-me", "on-disk");
    flush_memtable(&db);

    assert_eq!(get(&db, "persist-me"), Some("on-disk".to_string()));
    assert!(common::total_table_files(&db) >= 1);
}

#[test]
fn a_batch_applies_atomically_and_matches_individual_operations() {
    common::setup();

    // Apply a batch to one database
    let batched_db = DB::open(memory_options()).unwrap();
    put(&batched_db, "will-be-deleted", "x");
    let mut batch = Batch::new();
    batch.add_put(b"a".to_vec(), b"1".to_vec());
    batch.add_delete(b"will-be-deleted".to_vec());
    batch.add_put(b"b".to_vec(), b"2".to_vec());
    batch.add_put(b"a".to_vec(), b"1-final".to_vec());
    batched_db.write(WriteOptions::default(), batch).unwrap();

    // Apply the same operations one at a time to another
    let sequential_db = DB::open(memory_options()).unwrap();
    put(&sequential_db, "will-be-deleted", "x");
    put(&sequential_db, "a", "1");
    delete(&sequential_db, "will-be-deleted");
    put(&sequential_db, "b", "2");
    put(&sequential_db, "a", "1-final");

    for db in [&batched_db, &sequential_db] {
        assert_eq!(get(db, "a"), Some("1-final".to_string()));
        assert_eq!(get(db, "b"), Some("2".to_string()));
        assert_eq!(get(db, "will-be-deleted"), None);
    }
}

#[test]
fn an_empty_batch_is_a_no_op() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    db.write(WriteOptions::default(), Batch::new()).unwrap();
    assert_eq!(get(&db, "anything"), None);
}

#[test]
fn synchronous_writes_succeed() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    db.put(
        WriteOptions { sync: true },
        b"durable".to_vec(),
        b"yes".to_vec(),
    )
    .unwrap();

    assert_eq!(get(&db, "durable"), Some("yes".to_string()));
}

#[test]
fn opening_a_missing_database_without_create_if_missing_fails() {
    common::setup();
    let options = DbOptions {
        create_if_missing: false,
        ..memory_options()
    };

    let open_result = DB::open(options);
    assert!(matches!(
        open_result.err(),
        Some(CairnDBError::InvalidArgument(_))
    ));
}

#[test]
fn error_if_exists_rejects_an_existing_database() {
    common::setup();
    let options = memory_options();

    let db = DB::open(options.clone()).unwrap();
    put(&db, "k", "v");
    db.close().unwrap();
    drop(db);

    let reopen_result = DB::open(DbOptions {
        error_if_exists: true,
        ..options
    });
    assert!(matches!(
        reopen_result.err(),
        Some(CairnDBError::InvalidArgument(_))
    ));
}

#[test]
fn approximate_sizes_are_monotonic_in_the_range() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    for n in 0..500_u32 {
        put(&db, &format!("key-{n:04}"), &"v".repeat(200));
    }
    flush_memtable(&db);

    let sizes = db.get_approximate_sizes(&[
        (b"key-0000".to_vec(), b"key-0100".to_vec()),
        (b"key-0000".to_vec(), b"key-0400".to_vec()),
        (b"key-0000".to_vec(), b"key-9999".to_vec()),
    ]);

    assert!(sizes[0] <= sizes[1]);
    assert!(sizes[1] <= sizes[2]);
    assert!(sizes[2] > 0, "The widest range should cover real data.");
}

#[test]
fn memory_usage_property_tracks_the_memtable() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    let before: usize = db
        .get_property("approximate-memory-usage")
        .unwrap()
        .parse()
        .unwrap();
    put(&db, "big", &"x".repeat(10_000));
    let after: usize = db
        .get_property("approximate-memory-usage")
        .unwrap()
        .parse()
        .unwrap();

    assert!(after >= before + 10_000);
}

#[test]
fn unknown_properties_return_none() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    assert!(db.get_property("not-a-real-property").is_none());
    assert!(db.get_property("num-files-at-level99").is_none());
}
