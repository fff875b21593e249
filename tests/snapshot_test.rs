//! Snapshot isolation behavior.

use pretty_assertions::assert_eq;

use cairndb::DB;

mod common;
use common::{delete, flush_memtable, get, get_at_snapshot, memory_options, put};

#[test]
fn a_snapshot_pins_the_state_at_its_creation() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    put(&db, "k", "v1");
    let snapshot = db.get_snapshot();
    put(&db, "k", "v2");

    assert_eq!(get(&db, "k"), Some("v2".to_string()));
    assert_eq!(get_at_snapshot(&db, "k", &snapshot), Some("v1".to_string()));

    db.release_snapshot(snapshot);
}

#[test]
fn snapshot_reads_hold_across_a_memtable_flush() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    put(&db, "k", "v1");
    let snapshot = db.get_snapshot();
    put(&db, "k", "v2");

    flush_memtable(&db);

    assert_eq!(get(&db, "k"), Some("v2".to_string()));
    assert_eq!(get_at_snapshot(&db, "k", &snapshot), Some("v1".to_string()));

    db.release_snapshot(snapshot);
}

#[test]
fn a_snapshot_hides_later_deletions() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    put(&db, "doomed", "still-here");
    let snapshot = db.get_snapshot();
    delete(&db, "doomed");

    assert_eq!(get(&db, "doomed"), None);
    assert_eq!(
        get_at_snapshot(&db, "doomed", &snapshot),
        Some("still-here".to_string())
    );

    db.release_snapshot(snapshot);
}

#[test]
fn a_snapshot_does_not_see_keys_written_after_it() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    let snapshot = db.get_snapshot();
    put(&db, "new-key", "value");

    assert_eq!(get(&db, "new-key"), Some("value".to_string()));
    assert_eq!(get_at_snapshot(&db, "new-key", &snapshot), None);

    db.release_snapshot(snapshot);
}

#[test]
fn multiple_snapshots_observe_their_own_points_in_time() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    put(&db, "k", "v1");
    let first = db.get_snapshot();
    put(&db, "k", "v2");
    let second = db.get_snapshot();
    put(&db, "k", "v3");

    assert_eq!(get_at_snapshot(&db, "k", &first), Some("v1".to_string()));
    assert_eq!(get_at_snapshot(&db, "k", &second), Some("v2".to_string()));
    assert_eq!(get(&db, "k"), Some("v3".to_string()));

    // Releasing in arbitrary order is fine
    db.release_snapshot(first);
    assert_eq!(get_at_snapshot(&db, "k", &second), Some("v2".to_string()));
    db.release_snapshot(second);
}

#[test]
fn snapshot_protected_versions_survive_compaction() {
    common::setup();
    let db = DB::open(common::small_buffer_options(8 * 1024)).unwrap();

    put(&db, "protected", "old-version");
    let snapshot = db.get_snapshot();
    put(&db, "protected", "new-version");

    // Churn enough data through the tree to trigger real compactions
    for n in 0..2000_u32 {
        put(&db, &format!("churn-{n:05}"), &"x".repeat(64));
    }
    db.compact_range(None, None).unwrap();

    assert_eq!(
        get_at_snapshot(&db, "protected", &snapshot),
        Some("old-version".to_string())
    );
    assert_eq!(get(&db, "protected"), Some("new-version".to_string()));

    db.release_snapshot(snapshot);
}
