//! Level-0 shadowing, tombstone collection and manual compaction behavior.

use pretty_assertions::assert_eq;

use cairndb::DB;

mod common;
use common::{delete, flush_memtable, get, memory_options, put, scan_all};

#[test]
fn overlapping_level_zero_files_resolve_to_the_newest_write() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    put(&db, "300", "v300");
    put(&db, "500", "v500");
    flush_memtable(&db);

    put(&db, "200", "v200");
    put(&db, "600", "v600");
    put(&db, "900", "v900");
    flush_memtable(&db);

    assert_eq!(get(&db, "500"), Some("v500".to_string()));

    delete(&db, "600");
    flush_memtable(&db);

    assert_eq!(get(&db, "600"), None);
    assert_eq!(get(&db, "200"), Some("v200".to_string()));
    assert_eq!(get(&db, "900"), Some("v900".to_string()));
}

#[test]
fn tombstones_and_shadowed_values_are_dropped_at_the_base_level() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    put(&db, "foo", "v1");
    flush_memtable(&db);

    put(&db, "a", "begin");
    put(&db, "z", "end");
    flush_memtable(&db);

    delete(&db, "foo");
    put(&db, "foo", "v2");
    flush_memtable(&db);

    // Push everything to the bottom of the tree
    db.compact_range(None, None).unwrap();

    assert_eq!(get(&db, "foo"), Some("v2".to_string()));
    assert_eq!(
        scan_all(&db),
        vec![
            ("a".to_string(), "begin".to_string()),
            ("foo".to_string(), "v2".to_string()),
            ("z".to_string(), "end".to_string()),
        ]
    );
}

#[test]
fn compact_range_is_idempotent_on_an_already_compacted_range() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    for n in 0..500_u32 {
        put(&db, &format!("key-{n:04}"), &format!("value-{n}"));
    }
    db.compact_range(None, None).unwrap();
    let after_first = scan_all(&db);
    let files_after_first = common::total_table_files(&db);

    db.compact_range(None, None).unwrap();

    assert_eq!(scan_all(&db), after_first);
    assert_eq!(common::total_table_files(&db), files_after_first);
}

#[test]
fn background_compaction_keeps_reads_correct_under_churn() {
    common::setup();
    let db = DB::open(common::small_buffer_options(8 * 1024)).unwrap();

    // Overwrite a rotating window of keys many times so levels fill and compact while the
    // newest value for every key stays visible
    for round in 0..10_u32 {
        for n in 0..500_u32 {
            put(&db, &format!("key-{n:03}"), &format!("round-{round}-{n}"));
        }
    }

    for n in 0..500_u32 {
        assert_eq!(
            get(&db, &format!("key-{n:03}")),
            Some(format!("round-9-{n}")),
            "key-{n:03} should hold its final value"
        );
    }
}

#[test]
fn stats_reflect_compaction_work() {
    common::setup();
    let db = DB::open(common::small_buffer_options(8 * 1024)).unwrap();

    for n in 0..2000_u32 {
        put(&db, &format!("key-{n:05}"), &"x".repeat(64));
    }
    db.compact_range(None, None).unwrap();

    let stats = db.get_property("stats").unwrap();
    assert!(
        stats.lines().count() > 2,
        "Expected at least one populated level in the stats dump: {stats}"
    );
}
