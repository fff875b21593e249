//! Forward and reverse iteration semantics.

use pretty_assertions::assert_eq;

use cairndb::{ReadOptions, DB};

mod common;
use common::{delete, flush_memtable, get, memory_options, put, scan_all};

/// Collect every key by walking backward from the end.
fn scan_all_reverse(db: &DB) -> Vec<String> {
    let mut iter = db.new_iterator(ReadOptions::default()).unwrap();
    iter.seek_to_last().unwrap();

    let mut keys = vec![];
    while iter.is_valid() {
        keys.push(String::from_utf8(iter.key().unwrap().to_vec()).unwrap());
        if !iter.prev() {
            break;
        }
    }

    keys
}

#[test]
fn forward_iteration_visits_keys_in_order() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    // Insert out of order across the memtable and a flushed file
    for key in ["m", "c", "x", "a"] {
        put(&db, key, &format!("value-{key}"));
    }
    flush_memtable(&db);
    for key in ["b", "q", "d"] {
        put(&db, key, &format!("value-{key}"));
    }

    let entries = scan_all(&db);
    let keys: Vec<&str> = entries.iter().map(|(key, _)| key.as_str()).collect();
    assert_eq!(keys, vec!["a", "b", "c", "d", "m", "q", "x"]);
}

#[test]
fn reverse_iteration_is_the_mirror_of_forward_iteration() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    for n in 0..100_u32 {
        put(&db, &format!("key-{n:03}"), "value");
    }
    flush_memtable(&db);
    for n in 100..150_u32 {
        put(&db, &format!("key-{n:03}"), "value");
    }

    let forward: Vec<String> = scan_all(&db).into_iter().map(|(key, _)| key).collect();
    let mut reverse = scan_all_reverse(&db);
    reverse.reverse();

    assert_eq!(forward, reverse);
    assert_eq!(forward.len(), 150);
}

#[test]
fn direction_can_switch_mid_iteration() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    for key in ["a", "b", "c", "d", "e"] {
        put(&db, key, key);
    }

    let mut iter = db.new_iterator(ReadOptions::default()).unwrap();
    iter.seek_to_first().unwrap();
    assert_eq!(iter.key().unwrap(), b"a");

    assert!(iter.next());
    assert_eq!(iter.key().unwrap(), b"b");
    assert!(iter.next());
    assert_eq!(iter.key().unwrap(), b"c");

    // Turn around
    assert!(iter.prev());
    assert_eq!(iter.key().unwrap(), b"b");

    // And turn around again
    assert!(iter.next());
    assert_eq!(iter.key().unwrap(), b"c");
}

#[test]
fn seeking_lands_on_the_first_key_at_or_after_the_target() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    for key in ["apple", "banana", "mango", "peach"] {
        put(&db, key, key);
    }

    let mut iter = db.new_iterator(ReadOptions::default()).unwrap();
    iter.seek(b"banana").unwrap();
    assert_eq!(iter.key().unwrap(), b"banana");

    iter.seek(b"cherry").unwrap();
    assert_eq!(iter.key().unwrap(), b"mango");

    iter.seek(b"zucchini").unwrap();
    assert!(!iter.is_valid());
}

#[test]
fn deleted_and_overwritten_keys_show_only_their_final_state() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    put(&db, "keep", "original");
    put(&db, "gone", "doomed");
    put(&db, "replaced", "old");
    flush_memtable(&db);

    delete(&db, "gone");
    put(&db, "replaced", "new");

    let entries = scan_all(&db);
    assert_eq!(
        entries,
        vec![
            ("keep".to_string(), "original".to_string()),
            ("replaced".to_string(), "new".to_string()),
        ]
    );
}

#[test]
fn an_iterator_ignores_writes_made_after_its_creation() {
    common::setup();
    let db = DB::open(memory_options()).unwrap();

    put(&db, "stable", "before");
    let mut iter = db.new_iterator(ReadOptions::default()).unwrap();

    put(&db, "added-later", "invisible");
    put(&db, "stable", "after");

    iter.seek_to_first().unwrap();
    assert_eq!(iter.key().unwrap(), b"stable");
    assert_eq!(iter.value().unwrap(), b"before");
    assert!(!iter.next());

    // A fresh iterator sees the new state
    assert_eq!(get(&db, "added-later"), Some("invisible".to_string()));
}

#[test]
fn iteration_spans_memtables_and_multiple_levels() {
    common::setup();
    let db = DB::open(common::small_buffer_options(8 * 1024)).unwrap();

    for n in 0..1000_u32 {
        put(&db, &format!("key-{n:04}"), &format!("value-{n}"));
    }
    db.compact_range(None, None).unwrap();
    // Land fresh entries in the memtable on top of the compacted tree
    for n in 1000..1100_u32 {
        put(&db, &format!("key-{n:04}"), &format!("value-{n}"));
    }

    let entries = scan_all(&db);
    assert_eq!(entries.len(), 1100);
    for (index, (key, value)) in entries.iter().enumerate() {
        assert_eq!(key, &format!("key-{index:04}"));
        assert_eq!(value, &format!("value-{index}"));
    }
}
