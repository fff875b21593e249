//! Guard accounting invariants under sustained write load.

use pretty_assertions::assert_eq;

use rand::prelude::*;
use rand::rngs::StdRng;

use cairndb::DB;

mod common;
use common::{get, put, small_buffer_options};

/// Assert that every file at every level is accounted to exactly one partition.
fn assert_guard_file_accounting(db: &DB) {
    for level in 0..7 {
        let total: usize = db
            .get_property(&format!("num-files-at-level{level}"))
            .unwrap()
            .parse()
            .unwrap();
        let in_guards: usize = db
            .get_property(&format!("num-guard-files-at-level{level}"))
            .unwrap()
            .parse()
            .unwrap();
        let in_sentinel: usize = db
            .get_property(&format!("num-sentinel-files-at-level{level}"))
            .unwrap()
            .parse()
            .unwrap();

        assert_eq!(
            in_guards + in_sentinel,
            total,
            "Files at level {level} must split exactly between guards and the sentinel."
        );
    }
}

/// The committed guard counts per level.
fn guard_counts(db: &DB) -> Vec<usize> {
    (0..7)
        .map(|level| {
            db.get_property(&format!("num-guards-at-level{level}"))
                .unwrap()
                .parse()
                .unwrap()
        })
        .collect()
}

#[test]
fn guard_and_sentinel_files_account_for_every_table_file() {
    common::setup();
    let options = small_buffer_options(16 * 1024);

    {
        let db = DB::open(options.clone()).unwrap();
        for n in 0..100_000_u64 {
            put(&db, &format!("{n:08}"), "v");
        }
        assert_guard_file_accounting(&db);
        db.close().unwrap();
    }

    // The accounting must also hold on the recovered state
    let db = DB::open(options).unwrap();
    assert_guard_file_accounting(&db);

    // And keep holding after further randomized churn
    let mut rng = StdRng::seed_from_u64(0x0ca1_8d0b);
    for _ in 0..20_000 {
        let n: u64 = rng.gen_range(0..150_000);
        put(&db, &format!("{n:08}"), "v2");
    }
    assert_guard_file_accounting(&db);
}

#[test]
fn committed_guards_nest_downward() {
    common::setup();
    let db = DB::open(small_buffer_options(8 * 1024)).unwrap();

    for n in 0..30_000_u64 {
        put(&db, &format!("{n:08}"), "v");
    }
    db.compact_range(None, None).unwrap();

    let details_per_level: Vec<String> = (0..7)
        .map(|level| {
            db.get_property(&format!("guard-details-at-level{level}"))
                .unwrap()
        })
        .collect();

    // Every guard key committed at a level must appear at every deeper level
    for level in 0..6 {
        for line in details_per_level[level].lines() {
            let guard_name = line.split(':').next().unwrap();
            for deeper in (level + 1)..7 {
                assert!(
                    details_per_level[deeper]
                        .lines()
                        .any(|deeper_line| deeper_line.starts_with(guard_name)),
                    "{guard_name} committed at level {level} is missing from level {deeper}."
                );
            }
        }
    }
}

#[test]
fn data_is_intact_after_heavy_guard_churn() {
    common::setup();
    let options = small_buffer_options(16 * 1024);
    let db = DB::open(options.clone()).unwrap();

    for n in 0..50_000_u64 {
        put(&db, &format!("{n:08}"), &format!("value-{n}"));
    }
    db.compact_range(None, None).unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..200 {
        let n: u64 = rng.gen_range(0..50_000);
        assert_eq!(
            get(&db, &format!("{n:08}")),
            Some(format!("value-{n}")),
            "Key {n:08} must survive flushes and compactions."
        );
    }
    assert_guard_file_accounting(&db);
    assert!(
        guard_counts(&db).iter().sum::<usize>() > 0,
        "A data set this large should have committed at least one guard."
    );
}
