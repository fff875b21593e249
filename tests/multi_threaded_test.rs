//! Concurrent readers and writers against one database instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use cairndb::{CairnDBError, ReadOptions, WriteOptions, DB};

mod common;

const NUM_WRITER_THREADS: usize = 4;
const KEYS_PER_THREAD: u64 = 500;
const ROUNDS: u64 = 4;

/// The value written for a given thread, key and round.
fn test_value(thread_id: usize, key_number: u64, round: u64) -> String {
    // Padded so that flushes and compactions actually trigger during the test
    format!("{thread_id}.{key_number}.{round:<200}")
}

#[test]
fn concurrent_writers_and_readers_stay_consistent() {
    common::setup();
    let db = Arc::new(DB::open(common::small_buffer_options(32 * 1024)).unwrap());
    let rounds_completed: Arc<Vec<AtomicU64>> = Arc::new(
        (0..NUM_WRITER_THREADS)
            .map(|_| AtomicU64::new(0))
            .collect(),
    );

    // Writers: each owns a key range and overwrites it round after round
    let mut writer_handles = vec![];
    for thread_id in 0..NUM_WRITER_THREADS {
        let db = Arc::clone(&db);
        let rounds_completed = Arc::clone(&rounds_completed);
        writer_handles.push(
            thread::Builder::new()
                .name(format!("writer-{thread_id}"))
                .spawn(move || {
                    for round in 0..ROUNDS {
                        for key_number in 0..KEYS_PER_THREAD {
                            let key = format!("t{thread_id}-k{key_number:05}");
                            db.put(
                                WriteOptions::default(),
                                key.into_bytes(),
                                test_value(thread_id, key_number, round).into_bytes(),
                            )
                            .expect("Concurrent puts should succeed.");
                        }
                        rounds_completed[thread_id].store(round + 1, Ordering::Release);
                    }
                })
                .unwrap(),
        );
    }

    // Readers: continuously validate that any value read is one a writer actually wrote and
    // is no older than the writer's last completed round
    let mut reader_handles = vec![];
    for reader_id in 0..2 {
        let db = Arc::clone(&db);
        let rounds_completed = Arc::clone(&rounds_completed);
        reader_handles.push(
            thread::Builder::new()
                .name(format!("reader-{reader_id}"))
                .spawn(move || {
                    let mut reads: u64 = 0;
                    while rounds_completed
                        .iter()
                        .any(|progress| progress.load(Ordering::Acquire) < ROUNDS)
                    {
                        let thread_id = (reads as usize) % NUM_WRITER_THREADS;
                        let key_number = reads % KEYS_PER_THREAD;
                        let key = format!("t{thread_id}-k{key_number:05}");
                        let completed_before_read =
                            rounds_completed[thread_id].load(Ordering::Acquire);

                        match db.get(ReadOptions::default(), key.as_bytes()) {
                            Ok(raw_value) => {
                                let value = String::from_utf8(raw_value).unwrap();
                                let mut parts = value.splitn(3, '.');
                                let stored_thread: usize =
                                    parts.next().unwrap().parse().unwrap();
                                let stored_key: u64 = parts.next().unwrap().parse().unwrap();
                                let stored_round: u64 =
                                    parts.next().unwrap().trim_end().parse().unwrap();

                                assert_eq!(stored_thread, thread_id);
                                assert_eq!(stored_key, key_number);
                                assert!(
                                    stored_round + 1 >= completed_before_read,
                                    "Read round {stored_round} for {key} but the writer had \
                                    already completed round {completed_before_read}."
                                );
                            }
                            Err(CairnDBError::KeyNotFound) => {
                                // The writer has not reached this key yet
                                assert_eq!(
                                    completed_before_read, 0,
                                    "{key} must exist once its writer finished a round."
                                );
                            }
                            Err(other) => panic!("Unexpected read error: {other}"),
                        }

                        reads += 1;
                    }
                })
                .unwrap(),
        );
    }

    for handle in writer_handles {
        handle.join().expect("A writer thread panicked.");
    }
    for handle in reader_handles {
        handle.join().expect("A reader thread panicked.");
    }

    // Final state: every key holds its last round's value
    for thread_id in 0..NUM_WRITER_THREADS {
        for key_number in 0..KEYS_PER_THREAD {
            let key = format!("t{thread_id}-k{key_number:05}");
            let value = db
                .get(ReadOptions::default(), key.as_bytes())
                .expect("Every written key must be present at the end.");
            assert_eq!(
                String::from_utf8(value).unwrap(),
                test_value(thread_id, key_number, ROUNDS - 1)
            );
        }
    }
}

#[test]
fn concurrent_batches_apply_atomically() {
    common::setup();
    let db = Arc::new(DB::open(common::memory_options()).unwrap());

    // Each thread repeatedly writes a batch setting both halves of a pair to the same value;
    // readers must never observe a torn pair
    let mut handles = vec![];
    for thread_id in 0..3_usize {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            for iteration in 0..300_u32 {
                let stamp = format!("{thread_id}-{iteration}");
                let mut batch = cairndb::Batch::new();
                batch.add_put(b"pair-left".to_vec(), stamp.clone().into_bytes());
                batch.add_put(b"pair-right".to_vec(), stamp.into_bytes());
                db.write(WriteOptions::default(), batch).unwrap();

                let snapshot = db.get_snapshot();
                let read_options = ReadOptions {
                    snapshot: Some(snapshot.clone()),
                    ..ReadOptions::default()
                };
                let left = db.get(read_options.clone(), b"pair-left").unwrap();
                let right = db.get(read_options, b"pair-right").unwrap();
                assert_eq!(
                    left, right,
                    "A snapshot must never observe a half-applied batch."
                );
                db.release_snapshot(snapshot);
            }
        }));
    }

    for handle in handles {
        handle.join().expect("A batch writer thread panicked.");
    }
}
