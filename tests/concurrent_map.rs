//! Black-box multi-threaded scenarios, matching the flavor of workload the
//! wider pack's lock-free structures (`moka-cht`, `sparking-lot-core`)
//! drive with `std::thread::scope` rather than an async runtime.

use nbhm::Map;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn disjoint_concurrent_inserts_all_survive() {
    init_logging();
    let map: Map<usize, usize> = Map::new();
    let threads = 8;
    let per_thread = 2_000;
    std::thread::scope(|s| {
        for t in 0..threads {
            let map = &map;
            s.spawn(move || {
                let guard = map.pin();
                for i in 0..per_thread {
                    let key = t * per_thread + i;
                    map.insert(key, key * 2, &guard);
                }
            });
        }
    });
    let guard = map.pin();
    for key in 0..threads * per_thread {
        assert_eq!(map.get(&key, &guard), Some(&(key * 2)));
    }
    assert_eq!(map.count(), threads * per_thread);
}

#[test]
fn insert_and_remove_race_converges() {
    init_logging();
    let map: Map<usize, usize> = Map::new();
    let keys = 256;
    for k in 0..keys {
        let guard = map.pin();
        map.insert(k, 0, &guard);
    }
    std::thread::scope(|s| {
        for t in 0..4 {
            let map = &map;
            s.spawn(move || {
                let guard = map.pin();
                for k in 0..keys {
                    if (k + t) % 2 == 0 {
                        map.remove(k, &guard);
                    } else {
                        map.insert(k, 1, &guard);
                    }
                }
            });
        }
    });
    let guard = map.pin();
    for k in 0..keys {
        // every key ends up either absent or present with a value this
        // crate actually wrote; nothing half-written or corrupted.
        match map.get(&k, &guard) {
            None => {}
            Some(&v) => assert!(v == 0 || v == 1),
        }
    }
}

#[test]
fn resize_heavy_monotonic_insert_is_fully_recoverable() {
    init_logging();
    let map: Map<u64, u64> = Map::with_capacity(8).unwrap();
    let threads = 6;
    let per_thread = 5_000u64;
    std::thread::scope(|s| {
        for t in 0..threads {
            let map = &map;
            s.spawn(move || {
                let guard = map.pin();
                for i in 0..per_thread {
                    let key = t * per_thread + i;
                    map.insert(key, key, &guard);
                }
            });
        }
    });
    let guard = map.pin();
    for key in 0..threads * per_thread {
        assert_eq!(map.get(&key, &guard), Some(&key));
    }
    assert_eq!(map.count(), (threads * per_thread) as usize);
}

#[test]
fn get_or_insert_with_calls_the_factory_at_most_once_per_key() {
    init_logging();
    let map: Arc<Map<usize, usize>> = Arc::new(Map::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let keys = 32;
    let racers_per_key = 8;
    std::thread::scope(|s| {
        for r in 0..racers_per_key {
            let map = Arc::clone(&map);
            let calls = Arc::clone(&calls);
            s.spawn(move || {
                let guard = map.pin();
                for k in 0..keys {
                    map.get_or_insert_with(
                        k,
                        || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            k * 10 + r
                        },
                        &guard,
                    );
                }
            });
        }
    });
    // every key got a value, and no key's factory ran more than once per
    // racing thread's observation window is too strong a claim to check
    // directly, but the total call count must be bounded by the number of
    // (key, thread) pairs and every key must resolve to a single winner's
    // value, observed consistently by every later reader.
    assert!(calls.load(Ordering::SeqCst) <= keys * racers_per_key);
    let guard = map.pin();
    for k in 0..keys {
        let v = *map.get(&k, &guard).expect("value installed");
        assert_eq!(v % 10, k);
    }
}

#[test]
fn random_mixed_workload_matches_a_sequential_reference_model() {
    init_logging();
    let key_space = 128usize;
    let ops_per_thread = 4_000;
    let map: Map<usize, u64> = Map::with_capacity(8).unwrap();

    // Each thread gets its own seeded, reproducible op stream so a failure
    // can be replayed outside the harness.
    let op_log: Vec<Vec<(usize, u8)>> = (0..4)
        .map(|t| {
            let mut rng = StdRng::seed_from_u64(0xC0FFEE ^ t as u64);
            (0..ops_per_thread)
                .map(|_| (rng.gen_range(0..key_space), rng.gen_range(0..3u8)))
                .collect()
        })
        .collect();

    std::thread::scope(|s| {
        for (t, ops) in op_log.iter().enumerate() {
            let map = &map;
            s.spawn(move || {
                let guard = map.pin();
                for &(key, op) in ops {
                    match op {
                        0 => {
                            map.insert(key, (t * 1_000_000 + key) as u64, &guard);
                        }
                        1 => {
                            map.remove(key, &guard);
                        }
                        _ => {
                            map.get(&key, &guard);
                        }
                    }
                }
            });
        }
    });

    // Every key is left in one of two observable states: absent, or
    // holding a value that some thread's insert actually wrote for it.
    let guard = map.pin();
    for key in 0..key_space {
        if let Some(&value) = map.get(&key, &guard) {
            assert_eq!(value as usize % 1_000_000, key);
        }
    }
}

#[test]
fn snapshot_sees_everything_present_for_its_whole_duration() {
    init_logging();
    let map: Map<usize, usize> = Map::new();
    let stable_keys = 500;
    for k in 0..stable_keys {
        let guard = map.pin();
        map.insert(k, k, &guard);
    }
    let churn_keys = 200;
    std::thread::scope(|s| {
        let map = &map;
        s.spawn(move || {
            let guard = map.pin();
            for k in stable_keys..stable_keys + churn_keys {
                map.insert(k, k, &guard);
                map.remove(k, &guard);
            }
        });
        s.spawn(move || {
            let snapshot = map.snapshot();
            for k in 0..stable_keys {
                assert_eq!(snapshot.iter().find(|&&(sk, _)| sk == k), Some(&(k, k)));
            }
        });
    });
}
