//! End-to-end tests for the public store API

use std::collections::BTreeMap;
use tempfile::TempDir;
use wisckv::{KvStore, Options};

fn open_store(temp_dir: &TempDir, options: Options) -> KvStore {
    KvStore::open(temp_dir.path().join("db"), temp_dir.path().join("db.vlog"), options).unwrap()
}

#[test]
fn test_thousand_keys_scan_delete_reset() {
    env_logger::try_init().ok();

    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir, Options::default().sync_writes(false));

    for key in 0..1000u64 {
        store.put(key, key.to_string().as_bytes()).unwrap();
    }

    let pairs = store.scan(900, 910).unwrap();
    let expected: Vec<(u64, Vec<u8>)> =
        (900..=910u64).map(|key| (key, key.to_string().into_bytes())).collect();
    assert_eq!(pairs, expected);

    for key in (1..1000u64).step_by(2) {
        assert!(store.delete(key).unwrap(), "key {} should have existed", key);
    }
    for key in 0..1000u64 {
        let value = store.get(key).unwrap();
        if key % 2 == 1 {
            assert_eq!(value, None, "odd key {} should be gone", key);
        } else {
            assert_eq!(value, Some(key.to_string().into_bytes()));
        }
    }

    store.reset().unwrap();
    assert_eq!(store.get(0).unwrap(), None);
    assert_eq!(store.level_count(), 0);
    assert_eq!(store.file_count(), 0);
    assert!(store.scan(0, u64::MAX).unwrap().is_empty());

    // usable again after reset
    store.put(5, b"again").unwrap();
    assert_eq!(store.get(5).unwrap(), Some(b"again".to_vec()));
}

#[test]
fn test_last_write_wins_across_flushes() {
    env_logger::try_init().ok();

    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir, Options::default().max_key_number(8).sync_writes(false));

    let mut model = BTreeMap::new();
    for round in 0..20u64 {
        for key in 0..30u64 {
            if (key + round) % 5 == 0 {
                store.delete(key).unwrap();
                model.remove(&key);
            } else if (key * round) % 3 == 0 {
                let value = format!("{}-{}", key, round).into_bytes();
                store.put(key, &value).unwrap();
                model.insert(key, value);
            }
        }
    }

    for key in 0..30u64 {
        assert_eq!(store.get(key).unwrap(), model.get(&key).cloned(), "key {}", key);
    }
    let scanned: BTreeMap<u64, Vec<u8>> = store.scan(0, 29).unwrap().into_iter().collect();
    assert_eq!(scanned, model);
}

#[test]
fn test_scan_is_strictly_ascending() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir, Options::default().max_key_number(16).sync_writes(false));

    for key in (0..200u64).rev() {
        store.put(key * 3, b"v").unwrap();
    }
    store.put(30, b"updated").unwrap();

    let pairs = store.scan(10, 100).unwrap();
    assert!(pairs.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(pairs.first().map(|p| p.0), Some(12));
    assert_eq!(pairs.last().map(|p| p.0), Some(99));
    assert!(pairs.contains(&(30, b"updated".to_vec())));
}

#[test]
fn test_scan_bounds() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir, Options::default().sync_writes(false));

    store.put(0, b"min").unwrap();
    store.put(u64::MAX, b"max").unwrap();
    store.flush().unwrap();

    assert_eq!(store.scan(0, 0).unwrap(), vec![(0, b"min".to_vec())]);
    assert_eq!(store.scan(u64::MAX, u64::MAX).unwrap(), vec![(u64::MAX, b"max".to_vec())]);
    assert_eq!(store.scan(0, u64::MAX).unwrap().len(), 2);
    assert!(store.scan(1, 0).unwrap().is_empty());
}

#[test]
fn test_large_values() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir, Options::default().max_key_number(4).sync_writes(false));

    let big = vec![0xFFu8; 256 * 1024];
    store.put(1, &big).unwrap();
    for key in 2..10u64 {
        store.put(key, &vec![key as u8; 1000]).unwrap();
    }

    assert_eq!(store.get(1).unwrap(), Some(big));
    assert_eq!(store.get(9).unwrap(), Some(vec![9u8; 1000]));
}

#[test]
fn test_close_persists_memtable() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = open_store(&temp_dir, Options::default().sync_writes(false));
        store.put(42, b"answer").unwrap();
        store.close().unwrap();
    }

    let store = open_store(&temp_dir, Options::default().sync_writes(false));
    assert_eq!(store.get(42).unwrap(), Some(b"answer".to_vec()));
    assert_eq!(store.file_count(), 1);
}

#[test]
fn test_concurrent_callers_are_serialized() {
    use std::sync::Arc;
    use std::thread;

    let temp_dir = TempDir::new().unwrap();
    let store =
        Arc::new(open_store(&temp_dir, Options::default().max_key_number(32).sync_writes(false)));

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..100u64 {
                    let key = t * 1000 + i;
                    store.put(key, key.to_string().as_bytes()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..4u64 {
        for i in 0..100u64 {
            let key = t * 1000 + i;
            assert_eq!(store.get(key).unwrap(), Some(key.to_string().into_bytes()));
        }
    }
}
