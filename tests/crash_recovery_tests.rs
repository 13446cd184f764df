// Crash Recovery Tests for WiscKV
// These tests verify data consistency after simulated crashes

use std::fs;
use std::path::Path;
use tempfile::TempDir;
use wisckv::compaction::journal::{CompactionRecord, StagedOutput, JOURNAL_FILE};
use wisckv::compaction::LevelManager;
use wisckv::sstable::{SSTable, SSTableBuilder, SSTableContent, SSTableEntry};
use wisckv::vlog::{ValueLog, RECORD_HEADER_SIZE};
use wisckv::{KvStore, Options};

/// Helper function to simulate a crash by dropping the store without proper close
/// Uses mem::forget to prevent Drop from running (simulates abrupt termination)
fn simulate_crash(store: KvStore) {
    std::mem::forget(store);
}

fn options() -> Options {
    Options::default().max_key_number(8)
}

fn content(generation: u64, keys: &[u64]) -> SSTableContent {
    let mut builder = SSTableBuilder::new(generation, 408);
    for &key in keys {
        builder.add(SSTableEntry { key, offset: generation * 100 + key, length: 1 }).unwrap();
    }
    builder.finish()
}

fn write_table(path: &Path, content: SSTableContent) {
    SSTable::create(path).write(content, true).unwrap();
}

/// Test that flushed data survives a crash
#[test]
fn test_recovery_after_crash_keeps_flushed_data() {
    env_logger::try_init().ok();

    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("db");
    let vlog = temp_dir.path().join("db.vlog");

    // First session: write data and simulate crash
    {
        let store = KvStore::open(&dir, &vlog, options()).unwrap();
        for key in 0..100u64 {
            store.put(key, format!("value_{}", key).as_bytes()).unwrap();
        }
        store.flush().unwrap();
        simulate_crash(store);
    }

    // Second session: recover and verify
    {
        let store = KvStore::open(&dir, &vlog, options()).unwrap();
        for key in 0..100u64 {
            assert_eq!(store.get(key).unwrap(), Some(format!("value_{}", key).into_bytes()));
        }

        // writes continue after the recovered generations
        store.put(5, b"after crash").unwrap();
        store.flush().unwrap();
        assert_eq!(store.get(5).unwrap(), Some(b"after crash".to_vec()));
    }
}

/// Unflushed MemTable contents are not logged anywhere and vanish with a crash
#[test]
fn test_unflushed_writes_lost_on_crash() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("db");
    let vlog = temp_dir.path().join("db.vlog");

    {
        let store = KvStore::open(&dir, &vlog, options()).unwrap();
        store.put(1, b"durable").unwrap();
        store.flush().unwrap();
        store.put(2, b"volatile").unwrap();
        simulate_crash(store);
    }

    let store = KvStore::open(&dir, &vlog, options()).unwrap();
    assert_eq!(store.get(1).unwrap(), Some(b"durable".to_vec()));
    assert_eq!(store.get(2).unwrap(), None);
}

/// A committed compaction journal is rolled forward on open
#[test]
fn test_interrupted_compaction_rolls_forward() {
    env_logger::try_init().ok();

    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    fs::create_dir_all(dir.join("level-0")).unwrap();
    fs::create_dir_all(dir.join("level-1")).unwrap();

    write_table(&dir.join("level-0/a.sst"), content(1, &[1, 2]));
    write_table(&dir.join("level-0/b.sst"), content(2, &[9]));
    write_table(&dir.join("level-1/old.sst"), content(0, &[2, 3]));
    write_table(&dir.join("level-1/merged.tmp"), content(1, &[1, 2, 3]));

    let record = CompactionRecord {
        inputs: vec!["level-0/a.sst".into(), "level-1/old.sst".into()],
        outputs: vec![StagedOutput {
            staged: "level-1/merged.tmp".into(),
            target: "level-1/merged.sst".into(),
        }],
    };
    record.commit(dir, true).unwrap();
    // crash after the first rename already happened
    fs::rename(dir.join("level-1/merged.tmp"), dir.join("level-1/merged.sst")).unwrap();

    let manager = LevelManager::open(dir, &options()).unwrap();
    assert!(!dir.join(JOURNAL_FILE).exists());
    assert_eq!(manager.level_files(0).len(), 1);
    assert_eq!(manager.level_files(1).len(), 1);
    assert_eq!(manager.level_files(1)[0].path(), dir.join("level-1/merged.sst"));
    assert_eq!(manager.find(2).unwrap().unwrap().offset, 102);
    assert_eq!(manager.find(3).unwrap().unwrap().offset, 103);
    assert_eq!(manager.find(9).unwrap().unwrap().offset, 209);
}

/// Staged outputs without a journal never committed and are discarded
#[test]
fn test_uncommitted_compaction_rolls_back() {
    env_logger::try_init().ok();

    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    fs::create_dir_all(dir.join("level-0")).unwrap();
    fs::create_dir_all(dir.join("level-1")).unwrap();

    write_table(&dir.join("level-0/a.sst"), content(1, &[1, 2]));
    write_table(&dir.join("level-1/old.sst"), content(0, &[2, 3]));
    write_table(&dir.join("level-1/partial.tmp"), content(1, &[1, 2, 3]));

    let manager = LevelManager::open(dir, &options()).unwrap();
    assert!(!dir.join("level-1/partial.tmp").exists());
    assert_eq!(manager.file_count(), 2);
    assert_eq!(manager.find(2).unwrap().unwrap().offset, 102);
    assert_eq!(manager.find(3).unwrap().unwrap().offset, 3);
}

/// A malformed table is a fatal open error
#[test]
fn test_truncated_table_fails_open() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    fs::create_dir_all(dir.join("level-0")).unwrap();

    let path = dir.join("level-0/a.sst");
    write_table(&path, content(0, &[1, 2, 3]));
    let data = fs::read(&path).unwrap();
    fs::write(&path, &data[..data.len() - 5]).unwrap();

    let err = LevelManager::open(dir, &options()).err().unwrap();
    assert!(err.is_corruption());
}

/// The value log tail is rediscovered after its prefix was reclaimed
#[test]
fn test_vlog_tail_recovered_after_reclaimed_prefix() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("values.vlog");

    let mut offsets = Vec::new();
    {
        let mut vlog = ValueLog::open(&path, 100, true).unwrap();
        for key in 0..50u64 {
            offsets.push(vlog.append(key, format!("payload-{}", key).as_bytes()).unwrap());
        }
        vlog.flush().unwrap();
    }

    // zero the first 20 records as garbage collection would
    let boundary = offsets[20];
    let mut data = fs::read(&path).unwrap();
    data[..boundary as usize].fill(0);
    fs::write(&path, &data).unwrap();

    let mut vlog = ValueLog::open(&path, 100, true).unwrap();
    assert_eq!(vlog.tail(), boundary);
    assert_eq!(vlog.head(), data.len() as u64);
    assert_eq!(vlog.get(offsets[20], 10).unwrap(), b"payload-20");
    assert!(vlog.get(offsets[0], 9).is_err());
}

/// A record torn by a crash does not hide the records before it
#[test]
fn test_vlog_torn_record() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("values.vlog");
    {
        let mut vlog = ValueLog::open(&path, 1000, true).unwrap();
        vlog.append(1, b"complete").unwrap();
        vlog.append(2, b"torn-record").unwrap();
        vlog.flush().unwrap();
    }
    let data = fs::read(&path).unwrap();
    fs::write(&path, &data[..data.len() - 4]).unwrap();

    let mut vlog = ValueLog::open(&path, 1000, true).unwrap();
    assert_eq!(vlog.tail(), 0);
    assert_eq!(vlog.get(0, 8).unwrap(), b"complete");
    assert!(vlog.get((RECORD_HEADER_SIZE + 8) as u64, 11).unwrap_err().is_corruption());
}

/// A journal torn mid-write is ignored and its staged files removed
#[test]
fn test_torn_journal_rolls_back() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    fs::create_dir_all(dir.join("level-0")).unwrap();
    fs::create_dir_all(dir.join("level-1")).unwrap();
    write_table(&dir.join("level-0/a.sst"), content(1, &[1]));
    write_table(&dir.join("level-1/out.tmp"), content(1, &[1]));
    fs::write(dir.join(JOURNAL_FILE), b"{\"inputs\":[\"level-0/a.s").unwrap();

    let manager = LevelManager::open(dir, &options()).unwrap();
    assert!(!dir.join(JOURNAL_FILE).exists());
    assert!(!dir.join("level-1/out.tmp").exists());
    assert_eq!(manager.level_files(0).len(), 1);
    assert!(manager.level_files(1).is_empty());
}

/// A record torn by a crash mid-flush must not stall later garbage collection
#[test]
fn test_gc_passes_over_torn_record() {
    env_logger::try_init().ok();

    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("db");
    let vlog = temp_dir.path().join("db.vlog");
    let options = Options::default().sync_writes(false);

    {
        let store = KvStore::open(&dir, &vlog, options.clone()).unwrap();
        for key in 0..20u64 {
            store.put(key, format!("first_{}", key).as_bytes()).unwrap();
        }
        store.flush().unwrap();
    }

    // header promising 100 value bytes, only 10 of them written
    let mut torn = vec![0xFFu8];
    torn.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
    torn.extend_from_slice(&7u64.to_le_bytes());
    torn.extend_from_slice(&100u32.to_le_bytes());
    torn.extend_from_slice(&[0u8; 10]);
    let mut data = fs::read(&vlog).unwrap();
    data.extend_from_slice(&torn);
    fs::write(&vlog, &data).unwrap();

    let store = KvStore::open(&dir, &vlog, options).unwrap();
    for key in 100..290u64 {
        store.put(key, format!("second_{}", key).as_bytes()).unwrap();
    }
    store.flush().unwrap();

    for _ in 0..3 {
        store.gc(1_000_000).unwrap();
    }
    for key in 0..20u64 {
        assert_eq!(store.get(key).unwrap(), Some(format!("first_{}", key).into_bytes()));
    }
    for key in 100..290u64 {
        assert_eq!(store.get(key).unwrap(), Some(format!("second_{}", key).into_bytes()));
    }
}
