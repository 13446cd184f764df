//! # WiscKV - A Key-Value Separated LSM-Tree Storage Engine
//!
//! WiscKV is a persistent key-value storage engine that keeps keys in a leveled
//! LSM-tree and values in a separate append-only value log. Compaction only moves
//! small index entries around; values are written once and reclaimed by garbage
//! collection.
//!
//! ## Architecture
//!
//! The storage engine consists of several key components:
//!
//! - **MemTable**: In-memory skip list for recent writes, with a bloom filter
//! - **SSTable**: Immutable fixed-layout files mapping keys to value locations
//! - **Value Log**: Append-only file holding the values themselves
//! - **Compaction**: Leveled merging that keeps deeper levels non-overlapping
//! - **Bloom Filter**: Speeds up key lookups in MemTable and SSTables
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use wisckv::{KvStore, Options};
//!
//! # fn main() -> Result<(), wisckv::Error> {
//! // Open or create a store
//! let store = KvStore::open("./data", "./data/values.vlog", Options::default())?;
//!
//! // Write operations
//! store.put(1, b"value1")?;
//! store.put(2, b"value2")?;
//!
//! // Read operations
//! if let Some(value) = store.get(1)? {
//!     println!("Found: {:?}", value);
//! }
//!
//! // Range scan and delete
//! let pairs = store.scan(1, 10)?;
//! assert_eq!(pairs.len(), 2);
//! store.delete(1)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod compaction;
pub mod config;
pub mod error;
pub mod filter;
pub mod memtable;
pub mod sstable;
pub mod types;
pub mod vlog;

// Re-exports
pub use config::Options;
pub use error::{Error, Result};
pub use types::{Key, Value};

use compaction::LevelManager;
use log::{debug, error, info};
use memtable::MemTable;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use types::{is_tombstone, TOMBSTONE};
use vlog::ValueLog;

/// Engine state guarded by the store's lock
struct Engine {
    memtable: MemTable,
    levels: LevelManager,
    vlog: ValueLog,
}

impl Engine {
    fn put(&mut self, key: Key, value: Value) -> Result<()> {
        // a flush that failed earlier left the table full
        if self.memtable.is_full() && !self.memtable.contains(key) {
            self.flush()?;
        }
        if !self.memtable.insert(key, value) {
            self.flush()?;
        }
        Ok(())
    }

    fn get(&mut self, key: Key) -> Result<Option<Value>> {
        if let Some(value) = self.memtable.get(key) {
            return Ok((!is_tombstone(value)).then(|| value.clone()));
        }

        match self.levels.find(key)? {
            Some(entry) if !entry.is_tombstone() => {
                Ok(Some(self.vlog.get(entry.offset, entry.length)?))
            }
            _ => Ok(None),
        }
    }

    /// Whether `key` has a live value, decided from the index alone
    fn contains(&self, key: Key) -> Result<bool> {
        if let Some(value) = self.memtable.get(key) {
            return Ok(!is_tombstone(value));
        }
        Ok(self.levels.find(key)?.is_some_and(|entry| !entry.is_tombstone()))
    }

    fn flush(&mut self) -> Result<()> {
        if self.memtable.is_empty() {
            return Ok(());
        }

        let generation = self.memtable.generation();
        let count = self.memtable.len();
        let content = self.memtable.get_content(&mut self.vlog)?;
        // values must be durable before any table points at them
        self.vlog.flush()?;
        self.levels.write_into_sstable_file(content)?;

        self.memtable.set_generation(generation + 1);
        self.memtable.clear();
        info!("Flushed MemTable generation {} ({} keys)", generation, count);
        Ok(())
    }
}

/// The main store handle.
///
/// This is the primary interface for interacting with the storage engine.
/// All operations are serialized: one caller at a time runs to completion.
///
/// # Thread Safety
///
/// `KvStore` can be shared across threads using `Arc<KvStore>`; calls are
/// executed one after another behind an internal lock.
pub struct KvStore {
    /// Table directory path
    dir: PathBuf,

    /// Configuration options
    options: Options,

    /// MemTable, levels and value log
    engine: Mutex<Engine>,
}

impl KvStore {
    /// Opens a store keeping tables under `dir` and values in `vlog_path`.
    ///
    /// Interrupted compactions are finished, the value log tail is recovered and
    /// the next MemTable continues after the newest generation on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The options are invalid
    /// - The directory is missing and `create_if_missing` is off
    /// - A table file is malformed
    /// - Any file operation fails
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use wisckv::{KvStore, Options};
    ///
    /// # fn main() -> Result<(), wisckv::Error> {
    /// let store = KvStore::open("./tables", "./values.vlog", Options::default())?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(
        dir: P,
        vlog_path: Q,
        options: Options,
    ) -> Result<Self> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();
        info!("Opening store at {:?}", dir);

        let levels = LevelManager::open(&dir, &options)?;
        let vlog = ValueLog::open(vlog_path, options.vlog_scan_chunk, options.sync_writes)?;
        let generation = levels.max_generation().map_or(0, |g| g + 1);
        let memtable =
            MemTable::new(generation, options.max_key_number, options.skiplist_probability);

        info!(
            "Store opened: {} levels, {} tables, next generation {}",
            levels.level_count(),
            levels.file_count(),
            generation
        );
        Ok(Self { dir, options, engine: Mutex::new(Engine { memtable, levels, vlog }) })
    }

    /// Stores `value` under `key`.
    ///
    /// An empty value or the tombstone sentinel is stored as a deletion.
    pub fn put(&self, key: Key, value: &[u8]) -> Result<()> {
        let value = if is_tombstone(value) { TOMBSTONE.to_vec() } else { value.to_vec() };
        self.engine.lock().put(key, value)
    }

    /// Retrieves the value of `key`, `None` if absent or deleted.
    pub fn get(&self, key: Key) -> Result<Option<Value>> {
        self.engine.lock().get(key)
    }

    /// Deletes `key`.
    ///
    /// Returns `false` without writing anything if the key is not visible.
    pub fn delete(&self, key: Key) -> Result<bool> {
        let mut engine = self.engine.lock();
        if !engine.contains(key)? {
            return Ok(false);
        }
        engine.put(key, TOMBSTONE.to_vec())?;
        Ok(true)
    }

    /// Returns the live pairs with keys in `[low, high]` in ascending key order.
    pub fn scan(&self, low: Key, high: Key) -> Result<Vec<(Key, Value)>> {
        if low > high {
            return Ok(Vec::new());
        }

        let mut engine = self.engine.lock();
        let mut merged = BTreeMap::new();
        engine.memtable.scan(low, high, &mut merged);

        for (key, entry) in engine.levels.scan(low, high)? {
            if merged.contains_key(&key) {
                continue;
            }
            let value = if entry.is_tombstone() {
                TOMBSTONE.to_vec()
            } else {
                engine.vlog.get(entry.offset, entry.length)?
            };
            merged.insert(key, value);
        }

        Ok(merged.into_iter().filter(|(_, value)| !is_tombstone(value)).collect())
    }

    /// Deletes every table and value, leaving an empty store.
    pub fn reset(&self) -> Result<()> {
        let mut engine = self.engine.lock();
        engine.memtable.clear();
        engine.memtable.set_generation(0);
        engine.levels.clear()?;
        engine.vlog.clear()?;
        info!("Store at {:?} reset", self.dir);
        Ok(())
    }

    /// Writes the MemTable out as a level 0 table, even if it is not full.
    pub fn flush(&self) -> Result<()> {
        self.engine.lock().flush()
    }

    /// Runs one garbage collection pass over at least `min_bytes` of the value log.
    ///
    /// Records still referenced by the newest table entry of their key are written
    /// again through [`KvStore::put`]; the store is flushed and only then the scanned
    /// span is reclaimed. Returns the number of records that were kept alive.
    pub fn gc(&self, min_bytes: u64) -> Result<usize> {
        let mut engine = self.engine.lock();
        let candidates = engine.vlog.gc_candidates(min_bytes)?;
        let scanned = candidates.len();

        let mut reinserted = 0;
        for (record, offset) in candidates {
            if engine.memtable.contains(record.key) {
                continue;
            }
            let live = matches!(
                engine.levels.find(record.key)?,
                Some(entry) if !entry.is_tombstone() && entry.offset == offset
            );
            if live {
                debug!("Re-inserting key {} from value log offset {}", record.key, offset);
                engine.put(record.key, record.value)?;
                reinserted += 1;
            }
        }

        engine.flush()?;
        engine.vlog.garbage_collection()?;
        info!("GC scanned {} records, re-inserted {}", scanned, reinserted);
        Ok(reinserted)
    }

    /// Number of levels on disk
    pub fn level_count(&self) -> usize {
        self.engine.lock().levels.level_count()
    }

    /// Number of tables on disk
    pub fn file_count(&self) -> usize {
        self.engine.lock().levels.file_count()
    }

    /// Table directory
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Options the store was opened with
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Flushes the MemTable and closes the store.
    pub fn close(self) -> Result<()> {
        self.flush()
    }
}

impl Drop for KvStore {
    fn drop(&mut self) {
        // Ignore errors during drop as we can't propagate them
        if let Err(e) = self.engine.get_mut().flush() {
            error!("Error flushing store during drop: {}", e);
        }
    }
}
