//! # MemTable - In-Memory Sorted Table
//!
//! The MemTable is an in-memory data structure that stores recent writes.
//! It uses a SkipList for ordered storage and a bloom filter to answer misses
//! without walking the list.
//!
//! ## Design
//!
//! - Holds at most `max_key_number` distinct keys, exactly one SSTable worth
//! - Deletes are stored as the tombstone value
//! - `insert` reports when the table is full so the owner can flush it
//! - Flushing appends live values to the value log and produces the table content
//!   that points at them

pub mod skiplist;

pub use skiplist::SkipList;

use crate::error::Result;
use crate::filter::{BloomFilter, Filter};
use crate::sstable::{new_table_filter, SSTableBuilder, SSTableContent, SSTableEntry};
use crate::types::{is_tombstone, Key, Locator, Value, TOMBSTONE};
use crate::vlog::ValueLog;
use log::debug;
use std::collections::BTreeMap;

/// MemTable stores recent writes in memory using a SkipList.
///
/// # Example
///
/// ```rust
/// use wisckv::memtable::MemTable;
///
/// let mut memtable = MemTable::new(0, 408, 0.5);
/// assert!(memtable.insert(1, b"value".to_vec()));
/// assert_eq!(memtable.get(1), Some(&b"value".to_vec()));
/// ```
pub struct MemTable {
    /// Ordered key -> value storage
    index: SkipList,

    /// Every key ever inserted since the last clear
    filter: BloomFilter,

    /// Generation the table will carry once flushed
    generation: u64,

    /// Maximum number of distinct keys
    max_key_number: usize,
}

impl MemTable {
    /// Creates a new empty MemTable.
    ///
    /// # Arguments
    ///
    /// * `generation` - Generation of the SSTable this MemTable becomes
    /// * `max_key_number` - Distinct key capacity
    /// * `probability` - Skip list promotion probability
    pub fn new(generation: u64, max_key_number: usize, probability: f64) -> Self {
        assert!(max_key_number > 0, "MemTable capacity must be positive");
        Self {
            index: SkipList::new(probability),
            filter: new_table_filter(),
            generation,
            max_key_number,
        }
    }

    /// Inserts or overwrites `key`.
    ///
    /// Returns `false` once the table holds `max_key_number` distinct keys and must be
    /// flushed before the next new key arrives.
    ///
    /// # Panics
    ///
    /// Panics if `key` is new while the table is already full.
    pub fn insert(&mut self, key: Key, value: Value) -> bool {
        if self.index.len() >= self.max_key_number && self.index.get(key).is_none() {
            panic!(
                "MemTable full ({} keys), flush before inserting key {}",
                self.max_key_number, key
            );
        }

        self.index.put(key, value);
        self.filter.insert(key);
        self.index.len() < self.max_key_number
    }

    /// Marks a key as deleted by inserting a tombstone.
    ///
    /// Same capacity signal as [`MemTable::insert`].
    pub fn remove(&mut self, key: Key) -> bool {
        self.insert(key, TOMBSTONE.to_vec())
    }

    /// Retrieves the value stored for a key, tombstones included.
    pub fn get(&self, key: Key) -> Option<&Value> {
        if !self.filter.query(key) {
            return None;
        }
        self.index.get(key)
    }

    /// Whether `key` has an entry here, tombstones included.
    pub fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    /// Collects entries with keys in `[low, high]` into `out`.
    ///
    /// Keys already present in `out` keep their value, so callers fill the map from
    /// the newest source to the oldest.
    pub fn scan(&self, low: Key, high: Key, out: &mut BTreeMap<Key, Value>) {
        if low > high {
            return;
        }
        for (key, value) in self.index.iter_from(low) {
            if key > high {
                break;
            }
            out.entry(key).or_insert_with(|| value.clone());
        }
    }

    /// Serializes the table into SSTable content.
    ///
    /// Live values are appended to `vlog` and their locators recorded; tombstones get
    /// a zero locator. The caller must flush `vlog` before writing the content.
    ///
    /// # Panics
    ///
    /// Panics if the table is empty.
    pub fn get_content(&self, vlog: &mut ValueLog) -> Result<SSTableContent> {
        assert!(!self.is_empty(), "cannot build an SSTable from an empty MemTable");

        let mut builder = SSTableBuilder::new(self.generation, self.max_key_number);
        let mut live = 0usize;
        for (key, value) in self.index.iter() {
            let locator = if is_tombstone(value) {
                Locator::tombstone()
            } else {
                live += 1;
                Locator::new(vlog.append(key, value)?, value.len() as u32)
            };
            builder.add(SSTableEntry::new(key, locator))?;
        }

        debug!(
            "MemTable generation {}: {} entries, {} values appended",
            self.generation,
            builder.len(),
            live
        );
        Ok(builder.finish())
    }

    /// Drops every entry and resets the filter.
    pub fn clear(&mut self) {
        self.index.clear();
        self.filter.clear();
    }

    /// Generation the table carries.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Sets the generation.
    pub fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    /// Returns the number of distinct keys.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if the MemTable is empty.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Whether the next new key would overflow the table.
    pub fn is_full(&self) -> bool {
        self.index.len() >= self.max_key_number
    }
}
