//! SSTable builder implementation.
//!
//! Accumulates sorted index entries and their bloom filter into an [`SSTableContent`].
//! Used both when a MemTable is flushed and when compaction emits merged runs.

use crate::error::{Error, Result};
use crate::filter::{BloomFilter, Filter};
use crate::sstable::format::{SSTableContent, SSTableEntry, SSTableHeader};
use crate::sstable::new_table_filter;
use crate::types::Key;

/// SSTableBuilder collects the payload of one table file.
///
/// Usage:
/// ```
/// use wisckv::sstable::{SSTableBuilder, SSTableEntry};
///
/// let mut builder = SSTableBuilder::new(1, 16);
/// builder.add(SSTableEntry { key: 1, offset: 0, length: 3 }).unwrap();
/// builder.add(SSTableEntry { key: 2, offset: 20, length: 0 }).unwrap();
/// let content = builder.finish();
/// assert_eq!(content.header.count, 2);
/// ```
pub struct SSTableBuilder {
    generation: u64,
    capacity: usize,
    entries: Vec<SSTableEntry>,
    filter: BloomFilter,
    last_key: Option<Key>,
}

impl SSTableBuilder {
    /// Create a builder for a table of `generation` holding at most `capacity` entries
    pub fn new(generation: u64, capacity: usize) -> Self {
        Self {
            generation,
            capacity,
            entries: Vec::with_capacity(capacity),
            filter: new_table_filter(),
            last_key: None,
        }
    }

    /// Add an entry. Keys must be added in strictly ascending order.
    pub fn add(&mut self, entry: SSTableEntry) -> Result<()> {
        if self.is_full() {
            return Err(Error::invalid_state(format!(
                "SSTable already holds {} entries",
                self.capacity
            )));
        }
        if let Some(last) = self.last_key {
            if entry.key <= last {
                return Err(Error::invalid_argument(format!(
                    "Keys must be added in sorted order: {} after {}",
                    entry.key, last
                )));
            }
        }

        self.filter.insert(entry.key);
        self.entries.push(entry);
        self.last_key = Some(entry.key);
        Ok(())
    }

    /// Whether the builder reached its capacity
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Number of entries added so far
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was added
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fill in the header and hand out the finished content
    pub fn finish(self) -> SSTableContent {
        let header = SSTableHeader {
            generation: self.generation,
            count: self.entries.len() as u64,
            min_key: self.entries.first().map_or(0, |e| e.key),
            max_key: self.entries.last().map_or(0, |e| e.key),
        };

        SSTableContent { header, filter: self.filter.as_bytes().to_vec(), entries: self.entries }
    }
}
