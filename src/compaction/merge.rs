//! Multi-way merge iterator for compaction.
//!
//! This module provides an iterator that merges multiple sorted runs of SSTable
//! entries into a single sorted stream.

use crate::sstable::SSTableEntry;
use crate::types::Key;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Entry in the merge heap
struct MergeEntry {
    entry: SSTableEntry,
    source: usize,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.entry.key == other.entry.key && self.source == other.source
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (smallest key first)
        other.entry.key.cmp(&self.entry.key).then_with(|| {
            // For equal keys, prefer smaller source index (newer data)
            other.source.cmp(&self.source)
        })
    }
}

/// Multi-way merge iterator over sorted entry runs
///
/// Yields every entry of every source in key order. Entries with equal keys come
/// out from the smallest source index first, so sources must be passed newest first.
pub struct MergeIterator<'a> {
    heap: BinaryHeap<MergeEntry>,
    sources: Vec<&'a [SSTableEntry]>,
    positions: Vec<usize>,
}

impl<'a> MergeIterator<'a> {
    /// Create a new merge iterator from sorted runs, newest first
    pub fn new(sources: Vec<&'a [SSTableEntry]>) -> Self {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (source, run) in sources.iter().enumerate() {
            if let Some(&entry) = run.first() {
                heap.push(MergeEntry { entry, source });
            }
        }
        let positions = vec![0; sources.len()];
        Self { heap, sources, positions }
    }

    /// Advance the source at the given index and add its next entry to the heap
    fn advance_source(&mut self, source: usize) {
        self.positions[source] += 1;
        if let Some(&entry) = self.sources[source].get(self.positions[source]) {
            self.heap.push(MergeEntry { entry, source });
        }
    }

    /// Wraps the iterator so that only the newest entry of each key is yielded
    pub fn dedup_newest(self) -> NewestEntries<'a> {
        NewestEntries { inner: self, last_key: None }
    }
}

impl Iterator for MergeIterator<'_> {
    type Item = (SSTableEntry, usize);

    fn next(&mut self) -> Option<Self::Item> {
        // Pop the smallest entry from the heap
        let top = self.heap.pop()?;
        self.advance_source(top.source);
        Some((top.entry, top.source))
    }
}

/// Merge output with shadowed versions removed
pub struct NewestEntries<'a> {
    inner: MergeIterator<'a>,
    last_key: Option<Key>,
}

impl Iterator for NewestEntries<'_> {
    type Item = SSTableEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (entry, _) = self.inner.next()?;
            // Skip duplicate keys (keep only the newest version)
            if self.last_key == Some(entry.key) {
                continue;
            }
            self.last_key = Some(entry.key);
            return Some(entry);
        }
    }
}
