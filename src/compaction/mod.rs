//! Compaction module for managing SSTable levels.
//!
//! This module implements the leveled layout of SSTables and the compaction
//! process that merges an overflowing level into the next one.
//!
//! ## Compaction Strategy
//!
//! - Level 0: new SSTables from flush, newest first (may overlap)
//! - Level 1+: non-overlapping SSTables sorted by key
//! - Level N holds at most `2^(N+1)` files
//!
//! ## Process
//!
//! 1. Pick the overflowing files (picker.rs)
//! 2. For each, find the intersecting run of the next level (picker.rs)
//! 3. Merge using a multi-way merge iterator (merge.rs)
//! 4. Stage the outputs and commit through the journal (journal.rs)
//! 5. Swap the files in memory and cascade into the next level (levels.rs)

pub mod journal;
pub mod levels;
pub mod merge;
pub mod picker;

pub use journal::CompactionRecord;
pub use levels::LevelManager;
pub use merge::MergeIterator;
pub use picker::{pick_compaction, CompactionTask};

use crate::error::Result;
use crate::sstable::{SSTableBuilder, SSTableContent, SSTableEntry};

/// Maximum number of files level `level` holds before it spills
pub fn level_capacity(level: usize) -> usize {
    1usize << (level + 1).min(usize::BITS as usize - 1)
}

/// Compaction job that merges sorted runs into table contents
pub struct CompactionJob<'a> {
    /// Input runs, newest first
    pub inputs: Vec<&'a [SSTableEntry]>,
    /// Generation stamped on every output
    pub generation: u64,
    /// Maximum entries per output
    pub max_key_number: usize,
    /// Whether tombstones are dropped instead of carried down
    pub drop_tombstones: bool,
}

impl<'a> CompactionJob<'a> {
    /// Create a new compaction job
    pub fn new(
        inputs: Vec<&'a [SSTableEntry]>,
        generation: u64,
        max_key_number: usize,
        drop_tombstones: bool,
    ) -> Self {
        Self { inputs, generation, max_key_number, drop_tombstones }
    }

    /// Execute the compaction
    ///
    /// Keeps the newest entry of every key and cuts a new output whenever the current
    /// one reaches `max_key_number` entries. All inputs collapsing to nothing yields no
    /// output at all.
    pub fn run(self) -> Result<Vec<SSTableContent>> {
        let mut outputs = Vec::new();
        let mut builder = SSTableBuilder::new(self.generation, self.max_key_number);
        let mut dropped = 0usize;

        for entry in MergeIterator::new(self.inputs).dedup_newest() {
            if self.drop_tombstones && entry.is_tombstone() {
                dropped += 1;
                continue;
            }
            if builder.is_full() {
                let full = std::mem::replace(
                    &mut builder,
                    SSTableBuilder::new(self.generation, self.max_key_number),
                );
                outputs.push(full.finish());
            }
            builder.add(entry)?;
        }
        if !builder.is_empty() {
            outputs.push(builder.finish());
        }

        log::debug!(
            "Merged into {} outputs of generation {}, {} tombstones dropped",
            outputs.len(),
            self.generation,
            dropped
        );
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(keys: impl IntoIterator<Item = u64>, offset: u64) -> Vec<SSTableEntry> {
        keys.into_iter().map(|key| SSTableEntry { key, offset, length: 1 }).collect()
    }

    #[test]
    fn test_level_capacity() {
        assert_eq!(level_capacity(0), 2);
        assert_eq!(level_capacity(1), 4);
        assert_eq!(level_capacity(2), 8);
        assert_eq!(level_capacity(10), 2048);
    }

    #[test]
    fn test_job_newest_wins_and_splits() {
        let newer = entries(0..5, 1);
        let older = entries(3..10, 0);

        let outputs = CompactionJob::new(vec![&newer, &older], 7, 4, false).run().unwrap();
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs.iter().map(|c| c.entries.len()).collect::<Vec<_>>(), vec![4, 4, 2]);
        assert!(outputs.iter().all(|c| c.header.generation == 7));

        let all: Vec<_> = outputs.iter().flat_map(|c| c.entries.iter()).collect();
        assert_eq!(all.len(), 10);
        assert_eq!(all[4].offset, 1);
        assert_eq!(all[5].offset, 0);
        assert_eq!((outputs[1].header.min_key, outputs[1].header.max_key), (4, 7));
    }

    #[test]
    fn test_job_tombstones() {
        let newer = vec![SSTableEntry { key: 2, offset: 0, length: 0 }];
        let older = entries([1, 2, 3], 0);

        let kept = CompactionJob::new(vec![&newer, &older], 0, 10, false).run().unwrap();
        assert_eq!(kept[0].entries.len(), 3);
        assert!(kept[0].entries[1].is_tombstone());

        let dropped = CompactionJob::new(vec![&newer, &older], 0, 10, true).run().unwrap();
        let keys: Vec<_> = dropped[0].entries.iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![1, 3]);
    }

    #[test]
    fn test_job_all_dropped() {
        let only = vec![SSTableEntry { key: 2, offset: 0, length: 0 }];
        let outputs = CompactionJob::new(vec![&only], 0, 10, true).run().unwrap();
        assert!(outputs.is_empty());
    }
}
