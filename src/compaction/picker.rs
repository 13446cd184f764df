//! Compaction file picker.
//!
//! Decides which files leave an overflowing level and which files of the next
//! level each of them has to be merged with.

use crate::compaction::level_capacity;
use crate::sstable::SSTableHeader;
use crate::types::Key;
use std::ops::Range;

/// Files to push out of an overflowing level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionTask {
    /// Source level
    pub level: usize,
    /// Indices into the source level, in the order they must be merged down
    pub inputs: Vec<usize>,
}

/// Pick the overflow of `level`, whose files are described by `headers` in level order.
///
/// Returns `None` while the level holds at most [`level_capacity`] files. Level 0 is
/// stored newest first and spills every file, oldest first. Deeper levels spill only
/// the files beyond capacity when ranked by recency, again oldest first.
pub fn pick_compaction<H: AsRef<SSTableHeader>>(
    level: usize,
    headers: &[H],
) -> Option<CompactionTask> {
    let capacity = level_capacity(level);
    if headers.len() <= capacity {
        return None;
    }

    let inputs: Vec<usize> = if level == 0 {
        (0..headers.len()).rev().collect()
    } else {
        let mut by_recency: Vec<usize> = (0..headers.len()).collect();
        by_recency.sort_by_key(|&i| std::cmp::Reverse(headers[i].as_ref().generation));
        by_recency.split_off(capacity).into_iter().rev().collect()
    };

    log::debug!(
        "Level {} holds {} files (capacity {}), spilling {}",
        level,
        headers.len(),
        capacity,
        inputs.len()
    );
    Some(CompactionTask { level, inputs })
}

/// Contiguous run of files in a key-sorted, non-overlapping level that intersect
/// `[min_key, max_key]`.
///
/// An empty range still carries the position where a file covering that span belongs.
pub fn overlapping_run<H: AsRef<SSTableHeader>>(
    headers: &[H],
    min_key: Key,
    max_key: Key,
) -> Range<usize> {
    let start = headers.partition_point(|h| h.as_ref().max_key < min_key);
    let len = headers[start..].iter().take_while(|h| h.as_ref().min_key <= max_key).count();
    start..start + len
}

/// Index of the only file of a key-sorted, non-overlapping level that may hold `key`
pub fn find_file<H: AsRef<SSTableHeader>>(headers: &[H], key: Key) -> Option<usize> {
    let idx = headers.partition_point(|h| h.as_ref().max_key < key);
    headers.get(idx).filter(|h| h.as_ref().min_key <= key).map(|_| idx)
}
