//! Filter implementations for efficient key existence checking.
//!
//! Both the MemTable and every SSTable carry a filter so that point lookups can
//! skip structures that definitely do not hold the key.

pub mod bloom;

pub use bloom::BloomFilter;

use crate::types::Key;

/// Filter trait for key existence checking
pub trait Filter {
    /// Check if a key may exist (can have false positives, never false negatives)
    fn query(&self, key: Key) -> bool;

    /// Add a key to the filter
    fn insert(&mut self, key: Key);

    /// Forget every key
    fn clear(&mut self);
}
