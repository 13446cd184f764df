//! SSTable (Sorted String Table) implementation.
//!
//! An SSTable is an immutable file holding one sorted run of key index entries.
//! Values are not stored here: every entry points into the value log.
//!
//! ## File Format
//!
//! ```text
//! [Header: 32B]        generation, count, min_key, max_key
//! [Bloom filter: 8KB]  raw bit array
//! [Entry 0: 20B]       key, value offset, value length
//! ...
//! [Entry count-1]
//! ```
//!
//! All integers are little-endian and there is no padding, so the layout is identical
//! for every writer and reader. An entry with value length 0 is a tombstone.

pub mod builder;
pub mod format;
pub mod table;

pub use builder::SSTableBuilder;
pub use format::{SSTableContent, SSTableEntry, SSTableHeader};
pub use table::SSTable;

/// Size of the encoded header.
pub const HEADER_SIZE: usize = 32;

/// Size of the embedded bloom filter.
pub const BLOOM_FILTER_SIZE: usize = 8192;

/// Hash rounds used by the embedded bloom filter.
pub const BLOOM_HASH_ROUNDS: u32 = 3;

/// Size of one encoded index entry.
pub const ENTRY_SIZE: usize = 20;

/// Target size of a full table file.
pub const MAX_FILE_SIZE: usize = 16 * 1024;

/// Entries that fit in a [`MAX_FILE_SIZE`] file.
pub const DEFAULT_MAX_KEY_NUMBER: usize =
    (MAX_FILE_SIZE - HEADER_SIZE - BLOOM_FILTER_SIZE) / ENTRY_SIZE;

/// Extension of table files.
pub const SSTABLE_EXTENSION: &str = "sst";

/// Creates the filter layout used inside table files.
pub fn new_table_filter() -> crate::filter::BloomFilter {
    crate::filter::BloomFilter::new(BLOOM_FILTER_SIZE, BLOOM_HASH_ROUNDS)
}
