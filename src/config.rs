//! Configuration options for the WiscKV storage engine.

use crate::sstable::DEFAULT_MAX_KEY_NUMBER;

/// Configuration options for opening a store.
#[derive(Debug, Clone)]
pub struct Options {
    /// Create the table directory if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,

    /// Maximum number of distinct keys held by the MemTable, which is also the
    /// maximum number of entries written into one SSTable.
    /// Default: 408 (a 16KB table file)
    pub max_key_number: usize,

    /// Number of leading levels whose SSTables stay parsed in memory.
    /// Default: 2
    pub cached_levels: usize,

    /// Compaction out of `level` drops tombstones once
    /// `level_count <= level + tombstone_drop_levels`. Zero keeps every tombstone.
    /// Default: 2 (the target level is the deepest one)
    pub tombstone_drop_levels: usize,

    /// Promotion probability of the in-memory skip list.
    /// Default: 0.5
    pub skiplist_probability: f64,

    /// Bytes scanned per step while searching for the value log tail on open.
    /// Default: 1000
    pub vlog_scan_chunk: usize,

    /// fsync SSTables, the value log and the compaction journal when they are written.
    /// Default: true
    pub sync_writes: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            max_key_number: DEFAULT_MAX_KEY_NUMBER,
            cached_levels: 2,
            tombstone_drop_levels: 2,
            skiplist_probability: 0.5,
            vlog_scan_chunk: 1000,
            sync_writes: true,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the table directory if it doesn't exist.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the MemTable / SSTable key capacity.
    pub fn max_key_number(mut self, value: usize) -> Self {
        self.max_key_number = value;
        self
    }

    /// Sets how many levels keep their tables cached.
    pub fn cached_levels(mut self, value: usize) -> Self {
        self.cached_levels = value;
        self
    }

    /// Sets the tombstone dropping window used by compaction.
    pub fn tombstone_drop_levels(mut self, value: usize) -> Self {
        self.tombstone_drop_levels = value;
        self
    }

    /// Sets the skip list promotion probability.
    pub fn skiplist_probability(mut self, value: f64) -> Self {
        self.skiplist_probability = value;
        self
    }

    /// Sets the value log recovery scan step.
    pub fn vlog_scan_chunk(mut self, value: usize) -> Self {
        self.vlog_scan_chunk = value;
        self
    }

    /// Enables or disables fsync on writes.
    pub fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_key_number == 0 {
            return Err(crate::Error::invalid_argument("max_key_number must be > 0"));
        }
        if self.max_key_number > DEFAULT_MAX_KEY_NUMBER * 64 {
            return Err(crate::Error::invalid_argument(format!(
                "max_key_number must be <= {}",
                DEFAULT_MAX_KEY_NUMBER * 64
            )));
        }
        if self.skiplist_probability <= 0.0 || self.skiplist_probability >= 1.0 {
            return Err(crate::Error::invalid_argument(
                "skiplist_probability must be between 0 and 1",
            ));
        }
        if self.vlog_scan_chunk == 0 {
            return Err(crate::Error::invalid_argument("vlog_scan_chunk must be > 0"));
        }
        Ok(())
    }
}
