//! Key, value and locator types shared by every component.

/// Keys are fixed-width and totally ordered.
pub type Key = u64;

/// Values are arbitrary byte strings.
pub type Value = Vec<u8>;

/// Sentinel value written by deletes.
pub const TOMBSTONE: &[u8] = b"~DELETED~";

/// Returns `true` if `value` marks a deleted key.
///
/// A zero-length value is also a tombstone: on disk a tombstone is stored as an
/// entry of length 0, so an empty value would read back as a delete after a flush.
pub fn is_tombstone(value: &[u8]) -> bool {
    value.is_empty() || value == TOMBSTONE
}

/// Position of a value in the value log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Locator {
    /// Byte offset of the record's start marker.
    pub offset: u64,
    /// Length of the value bytes. Zero means tombstone.
    pub length: u32,
}

impl Locator {
    /// Creates a locator.
    pub fn new(offset: u64, length: u32) -> Self {
        Self { offset, length }
    }

    /// The locator stored for deleted keys.
    pub fn tombstone() -> Self {
        Self { offset: 0, length: 0 }
    }

    /// Whether this locator marks a deleted key.
    pub fn is_tombstone(&self) -> bool {
        self.length == 0
    }
}
