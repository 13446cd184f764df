//! Fixed binary layout of SSTable files.

use crate::error::{Error, Result};
use crate::sstable::{BLOOM_FILTER_SIZE, ENTRY_SIZE, HEADER_SIZE};
use crate::types::{Key, Locator};
use bytes::{Buf, BufMut, BytesMut};

/// Table header, also kept by the level manager for every file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SSTableHeader {
    /// Flush generation; newer generations shadow older ones.
    pub generation: u64,
    /// Number of index entries.
    pub count: u64,
    /// Smallest key in the table.
    pub min_key: Key,
    /// Largest key in the table.
    pub max_key: Key,
}

impl SSTableHeader {
    /// Encode the header (32 bytes)
    pub fn encode_to(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.generation);
        buf.put_u64_le(self.count);
        buf.put_u64_le(self.min_key);
        buf.put_u64_le(self.max_key);
    }

    /// Decode a header from the start of `data`
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::corruption(format!(
                "SSTable header too short: {} bytes",
                data.len()
            )));
        }

        let header = Self {
            generation: data.get_u64_le(),
            count: data.get_u64_le(),
            min_key: data.get_u64_le(),
            max_key: data.get_u64_le(),
        };
        if header.count > 0 && header.min_key > header.max_key {
            return Err(Error::corruption(format!(
                "SSTable header key range inverted: {} > {}",
                header.min_key, header.max_key
            )));
        }
        Ok(header)
    }

    /// Whether `[min_key, max_key]` intersects `[low, high]`.
    pub fn overlaps(&self, low: Key, high: Key) -> bool {
        !(high < self.min_key || low > self.max_key)
    }

    /// Whether `key` falls inside `[min_key, max_key]`.
    pub fn covers(&self, key: Key) -> bool {
        self.min_key <= key && key <= self.max_key
    }
}

impl AsRef<SSTableHeader> for SSTableHeader {
    fn as_ref(&self) -> &SSTableHeader {
        self
    }
}

/// One index entry: a key and where its value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SSTableEntry {
    /// The key
    pub key: Key,
    /// Value log offset; meaningless for tombstones
    pub offset: u64,
    /// Value length; 0 for tombstones
    pub length: u32,
}

impl SSTableEntry {
    /// Create an entry
    pub fn new(key: Key, locator: Locator) -> Self {
        Self { key, offset: locator.offset, length: locator.length }
    }

    /// The value log locator of this entry
    pub fn locator(&self) -> Locator {
        Locator::new(self.offset, self.length)
    }

    /// Whether the entry marks a deletion
    pub fn is_tombstone(&self) -> bool {
        self.length == 0
    }
}

/// Complete in-memory image of one table file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SSTableContent {
    /// Header fields
    pub header: SSTableHeader,
    /// Raw bloom filter bits, exactly [`BLOOM_FILTER_SIZE`] bytes
    pub filter: Vec<u8>,
    /// Index entries sorted by key, keys unique
    pub entries: Vec<SSTableEntry>,
}

impl SSTableContent {
    /// Size of the encoded file
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + BLOOM_FILTER_SIZE + self.entries.len() * ENTRY_SIZE
    }

    /// Encode the whole file
    pub fn encode(&self) -> Vec<u8> {
        debug_assert_eq!(self.filter.len(), BLOOM_FILTER_SIZE);
        debug_assert_eq!(self.header.count as usize, self.entries.len());

        let mut buf = BytesMut::with_capacity(self.encoded_size());
        self.header.encode_to(&mut buf);
        buf.put_slice(&self.filter);
        for entry in &self.entries {
            buf.put_u64_le(entry.key);
            buf.put_u64_le(entry.offset);
            buf.put_u32_le(entry.length);
        }
        buf.to_vec()
    }

    /// Decode a whole file, validating its length and entry order
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = SSTableHeader::decode(data)?;

        let expected = HEADER_SIZE
            .checked_add(BLOOM_FILTER_SIZE)
            .and_then(|n| (header.count as usize).checked_mul(ENTRY_SIZE).map(|e| n + e))
            .ok_or_else(|| Error::corruption("SSTable entry count overflows"))?;
        if data.len() != expected {
            return Err(Error::corruption(format!(
                "SSTable size mismatch: expected {} bytes for {} entries, got {}",
                expected,
                header.count,
                data.len()
            )));
        }

        let filter = data[HEADER_SIZE..HEADER_SIZE + BLOOM_FILTER_SIZE].to_vec();

        let mut rest = &data[HEADER_SIZE + BLOOM_FILTER_SIZE..];
        let mut entries = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            let entry = SSTableEntry {
                key: rest.get_u64_le(),
                offset: rest.get_u64_le(),
                length: rest.get_u32_le(),
            };
            if let Some(prev) = entries.last().map(|e: &SSTableEntry| e.key) {
                if prev >= entry.key {
                    return Err(Error::corruption(format!(
                        "SSTable entries out of order: {} then {}",
                        prev, entry.key
                    )));
                }
            }
            entries.push(entry);
        }

        if let (Some(first), Some(last)) = (entries.first(), entries.last()) {
            if first.key != header.min_key || last.key != header.max_key {
                return Err(Error::corruption("SSTable header range does not match entries"));
            }
        }

        Ok(Self { header, filter, entries })
    }
}
