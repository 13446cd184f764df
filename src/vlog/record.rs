//! Value log record format.
//!
//! Each record consists of:
//! - Start marker (1 byte): always `0xFF`
//! - Checksum (4 bytes): CRC32 of key, length and value
//! - Key (8 bytes)
//! - Length (4 bytes): length of the value
//! - Value (variable)

use crate::error::{Error, Result};
use crate::types::{Key, Value};
use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher;

/// First byte of every record
pub const START_MARKER: u8 = 0xFF;

/// Size of the record header (marker + checksum + key + length)
pub const RECORD_HEADER_SIZE: usize = 17;

/// Decoded fixed-size part of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Stored checksum
    pub checksum: u32,
    /// Record key
    pub key: Key,
    /// Value length
    pub length: u32,
}

impl RecordHeader {
    /// Decode a header, rejecting a wrong start marker
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < RECORD_HEADER_SIZE {
            return Err(Error::corruption(format!("Record header too short: {} bytes", data.len())));
        }

        let marker = data.get_u8();
        if marker != START_MARKER {
            return Err(Error::corruption(format!("Invalid start marker: {:#04x}", marker)));
        }

        Ok(Self { checksum: data.get_u32_le(), key: data.get_u64_le(), length: data.get_u32_le() })
    }

    /// Total encoded size of the record this header belongs to
    pub fn record_size(&self) -> u64 {
        RECORD_HEADER_SIZE as u64 + self.length as u64
    }
}

/// A value log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VLogRecord {
    /// Key the value was written under
    pub key: Key,
    /// Value bytes
    pub value: Value,
}

impl VLogRecord {
    /// Create a new record
    pub fn new(key: Key, value: Value) -> Self {
        Self { key, value }
    }

    /// Size of the encoded record
    pub fn encoded_size(&self) -> usize {
        RECORD_HEADER_SIZE + self.value.len()
    }

    /// Encode the record into bytes
    ///
    /// Format: [marker: u8][checksum: u32][key: u64][length: u32][value: bytes]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_size());
        buf.put_u8(START_MARKER);
        buf.put_u32_le(Self::calculate_checksum(self.key, &self.value));
        buf.put_u64_le(self.key);
        buf.put_u32_le(self.value.len() as u32);
        buf.put_slice(&self.value);
        buf.to_vec()
    }

    /// Decode a record from bytes holding at least one whole record
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = RecordHeader::decode(data)?;
        let end = header.record_size() as usize;
        if data.len() < end {
            return Err(Error::corruption(format!(
                "Incomplete record: expected {} bytes, got {}",
                end,
                data.len()
            )));
        }

        Self::from_parts(header, &data[RECORD_HEADER_SIZE..end])
    }

    /// Rebuild a record from its header and value bytes, verifying the checksum
    pub fn from_parts(header: RecordHeader, value: &[u8]) -> Result<Self> {
        let actual = Self::calculate_checksum(header.key, value);
        if actual != header.checksum {
            return Err(Error::ChecksumMismatch { expected: header.checksum, actual });
        }
        Ok(Self { key: header.key, value: value.to_vec() })
    }

    /// Calculate CRC32 checksum over key, length and value
    pub fn calculate_checksum(key: Key, value: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(&key.to_le_bytes());
        hasher.update(&(value.len() as u32).to_le_bytes());
        hasher.update(value);
        hasher.finalize()
    }
}
