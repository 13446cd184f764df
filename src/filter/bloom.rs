//! Bloom Filter implementation.
//!
//! A space-efficient probabilistic data structure used to test whether an element
//! is a member of a set. False positive matches are possible, but false negatives are not.
//!
//! The bit array has a fixed byte size so that it can be embedded verbatim in an
//! SSTable file and loaded back with [`BloomFilter::set`].

use crate::filter::Filter;
use crate::types::Key;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// BloomFilter provides probabilistic set membership testing.
///
/// # Example
/// ```
/// use wisckv::filter::{BloomFilter, Filter};
///
/// let mut filter = BloomFilter::new(1024, 3);
/// filter.insert(1);
/// filter.insert(2);
///
/// assert!(filter.query(1));
/// assert!(filter.query(2));
/// // 3 might return true (false positive) or false
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    /// Bit array for the bloom filter
    bits: Vec<u8>,
    /// Number of hash rounds per key
    num_hashes: u32,
}

impl BloomFilter {
    /// Create a filter of `size_bytes` bytes using `num_hashes` hash rounds.
    ///
    /// # Panics
    ///
    /// Panics if either argument is zero.
    pub fn new(size_bytes: usize, num_hashes: u32) -> Self {
        assert!(size_bytes > 0, "bloom filter needs at least one byte");
        assert!(num_hashes > 0, "bloom filter needs at least one hash round");

        Self { bits: vec![0u8; size_bytes], num_hashes }
    }

    /// Load the bit array verbatim from `bytes`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is not exactly the filter's size.
    pub fn set(&mut self, bytes: &[u8]) {
        assert_eq!(
            bytes.len(),
            self.bits.len(),
            "bloom filter content must be {} bytes",
            self.bits.len()
        );
        self.bits.copy_from_slice(bytes);
    }

    /// The raw bit array, as stored in SSTable files.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Get the size of the filter in bytes.
    pub fn size(&self) -> usize {
        self.bits.len()
    }

    /// Get the number of hash rounds used.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Get the number of bits in the filter.
    pub fn num_bits(&self) -> usize {
        self.bits.len() * 8
    }

    /// Bit position of `key` for hash round `round`.
    ///
    /// Each round seeds the hash independently.
    fn bit_position(&self, key: Key, round: u32) -> usize {
        let hash = xxh3_64_with_seed(&key.to_le_bytes(), round as u64);
        (hash % self.num_bits() as u64) as usize
    }

    fn set_bit(&mut self, pos: usize) {
        self.bits[pos / 8] |= 1 << (pos % 8);
    }

    fn is_bit_set(&self, pos: usize) -> bool {
        (self.bits[pos / 8] & (1 << (pos % 8))) != 0
    }

    /// Calculate the approximate false positive rate after `num_keys` inserts.
    ///
    /// p = (1 - e^(-kn/m))^k
    pub fn estimated_false_positive_rate(&self, num_keys: usize) -> f64 {
        if num_keys == 0 {
            return 0.0;
        }

        let k = self.num_hashes as f64;
        let n = num_keys as f64;
        let m = self.num_bits() as f64;

        (1.0 - (-k * n / m).exp()).powf(k)
    }
}

impl Filter for BloomFilter {
    /// Returns `false` only if the key was definitely never inserted.
    fn query(&self, key: Key) -> bool {
        (0..self.num_hashes).all(|round| self.is_bit_set(self.bit_position(key, round)))
    }

    fn insert(&mut self, key: Key) {
        for round in 0..self.num_hashes {
            let pos = self.bit_position(key, round);
            self.set_bit(pos);
        }
    }

    fn clear(&mut self) {
        self.bits.fill(0);
    }
}
