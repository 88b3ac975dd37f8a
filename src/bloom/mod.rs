//! # Bloom filter
//!
//! A probabilistic membership structure over opaque byte keys: zero false
//! negatives, a configurable false-positive rate. Every [`SSTable`](crate::sstable::SSTable)
//! carries one so point lookups for absent keys can usually be rejected
//! without touching the data blocks.
//!
//! Sizing follows the standard formulas for bit count and hash-function
//! count given an expected insertion count `n` and a target false-positive
//! rate `p`:
//!
//! ```text
//! bits = -n * ln(p) / (ln 2)^2
//! k    = (bits / n) * ln 2, k >= 1
//! ```
//!
//! The bit array and hashing are delegated to the `bloomfilter` crate,
//! which implements exactly these formulas; this module just gives the
//! engine a narrow, serializable surface (`add` / `might_contain` /
//! `to_bytes` / `from_bytes`) instead of exposing the dependency directly.

use bloomfilter::Bloom;

/// Error returned when a bloom filter cannot be constructed or decoded.
#[derive(Debug, thiserror::Error)]
pub enum BloomError {
    #[error("failed to size bloom filter: {0}")]
    Sizing(String),
}

/// A bloom filter over byte-slice keys.
pub struct BloomFilter {
    inner: Bloom<Vec<u8>>,
}

impl BloomFilter {
    /// Builds a filter sized for `expected_items` insertions at `fp_rate`
    /// (e.g. `0.01` for 1%). `expected_items` is floored at 1 so an empty
    /// SSTable still gets a (trivially small) valid filter.
    pub fn new(expected_items: usize, fp_rate: f64) -> Result<Self, BloomError> {
        let inner = Bloom::new_for_fp_rate(expected_items.max(1), fp_rate)
            .map_err(|e| BloomError::Sizing(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Adds a key. Idempotent — adding the same key twice has no
    /// additional effect.
    pub fn add(&mut self, key: &[u8]) {
        self.inner.set(&key.to_vec());
    }

    /// Returns `false` only when `key` is definitely absent. Returns
    /// `true` when `key` may be present (including false positives).
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.inner.check(&key.to_vec())
    }

    /// Serializes the filter's bit buffer (length-prefixed internally by
    /// the underlying crate) for storage in an SSTable's bloom block.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.as_slice().to_vec()
    }
}

/// Checks membership directly against a serialized filter's bytes,
/// without reconstructing a [`BloomFilter`].
///
/// Two situations are treated as "maybe present" rather than errors,
/// matching the zero-false-negative contract: an empty byte buffer
/// (no filter was written) and a buffer that fails to deserialize
/// (a corrupted bloom block must not hide a live key).
pub fn might_contain_serialized(bytes: &[u8], key: &[u8]) -> bool {
    if bytes.is_empty() {
        return true;
    }
    match Bloom::<Vec<u8>>::from_slice(bytes) {
        Ok(bloom) => bloom.check(&key.to_vec()),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_false_negative() {
        let mut filter = BloomFilter::new(1_000, 0.01).unwrap();
        let keys: Vec<Vec<u8>> = (0..1_000).map(|i: u32| i.to_be_bytes().to_vec()).collect();
        for key in &keys {
            filter.add(key);
        }
        for key in &keys {
            assert!(filter.might_contain(key));
        }
    }

    #[test]
    fn empirical_false_positive_within_bound() {
        let mut filter = BloomFilter::new(1_000, 0.01).unwrap();
        for i in 0u32..1_000 {
            filter.add(&i.to_be_bytes());
        }
        let mut false_positives = 0u32;
        let trials = 10_000u32;
        for i in 1_000_000u32..1_000_000 + trials {
            if filter.might_contain(&i.to_be_bytes()) {
                false_positives += 1;
            }
        }
        let fp_rate = f64::from(false_positives) / f64::from(trials);
        assert!(fp_rate <= 0.015, "empirical FP rate {fp_rate} exceeded 1.5x target");
    }

    #[test]
    fn serialized_roundtrip() {
        let mut filter = BloomFilter::new(100, 0.01).unwrap();
        filter.add(b"hello");
        let bytes = filter.to_bytes();
        assert!(might_contain_serialized(&bytes, b"hello"));
    }

    #[test]
    fn empty_bytes_always_maybe_present() {
        assert!(might_contain_serialized(&[], b"anything"));
    }

    #[test]
    fn corrupted_bytes_fall_back_to_maybe_present() {
        assert!(might_contain_serialized(&[0xFF, 0x00, 0x01], b"anything"));
    }
}
