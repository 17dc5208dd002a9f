// Copyright (c) openGemini contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The reader-owned in-memory block cache: either empty, or an arena holding the entire data
//! section, sized to a power-of-two bucket to reduce allocator churn across repeated
//! load/free cycles of similarly sized files.

/// Rounds `n` up to the next power of two, with a floor so tiny files don't allocate a
/// one-byte arena.
#[must_use]
pub fn bucket_size(n: u64) -> u64 {
    const MIN_BUCKET: u64 = 4_096;
    n.max(MIN_BUCKET).next_power_of_two()
}

/// The reader's in-memory data cache.
///
/// Holding `bytes.len() <= capacity`, with the remainder of the arena uninitialized slack
/// reserved for a same-size future load without reallocating.
#[derive(Default)]
pub struct DataCache {
    bytes: Vec<u8>,
}

impl DataCache {
    /// Loads `data` into a freshly sized arena.
    #[must_use]
    pub fn load(data: Vec<u8>) -> Self {
        let mut bytes = Vec::with_capacity(bucket_size(data.len() as u64) as usize);
        bytes.extend_from_slice(&data);
        Self { bytes }
    }

    /// Returns `true` if no bytes are currently cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes actually holding data (not the arena's spare capacity).
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Reads `size` bytes at `offset` from the cache. Caller must have checked bounds via
    /// `is_empty`/`len` first; this only panics (in test builds) on genuinely impossible
    /// requests, since a correct caller never asks for data outside what it loaded.
    #[must_use]
    pub fn read(&self, offset: u64, size: u64) -> Option<&[u8]> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(usize::try_from(size).ok()?)?;
        self.bytes.get(start..end)
    }

    /// Releases the cached bytes, returning how many were freed.
    pub fn clear(&mut self) -> usize {
        let freed = self.bytes.len();
        self.bytes = Vec::new();
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn buckets_round_up_to_power_of_two() {
        assert_eq!(bucket_size(0), 4_096);
        assert_eq!(bucket_size(4_096), 4_096);
        assert_eq!(bucket_size(4_097), 8_192);
        assert_eq!(bucket_size(1_000_000), 1_048_576);
    }

    #[test]
    fn load_read_clear() {
        let mut cache = DataCache::load(vec![1, 2, 3, 4]);
        assert!(!cache.is_empty());
        assert_eq!(cache.read(1, 2), Some(&[2, 3][..]));
        assert_eq!(cache.read(0, 100), None);

        let freed = cache.clear();
        assert_eq!(freed, 4);
        assert!(cache.is_empty());
    }
}
