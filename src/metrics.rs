// Copyright (c) openGemini contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Opt-in counters for block-cache effectiveness, gated behind the `metrics` feature: plain
//! `AtomicUsize` counters with a ratio accessor, no external metrics crate.

use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};

/// Per-`FileReader` counters tracking how often [`crate::reader::FileReader::read_data`] was
/// satisfied from the in-memory cache versus disk.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Number of `read_data` calls served from the reader's in-memory cache.
    pub(crate) data_reads_cached: AtomicUsize,
    /// Number of `read_data` calls that went to disk.
    pub(crate) data_reads_io: AtomicUsize,
}

#[allow(clippy::cast_precision_loss)]
impl Metrics {
    /// Number of reads served from the in-memory cache.
    #[must_use]
    pub fn data_reads_cached(&self) -> usize {
        self.data_reads_cached.load(Relaxed)
    }

    /// Number of reads that went to disk.
    #[must_use]
    pub fn data_reads_io(&self) -> usize {
        self.data_reads_io.load(Relaxed)
    }

    /// Fraction (0.0–1.0) of reads served from cache rather than disk. `NaN` if no reads have
    /// been observed yet.
    #[must_use]
    pub fn cache_hit_ratio(&self) -> f64 {
        let cached = self.data_reads_cached.load(Relaxed) as f64;
        let total = cached + self.data_reads_io.load(Relaxed) as f64;
        cached / total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use test_log::test;

    #[test]
    fn ratio_reflects_recorded_reads() {
        let metrics = Metrics::default();
        metrics.data_reads_cached.fetch_add(3, Ordering::Relaxed);
        metrics.data_reads_io.fetch_add(1, Ordering::Relaxed);

        assert_eq!(metrics.data_reads_cached(), 3);
        assert_eq!(metrics.data_reads_io(), 1);
        assert!((metrics.cache_hit_ratio() - 0.75).abs() < f64::EPSILON);
    }
}
