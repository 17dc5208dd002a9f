// Copyright (c) openGemini contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! C6 — `CompactGroup`: a pooled descriptor handed to the compactor, naming a compaction's
//! inputs and target level. Pooled to amortize the input-path-slice allocation across steady
//! compaction churn.

use crate::file_name::Level;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

/// Shared flag a shard sets when it is being dropped, so an in-flight compaction can abort
/// cleanly instead of producing output for a shard that no longer exists.
#[derive(Clone, Default)]
pub struct DropFlag(Arc<AtomicBool>);

impl DropFlag {
    /// Creates a fresh, unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the owning shard as being dropped.
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// `true` once `set()` has been called.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A reusable descriptor naming one compaction's inputs and destination.
#[derive(Default)]
pub struct CompactGroup {
    measurement: String,
    shard_id: u64,
    target_level: Level,
    inputs: Vec<PathBuf>,
    drop_flag: Option<DropFlag>,
}

impl CompactGroup {
    fn reset(&mut self, measurement: String, shard_id: u64, target_level: Level, capacity: usize) {
        self.measurement = measurement;
        self.shard_id = shard_id;
        self.target_level = target_level;
        self.inputs.clear();
        self.inputs.reserve(capacity);
        self.drop_flag = None;
    }

    /// The measurement this compaction applies to.
    #[must_use]
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// The shard this compaction applies to.
    #[must_use]
    pub fn shard_id(&self) -> u64 {
        self.shard_id
    }

    /// The level the compaction's output will be written at.
    #[must_use]
    pub fn target_level(&self) -> Level {
        self.target_level
    }

    /// The input file paths this compaction will read from.
    #[must_use]
    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    /// Appends an input path. Callers are expected to know the input count up front and pass
    /// it to `acquire` ("pre-sized slice"), but exceeding it just reallocates rather than
    /// panicking.
    pub fn push_input(&mut self, path: PathBuf) {
        self.inputs.push(path);
    }

    /// Attaches the shared drop flag for the owning shard, so the compactor can poll
    /// `should_abort` mid-compaction.
    pub fn set_drop_flag(&mut self, flag: DropFlag) {
        self.drop_flag = Some(flag);
    }

    /// `true` if the owning shard has been marked for drop since this group was acquired.
    #[must_use]
    pub fn should_abort(&self) -> bool {
        self.drop_flag.as_ref().is_some_and(DropFlag::is_set)
    }
}

/// A lock-free-ish (mutex-guarded) free-list of [`CompactGroup`]s, bounded only by peak
/// concurrency — a standard object pool.
#[derive(Default)]
pub struct CompactGroupPool {
    free: Mutex<Vec<Box<CompactGroup>>>,
}

/// A pooled `CompactGroup` that returns itself to the pool on drop.
pub struct PooledCompactGroup<'a> {
    group: Option<Box<CompactGroup>>,
    pool: &'a CompactGroupPool,
}

impl std::ops::Deref for PooledCompactGroup<'_> {
    type Target = CompactGroup;

    fn deref(&self) -> &CompactGroup {
        self.group.as_ref().expect("group taken before drop")
    }
}

impl std::ops::DerefMut for PooledCompactGroup<'_> {
    fn deref_mut(&mut self) -> &mut CompactGroup {
        self.group.as_mut().expect("group taken before drop")
    }
}

impl Drop for PooledCompactGroup<'_> {
    fn drop(&mut self) {
        if let Some(group) = self.group.take() {
            self.pool.release(group);
        }
    }
}

impl CompactGroupPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a group from the free list (or allocates a new one), filled and sized for
    /// `count` inputs.
    #[must_use]
    pub fn acquire(&self, measurement: &str, shard_id: u64, target_level: Level, count: usize) -> PooledCompactGroup<'_> {
        let mut group = self
            .free
            .lock()
            .expect("lock is poisoned")
            .pop()
            .unwrap_or_default();

        group.reset(measurement.to_string(), shard_id, target_level, count);

        PooledCompactGroup {
            group: Some(group),
            pool: self,
        }
    }

    fn release(&self, group: Box<CompactGroup>) {
        self.free.lock().expect("lock is poisoned").push(group);
    }

    /// Number of groups currently sitting idle in the pool (test/diagnostic use).
    #[must_use]
    pub fn idle_len(&self) -> usize {
        self.free.lock().expect("lock is poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn acquire_fill_release_round_trip() {
        let pool = CompactGroupPool::new();
        assert_eq!(pool.idle_len(), 0);

        {
            let mut group = pool.acquire("cpu", 7, 2, 3);
            group.push_input(PathBuf::from("0000000000000001-1-0-0.tssp"));
            group.push_input(PathBuf::from("0000000000000002-1-0-0.tssp"));

            assert_eq!(group.measurement(), "cpu");
            assert_eq!(group.shard_id(), 7);
            assert_eq!(group.target_level(), 2);
            assert_eq!(group.inputs().len(), 2);
        }

        assert_eq!(pool.idle_len(), 1);

        // Re-acquire: the freed capacity should be reused and the group reset.
        let group = pool.acquire("mem", 9, 0, 1);
        assert_eq!(group.measurement(), "mem");
        assert!(group.inputs().is_empty());
        assert_eq!(pool.idle_len(), 0);
    }

    #[test]
    fn drop_flag_signals_abort() {
        let flag = DropFlag::new();
        let pool = CompactGroupPool::new();
        let mut group = pool.acquire("cpu", 1, 0, 0);

        assert!(!group.should_abort());
        group.set_drop_flag(flag.clone());
        assert!(!group.should_abort());

        flag.set();
        assert!(group.should_abort());
    }

    /// Property: re-acquiring a released group always reflects the fields of the *latest*
    /// `acquire` call, never a stale value left over from whichever group the pool happened to
    /// hand back (the pool is a free list, not a cache keyed by measurement).
    #[test]
    fn property_reacquired_group_never_leaks_prior_fields() {
        use rand::Rng;

        let pool = CompactGroupPool::new();

        for _ in 0..20 {
            let measurement = nanoid::nanoid!(8);
            let shard_id = rand::rng().random_range(0..1_000);
            let target_level = rand::rng().random_range(0..8);
            let input_count = rand::rng().random_range(0..5);

            {
                let mut group = pool.acquire(&measurement, shard_id, target_level, input_count);
                for i in 0..input_count {
                    group.push_input(PathBuf::from(format!("{i:016x}-0-0-0.tssp")));
                }

                assert_eq!(group.measurement(), measurement);
                assert_eq!(group.shard_id(), shard_id);
                assert_eq!(group.target_level(), target_level);
                assert_eq!(group.inputs().len(), input_count);
                assert!(!group.should_abort());
            }
        }
    }
}
