// Copyright (c) openGemini contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! C5 — per-level LRU lists and memory counters used to reclaim cached in-memory blocks under
//! pressure.

use crate::table_file::TableFile;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex,
    },
};

/// A handle into one level's LRU list, held by a [`TableFile`] whose reader currently has
/// cached bytes. Its only job is to let `TableSet`/`TableFile` code tell, without taking the
/// level lock, whether the file is currently registered (the invariant:
/// `in_mem_size > 0 ⇔ lru_token.is_some()`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LruToken {
    level: usize,
}

impl LruToken {
    /// The level this token is registered on.
    #[must_use]
    pub fn level(&self) -> usize {
        self.level
    }
}

/// Intrusive, doubly-ended LRU list of table files whose readers hold cached bytes, most recent
/// insertion at the front. Generalized
/// to track a byte size per entry and support eviction from the tail.
struct LruList {
    // (file, its in-memory byte size at insertion time)
    entries: VecDeque<(Arc<TableFile>, i64)>,
}

impl LruList {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    fn push_front(&mut self, file: Arc<TableFile>, size: i64) {
        self.entries.push_front((file, size));
    }

    fn remove(&mut self, file: &Arc<TableFile>) {
        self.entries.retain(|(f, _)| !Arc::ptr_eq(f, file));
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// One level's LRU list plus its three byte counters.
struct LevelState {
    lru: Mutex<LruList>,
    total_bytes: AtomicI64,
    order_bytes: AtomicI64,
    unorder_bytes: AtomicI64,
}

impl LevelState {
    fn new() -> Self {
        Self {
            lru: Mutex::new(LruList::new()),
            total_bytes: AtomicI64::new(0),
            order_bytes: AtomicI64::new(0),
            unorder_bytes: AtomicI64::new(0),
        }
    }
}

/// A fixed array, indexed by level, of LRU lists and memory counters. Levels beyond the
/// configured count are silently clamped to the last level: "level is
/// bounded (small integer)".
///
/// Also owns the background GC queue that [`TableFile::free_memory`] defers to when a file is
/// in use at the moment eviction wants to reclaim it — the memory-pressure path.
pub struct EvictRegistry {
    levels: Vec<LevelState>,
    gc_queue: Mutex<VecDeque<Arc<TableFile>>>,
}

impl EvictRegistry {
    /// Creates a registry with `level_count` levels.
    #[must_use]
    pub fn new(level_count: usize) -> Self {
        assert!(level_count > 0, "level_count must be >= 1");
        Self {
            levels: (0..level_count).map(|_| LevelState::new()).collect(),
            gc_queue: Mutex::new(VecDeque::new()),
        }
    }

    fn clamp(&self, level: usize) -> usize {
        level.min(self.levels.len() - 1)
    }

    /// Registers `file` at the head of `level`'s LRU. `file`'s `lru_token` must currently be
    /// empty — callers enforce this via `TableFile::attach_to_lru`.
    pub fn add_front(&self, level: usize, file: &Arc<TableFile>, size: i64) -> LruToken {
        let level = self.clamp(level);
        let state = &self.levels[level];
        state.lru.lock().expect("lock is poisoned").push_front(file.clone(), size);
        LruToken { level }
    }

    /// Unlinks `file` from its level's LRU. No-op if it isn't currently a member.
    pub fn remove(&self, token: LruToken, file: &Arc<TableFile>) {
        let state = &self.levels[token.level];
        state.lru.lock().expect("lock is poisoned").remove(file);
    }

    /// Atomically adjusts a level's three byte counters.
    pub fn add_mem(&self, level: usize, total: i64, order: i64, unorder: i64) {
        let level = self.clamp(level);
        let state = &self.levels[level];
        state.total_bytes.fetch_add(total, Ordering::AcqRel);
        state.order_bytes.fetch_add(order, Ordering::AcqRel);
        state.unorder_bytes.fetch_add(unorder, Ordering::AcqRel);
    }

    /// Returns `(total, order, unorder)` bytes currently accounted for on `level`.
    #[must_use]
    pub fn mem_usage(&self, level: usize) -> (i64, i64, i64) {
        let level = self.clamp(level);
        let state = &self.levels[level];
        (
            state.total_bytes.load(Ordering::Acquire),
            state.order_bytes.load(Ordering::Acquire),
            state.unorder_bytes.load(Ordering::Acquire),
        )
    }

    /// Number of files currently registered on `level`'s LRU.
    #[must_use]
    pub fn lru_len(&self, level: usize) -> usize {
        let level = self.clamp(level);
        self.levels[level].lru.lock().expect("lock is poisoned").len()
    }

    /// Evicts from the tail of `level`'s LRU until `target_bytes` have been freed or the list
    /// is exhausted. Files currently in use are skipped (left in the list, so a later pass can
    /// still find them) and additionally queued on the background GC list so they get reclaimed
    /// as soon as they become idle, without waiting on another `evict` call; see
    /// `EvictRegistry::drain_gc_queue` and `TableFile::free_memory`.
    ///
    /// Returns the number of bytes actually freed.
    pub fn evict(&self, level: usize, target_bytes: i64) -> i64 {
        let level = self.clamp(level);
        let state = &self.levels[level];

        let mut freed = 0i64;
        let mut skipped = Vec::new();

        loop {
            if freed >= target_bytes {
                break;
            }

            let candidate = {
                let mut lru = state.lru.lock().expect("lock is poisoned");
                lru.entries.pop_back()
            };

            let Some((file, _size)) = candidate else {
                break;
            };

            if file.in_use() {
                self.queue_for_gc(file.clone());
                skipped.push(file);
                continue;
            }

            // `free_memory_unlocked` already updates this level's byte counters (it calls back
            // into `add_mem`), so `evict` only needs to track how much it has freed so far to
            // know when to stop.
            let freed_now = file.free_memory_unlocked();
            if freed_now > 0 {
                freed += freed_now;
                log::trace!(
                    "Evicted {freed_now} bytes from level {level} (target {target_bytes}, freed so far {freed})"
                );
            }
        }

        // Files we skipped because they were in use go back to the front of the LRU so the
        // next eviction pass doesn't spin on them ahead of genuinely idle entries.
        if !skipped.is_empty() {
            let mut lru = state.lru.lock().expect("lock is poisoned");
            for file in skipped.into_iter().rev() {
                let size = file.reader_in_mem_size();
                lru.push_front(file, size);
            }
        }

        freed
    }

    /// Defers `file` to the background GC queue; called by [`TableFile::free_memory`] when the
    /// file is in use at the moment reclamation is requested.
    pub(crate) fn queue_for_gc(&self, file: Arc<TableFile>) {
        self.gc_queue.lock().expect("lock is poisoned").push_back(file);
    }

    /// Drains the GC queue, freeing any file that has since become idle. Files still in use
    /// are put back for the next pass. Returns the total bytes freed.
    pub fn drain_gc_queue(&self) -> i64 {
        let pending: Vec<_> = {
            let mut queue = self.gc_queue.lock().expect("lock is poisoned");
            queue.drain(..).collect()
        };

        let mut freed = 0i64;
        let mut still_pending = Vec::new();

        for file in pending {
            if file.in_use() {
                still_pending.push(file);
            } else {
                freed += file.free_memory_unlocked();
            }
        }

        if !still_pending.is_empty() {
            self.gc_queue.lock().expect("lock is poisoned").extend(still_pending);
        }

        freed
    }

    /// Number of files currently deferred on the background GC queue.
    #[must_use]
    pub fn gc_queue_len(&self) -> usize {
        self.gc_queue.lock().expect("lock is poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{file_name::{FileName, FileSuffix}, table_file::TableFile};
    use test_log::test;

    fn fixture_file(dir: &std::path::Path, seq: u64, data: &[u8], registry: Arc<EvictRegistry>) -> Arc<TableFile> {
        let path = dir.join(format!("{seq:016x}-0-0-0.tssp"));
        crate::reader::tests_support::write_minimal_fixture(&path, data);
        let name = FileName::parse(&path.file_name().unwrap().to_string_lossy(), true).unwrap();
        TableFile::open(name, &path, dir.join("lock"), true, false, registry).expect("open")
    }

    #[test]
    fn scenario_f_evict_skips_in_use_and_frees_tail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(EvictRegistry::new(1));

        let f1 = fixture_file(dir.path(), 1, &vec![0u8; 2_048], registry.clone());
        let f2 = fixture_file(dir.path(), 2, &vec![0u8; 4_096], registry.clone());
        let f3 = fixture_file(dir.path(), 3, &vec![0u8; 8_192], registry.clone());

        for f in [&f1, &f2, &f3] {
            f.load_into_memory().expect("load");
        }

        // front -> back: f3, f2, f1 (most recent insert at front)
        assert_eq!(registry.lru_len(0), 3);
        assert_eq!(registry.mem_usage(0).0, 2_048 + 4_096 + 8_192);

        let pin = f1.ref_handle();

        let freed = registry.evict(0, 8_192);
        assert_eq!(freed, 12_288);
        assert_eq!(registry.lru_len(0), 1);
        assert_eq!(registry.mem_usage(0).0, 2_048);

        // The in-use file was left on the LRU for a later pass to find, but also queued on
        // the background GC list so it doesn't have to wait for one.
        assert_eq!(registry.gc_queue_len(), 1);

        drop(pin);
        let gc_freed = registry.drain_gc_queue();
        assert_eq!(gc_freed, 2_048);
        assert_eq!(registry.mem_usage(0).0, 0);
    }

    #[test]
    fn in_use_file_is_deferred_to_gc_queue() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(EvictRegistry::new(1));
        let file = fixture_file(dir.path(), 1, &vec![0u8; 4_096], registry.clone());
        file.load_into_memory().expect("load");

        let guard = file.ref_handle();
        assert_eq!(file.free_memory(), 0, "in-use file must defer, not free inline");
        assert_eq!(registry.gc_queue_len(), 1);

        drop(guard);
        let freed = registry.drain_gc_queue();
        assert_eq!(freed, 4_096);
        assert_eq!(registry.gc_queue_len(), 0);
    }
}
