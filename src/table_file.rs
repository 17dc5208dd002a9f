// Copyright (c) openGemini contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! C3 — wraps a `FileReader` with reference-counting, a stop-flag, and the per-level LRU hook
//! described below.
//!
//! The three concerns share one lock: reads take the file's `RwLock` in shared mode, while
//! `remove`, `close`, `rename`, `load_into_memory`, and `load_components` take it exclusively.
//! Taking the exclusive lock during finalization (`close`/`remove`) is what stands in for the
//! design note's "wait-group" — any shared-lock-holding read already in flight blocks that
//! acquisition, so there is nothing left for a dedicated wait-group to do once the lock
//! discipline is in place.

use crate::{
    error::{Error, Result},
    evict::{EvictRegistry, LruToken},
    file_name::{FileName, Level},
    fs::is_not_found,
    offset::{DataOffset, DataSize},
    reader::{ChunkMeta, FileReader, MetaIndex},
};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Arc, RwLock, Weak,
    },
};

struct State {
    name: FileName,
    path: PathBuf,
    lru_token: Option<LruToken>,
}

/// C3 — a reference-counted handle to one immutable on-disk table file.
///
/// `ref_count` starts at 1, representing the owning [`crate::table_set::TableSet`]'s hold on
/// the file (`ref==0` means unreachable). Readers take additional refs
/// via [`TableFile::ref_handle`] (or the raw [`TableFile::ref_`]/[`TableFile::unref`] pair) for
/// the duration of a read.
///
/// Holds the `Arc<EvictRegistry>` for its shard rather than taking one as a parameter on every
/// memory-touching call: the registry is one per shard, handed to every file opened into the
/// same `TableSet`, and `unref()` (called from arbitrary reader threads with no registry in
/// scope) needs one to finalize against when it happens to be the last ref out.
pub struct TableFile {
    self_weak: Weak<TableFile>,
    state: RwLock<State>,
    lock_path: PathBuf,
    order: bool,
    reader: FileReader,
    registry: Arc<EvictRegistry>,
    ref_count: AtomicI32,
    stopped: AtomicBool,
    /// Set by `remove()` before it releases the set's ref, so that whichever thread's `unref`
    /// happens to observe the ref dropping to zero knows to unlink the file, not just close it.
    unlink_on_finalize: AtomicBool,
}

/// RAII guard returned by [`TableFile::ref_handle`]; releases the ref on drop.
pub struct RefGuard(Arc<TableFile>);

impl Drop for RefGuard {
    fn drop(&mut self) {
        self.0.unref();
    }
}

impl TableFile {
    /// Opens `path` (whose basename has already been parsed into `name`) and constructs a
    /// `TableFile` with `ref_count = 1`. If `cache_data` is set, the reader immediately loads
    /// the data section into memory and registers it on `registry`'s LRU for this file's level
    /// in the same step — otherwise invariant 4 (`in_mem_size > 0 ⇔ lru_token.is_some()`) would
    /// be briefly violated between the reader's load and the registry update.
    pub fn open(
        name: FileName,
        path: &Path,
        lock_path: PathBuf,
        is_order: bool,
        cache_data: bool,
        registry: Arc<EvictRegistry>,
    ) -> Result<Arc<Self>> {
        let reader = FileReader::open(path, cache_data)?;

        let file = Arc::new_cyclic(|weak| Self {
            self_weak: weak.clone(),
            state: RwLock::new(State {
                name,
                path: path.to_path_buf(),
                lru_token: None,
            }),
            lock_path,
            order: is_order,
            reader,
            registry,
            ref_count: AtomicI32::new(1),
            stopped: AtomicBool::new(false),
            unlink_on_finalize: AtomicBool::new(false),
        });

        log::debug!("Opened table file {name} (order={is_order}, cache_data={cache_data})");

        if cache_data {
            file.attach_to_lru(file.reader.in_mem_size());
        }

        Ok(file)
    }

    /// The file's parsed identity.
    #[must_use]
    pub fn name(&self) -> FileName {
        self.state.read().expect("lock is poisoned").name
    }

    /// The file's current on-disk path (may change across a `rename`).
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.state.read().expect("lock is poisoned").path.clone()
    }

    /// Whether this file holds time-ordered data.
    #[must_use]
    pub fn order(&self) -> bool {
        self.order
    }

    /// The file's level, read from its name.
    #[must_use]
    pub fn level(&self) -> Level {
        self.name().level()
    }

    /// Returns `true` once `stop()`, `close()`, or `remove()` has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_stopped() {
            Err(Error::FileClosed)
        } else {
            Ok(())
        }
    }

    fn arc_self(&self) -> Arc<Self> {
        self.self_weak
            .upgrade()
            .expect("TableFile method called after the Arc it belongs to was dropped")
    }

    /// Bumps the live-user refcount. A silent no-op once the file is stopped.
    pub fn ref_(&self) {
        if self.is_stopped() {
            return;
        }
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Releases a ref taken with [`TableFile::ref_`] or [`TableFile::ref_handle`].
    ///
    /// If this call happens to be the one that drops the count to zero, it performs whatever
    /// finalize action `close()`/`remove()` queued up (closing the reader, and unlinking the
    /// file if this was a `remove()`). Dropping below zero, or reaching zero while the file was
    /// never stopped, is a ref-counting bug — it traps the process.
    pub fn unref(&self) {
        let prev = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        assert!(
            prev >= 1,
            "unref() on table file {:?} dropped ref below zero: ref-counting bug",
            self.path()
        );

        if prev == 1 {
            assert!(
                self.is_stopped(),
                "unref() on table file {:?} reached ref=0 while not stopped: the set's own reference was lost",
                self.path()
            );

            let unlink = self.unlink_on_finalize.load(Ordering::Acquire);
            if let Err(e) = self.finalize(unlink) {
                log::error!("finalize failed for table file {:?}: {e}", self.path());
            }
        }
    }

    /// Takes a ref and wraps it in an RAII guard that calls `unref` on drop.
    #[must_use]
    pub fn ref_handle(&self) -> RefGuard {
        self.ref_();
        RefGuard(self.arc_self())
    }

    /// `true` if any reference beyond the set's own is currently outstanding.
    #[must_use]
    pub fn in_use(&self) -> bool {
        self.ref_count.load(Ordering::Acquire) > 1
    }

    /// Pins the reader's in-memory cache, preventing a concurrent `free_memory` from reclaiming
    /// it mid-scan. Pairs with [`TableFile::unref_reader`].
    pub fn ref_reader(&self) {
        self.reader.pin();
    }

    /// Releases a pin taken with [`TableFile::ref_reader`].
    pub fn unref_reader(&self) {
        self.reader.unpin();
    }

    fn attach_to_lru(&self, size: i64) {
        if size <= 0 {
            return;
        }

        let token = self.registry.add_front(usize::from(self.level()), &self.arc_self(), size);

        {
            let mut state = self.state.write().expect("lock is poisoned");
            debug_assert!(
                state.lru_token.is_none(),
                "attach_to_lru called while already registered"
            );
            state.lru_token = Some(token);
        }

        let (order_delta, unorder_delta) = if self.order { (size, 0) } else { (0, size) };
        self.registry.add_mem(usize::from(self.level()), size, order_delta, unorder_delta);
    }

    /// Reads all data bytes into the reader's cache, then registers with the shard's LRU for
    /// this file's level and bumps its memory counters. Idempotent: a second call on an
    /// already-loaded file is a no-op (the reader itself short-circuits).
    pub fn load_into_memory(&self) -> Result<()> {
        self.check_open()?;
        let already_loaded = {
            let _state = self.state.write().expect("lock is poisoned");
            let already_loaded = self.reader.in_mem_size() > 0;
            self.reader.load_into_memory()?;
            already_loaded
        };

        if !already_loaded {
            self.attach_to_lru(self.reader.in_mem_size());
        }

        Ok(())
    }

    /// Loads the trailer's meta-index and chunk-metas (but not data bytes).
    pub fn load_components(&self) -> Result<()> {
        self.check_open()?;
        let _state = self.state.write().expect("lock is poisoned");
        self.reader.load_components()
    }

    /// Releases cached bytes and unregisters from the LRU if the file is idle; otherwise hands
    /// itself to the registry's background GC queue and returns 0 immediately.
    pub fn free_memory(&self) -> i64 {
        if self.in_use() {
            self.registry.queue_for_gc(self.arc_self());
            return 0;
        }

        self.free_memory_unlocked()
    }

    /// The non-deferring half of `free_memory`: actually releases cached bytes and updates the
    /// level's LRU/counters. Called directly by [`EvictRegistry::evict`], which has already
    /// popped the file off the LRU list itself (`with_lru_lock=false`).
    pub(crate) fn free_memory_unlocked(&self) -> i64 {
        let freed = self.reader.free_memory() as i64;

        let token = {
            let mut state = self.state.write().expect("lock is poisoned");
            state.lru_token.take()
        };

        if let Some(token) = token {
            self.registry.remove(token, &self.arc_self());
        }

        if freed > 0 {
            let (order_delta, unorder_delta) = if self.order { (-freed, 0) } else { (0, -freed) };
            self.registry.add_mem(usize::from(self.level()), -freed, order_delta, unorder_delta);
        }

        freed
    }

    /// Bytes currently held by the reader's cache, without touching any lock.
    #[must_use]
    pub(crate) fn reader_in_mem_size(&self) -> i64 {
        self.reader.in_mem_size()
    }

    /// Drops the OS file handle; keeps the loaded components and cache.
    pub fn free_file_handle(&self) {
        self.reader.free_file_handle();
    }

    /// Renames the file on disk (used to commit an `.init` file to `.tssp`). Invalid once
    /// stopped.
    pub fn rename(&self, new_name: FileName) -> Result<()> {
        self.check_open()?;
        let mut state = self.state.write().expect("lock is poisoned");

        let new_path = state.path.with_file_name(new_name.to_string());
        self.reader.rename(&new_path)?;
        state.name = new_name;
        state.path = new_path;

        Ok(())
    }

    /// Sets the stop flag without releasing the set's ref. Existing readers (holding `ref>=1`)
    /// complete; no new reads are accepted.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Sets stopped, releases the set's own ref, and — once the ref truly reaches zero — closes
    /// the reader and (if the file wasn't a temp file) decrements memory accounting for its
    /// level.
    pub fn close(&self) -> Result<()> {
        self.stopped.store(true, Ordering::Release);
        self.unlink_on_finalize.store(false, Ordering::Release);

        let prev = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev >= 1, "close() on an already-released table file: ref-counting bug");

        if prev == 1 {
            self.finalize(false)?;
        }

        Ok(())
    }

    /// As `close()`, but additionally unlinks the file from disk once the ref truly reaches
    /// zero (immediately, if this call is itself the one that drops it there; otherwise the
    /// eventual last `unref()` performs it: the last releaser performs the physical unlink. `NotFound` (the file was already gone) is treated as success.
    pub fn remove(&self) -> Result<()> {
        self.stopped.store(true, Ordering::Release);
        self.unlink_on_finalize.store(true, Ordering::Release);

        let prev = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev >= 1, "remove() on an already-released table file: ref-counting bug");

        if prev == 1 {
            self.finalize(true)?;
        } else {
            log::debug!(
                "remove() on {:?} deferred: {} ref(s) still outstanding",
                self.path(),
                prev - 1
            );
        }

        Ok(())
    }

    fn finalize(&self, unlink: bool) -> Result<()> {
        // Exclusive lock: any shared-lock-holding read already in flight blocks this
        // acquisition, which is the "wait for outstanding users" step.
        let mut state = self.state.write().expect("lock is poisoned");

        let was_temp = state.name.is_temp();
        let in_mem = self.reader.in_mem_size();

        self.reader.free_file_handle();
        let freed = self.reader.free_memory() as i64;
        debug_assert!(freed == 0 || freed == in_mem, "reader cache size changed during finalize");

        if let Some(token) = state.lru_token.take() {
            self.registry.remove(token, &self.arc_self());
        }

        if freed > 0 && !was_temp {
            let (order_delta, unorder_delta) = if self.order { (-freed, 0) } else { (0, -freed) };
            self.registry.add_mem(usize::from(state.name.level()), -freed, order_delta, unorder_delta);
        }

        if unlink {
            let _lock = self.acquire_advisory_lock();
            match std::fs::remove_file(&state.path) {
                Ok(()) => {}
                Err(e) if is_not_found(&e) => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Ok(())
    }

    /// Acquires the per-shard advisory lock used to coordinate unlink/rename with external
    /// backup tooling. Best-effort: failure to take the OS-level lock does not block removal
    /// coordination with external backup tooling, not a correctness gate internal readers
    /// depend on.
    fn acquire_advisory_lock(&self) -> Option<std::fs::File> {
        use fs2::FileExt;

        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.lock_path)
            .ok()?;
        lock_file.lock_exclusive().ok()?;
        Some(lock_file)
    }

    // --- Read operations, forwarded with the `FileClosed` contract. ---

    /// Stops the file if `result` is a structural-corruption error, so no further reads are
    /// served against bytes already known to be bad.
    /// Returns `result` unchanged either way.
    fn guard_corruption<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(Error::Corrupt { what, offset }) = &result {
            log::error!(
                "Stopping table file {:?} after corrupt {what} (offset {offset:?})",
                self.path()
            );
            self.stop();
        }
        result
    }

    /// Binary-searches the meta-index for the first entry that could contain `series_id`
    /// within `time_range`.
    pub fn meta_index(&self, series_id: u64, time_range: (i64, i64)) -> Result<Option<(usize, MetaIndex)>> {
        self.check_open()?;
        let result = {
            let _state = self.state.read().expect("lock is poisoned");
            self.reader.meta_index(series_id, time_range)
        };
        self.guard_corruption(result)
    }

    /// Direct accessor into the meta-index.
    pub fn meta_index_at(&self, i: usize) -> Result<Option<MetaIndex>> {
        self.check_open()?;
        let result = {
            let _state = self.state.read().expect("lock is poisoned");
            self.reader.meta_index_at(i)
        };
        self.guard_corruption(result)
    }

    /// Direct accessor into the decoded chunk-meta blocks.
    pub fn chunk_meta_at(&self, i: usize) -> Result<ChunkMeta> {
        self.check_open()?;
        let result = {
            let _state = self.state.read().expect("lock is poisoned");
            self.reader.chunk_meta_at(i)
        };
        self.guard_corruption(result)
    }

    /// Decodes the chunk-meta record for a specific series.
    pub fn chunk_meta(&self, meta_idx: &MetaIndex, buf: &mut Vec<u8>) -> Result<ChunkMeta> {
        self.check_open()?;
        let result = {
            let _state = self.state.read().expect("lock is poisoned");
            self.reader.chunk_meta(meta_idx, buf)
        };
        self.guard_corruption(result)
    }

    /// Bulk-reads every chunk-meta referenced by one meta-index entry.
    pub fn read_chunk_meta_data(&self, meta_idx: &MetaIndex, dst: &mut Vec<ChunkMeta>) -> Result<()> {
        self.check_open()?;
        let result = {
            let _state = self.state.read().expect("lock is poisoned");
            self.reader.read_chunk_meta_data(meta_idx, dst)
        };
        self.guard_corruption(result)
    }

    /// Raw byte read from the data section.
    pub fn read_data(&self, offset: DataOffset, size: DataSize, dst: &mut Vec<u8>) -> Result<()> {
        self.check_open()?;
        let result = {
            let _state = self.state.read().expect("lock is poisoned");
            self.reader.read_data(offset, size, dst)
        };
        self.guard_corruption(result)
    }

    /// Decodes the `segment_index`-th segment of `chunk_meta`.
    pub fn read_at(
        &self,
        chunk_meta: &ChunkMeta,
        segment_index: usize,
        dst: &mut Vec<u8>,
        scratch: &mut Vec<u8>,
    ) -> Result<()> {
        self.check_open()?;
        let result = {
            let _state = self.state.read().expect("lock is poisoned");
            self.reader.read_at(chunk_meta, segment_index, dst, scratch)
        };
        self.guard_corruption(result)
    }

    /// Fast negative check: is `id` within the file's series-id range at all?
    pub fn contains(&self, id: u64) -> Result<bool> {
        self.check_open()?;
        Ok(self.reader.contains(id))
    }

    /// Fast negative check combining series-id and time-range containment.
    pub fn contains_value(&self, id: u64, range: (i64, i64)) -> Result<bool> {
        self.check_open()?;
        Ok(self.reader.contains_value(id, range))
    }

    /// Fast negative check: does `range` overlap the file's time range at all?
    pub fn contains_time(&self, range: (i64, i64)) -> Result<bool> {
        self.check_open()?;
        Ok(self.reader.contains_time(range))
    }

    /// `(min, max)` timestamp in the file.
    pub fn min_max_time(&self) -> Result<(i64, i64)> {
        self.check_open()?;
        Ok(self.reader.min_max_time())
    }

    /// `(min, max)` series id in the file.
    pub fn min_max_series_id(&self) -> Result<(u64, u64)> {
        self.check_open()?;
        Ok(self.reader.min_max_series_id())
    }

    /// Average row count per chunk.
    pub fn average_chunk_rows(&self) -> Result<u64> {
        self.check_open()?;
        self.reader.average_chunk_rows()
    }

    /// Largest row count among any chunk's segments.
    pub fn max_chunk_rows(&self) -> Result<u32> {
        self.check_open()?;
        self.reader.max_chunk_rows()
    }

    // --- Tombstone path: declared but delegated to a higher layer (open question). ---

    /// Not implemented in core; the tombstone path belongs to a sibling subsystem. Returns
    /// [`Error::Unimplemented`] rather than panicking so a higher layer can bind its own
    /// implementation without this crate faulting.
    pub fn delete(&self, _series_ids: &[u64]) -> Result<()> {
        Err(Error::Unimplemented("TableFile::delete"))
    }

    /// See [`TableFile::delete`].
    pub fn delete_range(&self, _series_ids: &[u64], _time_range: (i64, i64)) -> Result<()> {
        Err(Error::Unimplemented("TableFile::delete_range"))
    }

    /// See [`TableFile::delete`].
    pub fn has_tombstones(&self) -> Result<bool> {
        Err(Error::Unimplemented("TableFile::has_tombstones"))
    }

    /// See [`TableFile::delete`].
    pub fn tombstone_files(&self) -> Result<Vec<PathBuf>> {
        Err(Error::Unimplemented("TableFile::tombstone_files"))
    }
}
