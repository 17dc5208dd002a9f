// Copyright (c) openGemini contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! C4 — `TableSet`: an ordered collection of `TableFile`s for one shard/measurement.
//!
//! Guards its member slice with a `RwLock`. Lookups take the shared lock, ref whatever files
//! they care about, then release the lock before using those refs — this discipline avoids
//! deadlocking against a concurrent compaction swap.

use crate::{
    error::Result,
    table_file::TableFile,
};
use std::sync::{atomic::{AtomicUsize, Ordering}, Arc, RwLock};

/// C4 — the ordered collection of table files backing one shard/measurement.
pub struct TableSet {
    files: RwLock<Vec<Arc<TableFile>>>,
    /// Bumped once per `stop_all` call — lets a caller tearing down a shard tell whether
    /// shutdown of this set has already been initiated (and, under concurrent shutdown
    /// attempts, which one went first).
    closing: AtomicUsize,
}

impl Default for TableSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TableSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            files: RwLock::new(Vec::new()),
            closing: AtomicUsize::new(0),
        }
    }

    /// Creates a set from an already-loaded (not necessarily sorted) list of files.
    #[must_use]
    pub fn from_files(files: Vec<Arc<TableFile>>) -> Self {
        Self {
            files: RwLock::new(files),
            closing: AtomicUsize::new(0),
        }
    }

    /// Number of files currently in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.read().expect("lock is poisoned").len()
    }

    /// Returns `true` if the set has no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.read().expect("lock is poisoned").is_empty()
    }

    /// A snapshot of the set's current members, each cloned (bumping the `Arc`'s strong count,
    /// not the file's own ref — callers that intend to read must still call `ref_`/
    /// `ref_handle` on the files they care about) — taken under the shared lock.
    #[must_use]
    pub fn files(&self) -> Vec<Arc<TableFile>> {
        self.files.read().expect("lock is poisoned").clone()
    }

    /// Appends `file` to the set without validating order — callers are expected to call
    /// `sort()` after a bulk append (e.g. loading a shard's files at startup).
    pub fn append(&self, file: Arc<TableFile>) {
        self.files.write().expect("lock is poisoned").push(file);
    }

    /// Sorts the set's members by `(sequence, extent)`.
    pub fn sort(&self) {
        self.files
            .write()
            .expect("lock is poisoned")
            .sort_unstable_by_key(|f| f.name().sort_key());
    }

    /// Binary-searches for `file` by sequence, then linearly scans the (short) equal-sequence
    /// band to match by path — returns its index, or `None` if absent.
    #[must_use]
    pub fn locate(&self, file: &Arc<TableFile>) -> Option<usize> {
        let files = self.files.read().expect("lock is poisoned");
        Self::locate_in(&files, file)
    }

    fn locate_in(files: &[Arc<TableFile>], file: &Arc<TableFile>) -> Option<usize> {
        let target_seq = file.name().sequence();
        let target_path = file.path();

        let start = files.partition_point(|f| f.name().sequence() < target_seq);

        files[start..]
            .iter()
            .take_while(|f| f.name().sequence() == target_seq)
            .position(|f| f.path() == target_path)
            .map(|offset| start + offset)
    }

    /// Removes `file` from the set. Locating a non-member is a programming error — the caller
    /// is expected to have just located it — and traps the process.
    ///
    /// Does not itself touch the file's ref or unlink it on disk; the caller (typically a
    /// compactor swapping old files out) handles that separately.
    pub fn delete_file(&self, file: &Arc<TableFile>) {
        let mut files = self.files.write().expect("lock is poisoned");
        let idx = Self::locate_in(&files, file).unwrap_or_else(|| {
            panic!(
                "delete_file: {:?} is not a member of this table set — ref-counting bug",
                file.path()
            )
        });
        files.remove(idx);
    }

    /// Atomically swaps `old` files out for `new` files under one exclusive lock: removes each
    /// of `old` (each must be a member; see `delete_file`), appends each of `new`, then
    /// re-sorts. Used by the compactor to install the output of a compaction in one step.
    ///
    /// Does not stop/unref `old` or ref `new` — the caller does that around this call so the
    /// set is never observed in a half-swapped state by a concurrent lookup.
    pub fn swap(&self, old: &[Arc<TableFile>], new: Vec<Arc<TableFile>>) {
        let mut files = self.files.write().expect("lock is poisoned");

        for victim in old {
            let idx = Self::locate_in(&files, victim).unwrap_or_else(|| {
                panic!(
                    "swap: {:?} is not a member of this table set — ref-counting bug",
                    victim.path()
                )
            });
            files.remove(idx);
        }

        files.extend(new);
        files.sort_unstable_by_key(|f| f.name().sort_key());
    }

    /// Bumps the closing counter, then stops every member, without closing them — a prelude to
    /// tearing down the shard this set belongs to. Does not remove members from the set.
    pub fn stop_all(&self) {
        self.closing.fetch_add(1, Ordering::AcqRel);
        let files = self.files.read().expect("lock is poisoned");
        for file in files.iter() {
            file.stop();
        }
    }

    /// Number of times `stop_all` has been called on this set.
    #[must_use]
    pub fn closing(&self) -> usize {
        self.closing.load(Ordering::Acquire)
    }

    /// `true` iff the set has at most one file, or every file shares the same `(level,
    /// sequence)` — i.e. they are all extents of one logical file.
    #[must_use]
    pub fn fully_compacted(&self) -> bool {
        let files = self.files.read().expect("lock is poisoned");

        if files.len() <= 1 {
            return true;
        }

        let first = files[0].name().level_sequence();
        files.iter().all(|f| f.name().level_sequence() == first)
    }

    /// Closes and drops every member, releasing their resources. Used when the shard this set
    /// belongs to is being torn down entirely (not a partial swap).
    pub fn close_all(&self) -> Result<()> {
        let files = self.files.write().expect("lock is poisoned");
        for file in files.iter() {
            file.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{evict::EvictRegistry, file_name::FileName, reader::tests_support::write_minimal_fixture};
    use test_log::test;

    fn fixture(dir: &std::path::Path, seq: u64, extent: u16, registry: Arc<EvictRegistry>) -> Arc<TableFile> {
        let basename = format!("{seq:016x}-0-0-{extent}.tssp");
        let path = dir.join(&basename);
        write_minimal_fixture(&path, b"x");
        let name = FileName::parse(&basename, true).expect("parse");
        TableFile::open(name, &path, dir.join("LOCK"), true, false, registry).expect("open")
    }

    /// Scenario A: open two files, locate, check `fully_compacted`, delete one.
    #[test]
    fn scenario_a_locate_and_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(EvictRegistry::new(1));
        let set = TableSet::new();

        let f0 = fixture(dir.path(), 1, 0, registry.clone());
        let f1 = fixture(dir.path(), 2, 0, registry.clone());
        set.append(f0.clone());
        set.append(f1.clone());
        set.sort();

        assert_eq!(set.locate(&f0), Some(0));
        assert_eq!(set.locate(&f1), Some(1));
        assert!(!set.fully_compacted());

        set.delete_file(&f0);
        assert_eq!(set.len(), 1);
        assert_eq!(set.locate(&f1), Some(0));
        assert_eq!(set.locate(&f0), None);
    }

    /// Scenario E: sort by `(sequence, extent)`; `fully_compacted` true for same-`(level,
    /// sequence)` extents.
    #[test]
    fn scenario_e_sort_and_fully_compacted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(EvictRegistry::new(1));
        let set = TableSet::new();

        let a = fixture(dir.path(), 1, 1, registry.clone());
        let b = fixture(dir.path(), 1, 0, registry.clone());
        let c = fixture(dir.path(), 2, 0, registry.clone());

        set.append(a.clone());
        set.append(b.clone());
        set.append(c.clone());
        set.sort();

        let sorted: Vec<_> = set.files().iter().map(|f| f.name().sort_key()).collect();
        assert_eq!(sorted, vec![(1, 0), (1, 1), (2, 0)]);

        let extents_set = TableSet::new();
        let e0 = fixture(dir.path(), 5, 0, registry.clone());
        let e1 = fixture(dir.path(), 5, 1, registry.clone());
        extents_set.append(e0);
        extents_set.append(e1);
        assert!(extents_set.fully_compacted());
    }

    #[test]
    fn fully_compacted_edge_cases() {
        let registry = Arc::new(EvictRegistry::new(1));
        let dir = tempfile::tempdir().expect("tempdir");

        let empty = TableSet::new();
        assert!(empty.fully_compacted());

        let single = TableSet::new();
        single.append(fixture(dir.path(), 1, 0, registry.clone()));
        assert!(single.fully_compacted());

        let multi = TableSet::new();
        multi.append(fixture(dir.path(), 1, 0, registry.clone()));
        multi.append(fixture(dir.path(), 2, 0, registry.clone()));
        assert!(!multi.fully_compacted());
    }

    #[test]
    fn swap_replaces_inputs_with_output_atomically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(EvictRegistry::new(1));
        let set = TableSet::new();

        let a = fixture(dir.path(), 1, 0, registry.clone());
        let b = fixture(dir.path(), 2, 0, registry.clone());
        set.append(a.clone());
        set.append(b.clone());
        set.sort();

        let merged = fixture(dir.path(), 3, 0, registry.clone());
        set.swap(&[a.clone(), b.clone()], vec![merged.clone()]);

        assert_eq!(set.len(), 1);
        assert_eq!(set.locate(&merged), Some(0));
        assert_eq!(set.locate(&a), None);
    }

    #[test]
    fn stop_all_bumps_closing_counter_without_removing_members() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(EvictRegistry::new(1));
        let set = TableSet::new();

        set.append(fixture(dir.path(), 1, 0, registry.clone()));
        set.append(fixture(dir.path(), 2, 0, registry.clone()));
        assert_eq!(set.closing(), 0);

        set.stop_all();
        assert_eq!(set.closing(), 1);
        assert_eq!(set.len(), 2, "stop_all must not remove members");

        set.stop_all();
        assert_eq!(set.closing(), 2);
    }

    /// Property: whatever order a batch of distinct `(sequence, extent)` pairs is appended in,
    /// `sort()` leaves the set in ascending `(sequence, extent)` order and every member is still
    /// `locate`-able afterward.
    #[test]
    fn property_sort_is_total_order_regardless_of_insertion_order() {
        use rand::{seq::SliceRandom, Rng};

        for _ in 0..20 {
            let dir = tempfile::tempdir().expect("tempdir");
            let registry = Arc::new(EvictRegistry::new(1));
            let set = TableSet::new();

            let mut keys: Vec<(u64, u16)> = (0..rand::rng().random_range(2..=12_u64))
                .map(|seq| (seq + 1, 0))
                .collect();
            keys.shuffle(&mut rand::rng());

            let mut members = Vec::new();
            for (seq, extent) in &keys {
                let file = fixture(dir.path(), *seq, *extent, registry.clone());
                set.append(file.clone());
                members.push(file);
            }
            set.sort();

            let sorted_keys: Vec<_> = set.files().iter().map(|f| f.name().sort_key()).collect();
            let mut expected = keys.clone();
            expected.sort_unstable();
            assert_eq!(sorted_keys, expected);

            for file in &members {
                assert!(set.locate(file).is_some(), "every appended member must remain locatable after sort");
            }
        }
    }
}
