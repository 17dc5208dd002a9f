// Copyright (c) openGemini contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Builder for opening a shard's table files: a chained builder collects the knobs, then
//! `open()` does the actual directory recovery.

use crate::{
    error::{Error, Result},
    evict::EvictRegistry,
    file_name::FileName,
    shard_layout::ShardLayout,
    table_file::TableFile,
    table_set::TableSet,
};
use std::{path::Path, sync::Arc};

const DEFAULT_LEVEL_COUNT: usize = 7;

/// A shard's table set, its eviction registry, and the directory layout it was recovered from —
/// everything a query/compaction caller needs to start reading and refcounting files.
pub struct Shard {
    /// The recovered (sorted) set of time-ordered table files.
    pub ordered: TableSet,
    /// The recovered (sorted) set of out-of-order table files.
    pub out_of_order: TableSet,
    /// Per-level LRU lists and memory counters shared by every file in this shard.
    pub registry: Arc<EvictRegistry>,
    /// The directory layout this shard was opened from.
    pub layout: ShardLayout,
}

/// Builder for recovering one shard's table files from disk.
///
/// ```no_run
/// # fn main() -> tssp::Result<()> {
/// use tssp::config::ShardConfig;
///
/// let shard = ShardConfig::new("/data/db0/rp0/shard7")
///     .level_count(5)
///     .cache_small_files_under(64 * 1_024)
///     .open()?;
///
/// println!("{} ordered, {} out-of-order", shard.ordered.len(), shard.out_of_order.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ShardConfig {
    layout: ShardLayout,
    level_count: usize,
    cache_small_files_under: u64,
}

impl ShardConfig {
    /// Starts a builder anchored at `root` (the shard's own directory).
    #[must_use]
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            layout: ShardLayout::new(root),
            level_count: DEFAULT_LEVEL_COUNT,
            cache_small_files_under: 0,
        }
    }

    /// Sets the number of compaction levels this shard's `EvictRegistry` tracks.
    ///
    /// Defaults to 7.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    #[must_use]
    pub fn level_count(mut self, n: usize) -> Self {
        assert!(n > 0, "level_count must be >= 1");
        self.level_count = n;
        self
    }

    /// Table files at or under `bytes` are fully cached into memory at open time instead of
    /// lazily on first read, mirroring `TableFile::open`'s `cache_data` flag: a pre-sized cache
    /// bucket for small compaction outputs expected to be re-read immediately.
    ///
    /// Defaults to 0 (nothing pre-cached).
    #[must_use]
    pub fn cache_small_files_under(mut self, bytes: u64) -> Self {
        self.cache_small_files_under = bytes;
        self
    }

    /// Recovers the shard: ensures its subdirectories exist, then opens every committed
    /// (`.tssp`) file found under `tssp/` and `tssp/out-of-order/`, classifying each by which
    /// directory it came from. Files still being written (`.init`) are left in
    /// place and skipped — recovering them is the writer subsystem's job, not this crate's.
    pub fn open(self) -> Result<Shard> {
        log::info!("Recovering shard at {}", self.layout.root().display());

        std::fs::create_dir_all(self.layout.ordered_dir())?;
        std::fs::create_dir_all(self.layout.out_of_order_dir())?;
        std::fs::create_dir_all(self.layout.compact_log_dir())?;
        std::fs::create_dir_all(self.layout.downsample_log_dir())?;

        let registry = Arc::new(EvictRegistry::new(self.level_count));

        let ordered = TableSet::from_files(self.recover_dir(&self.layout.ordered_dir(), true, &registry)?);
        ordered.sort();

        let out_of_order =
            TableSet::from_files(self.recover_dir(&self.layout.out_of_order_dir(), false, &registry)?);
        out_of_order.sort();

        log::debug!(
            "Recovered {} ordered, {} out-of-order table file(s) at {}",
            ordered.len(),
            out_of_order.len(),
            self.layout.root().display()
        );

        Ok(Shard {
            ordered,
            out_of_order,
            registry,
            layout: self.layout,
        })
    }

    fn recover_dir(&self, dir: &Path, is_order: bool, registry: &Arc<EvictRegistry>) -> Result<Vec<Arc<TableFile>>> {
        let mut files = Vec::new();

        for dirent in std::fs::read_dir(dir)? {
            let dirent = dirent?;
            let file_name = dirent.file_name();

            // `tssp/out-of-order/` nests inside `tssp/`; skip it (and any other
            // subdirectory) rather than trying to parse it as a basename.
            if dirent.file_type()?.is_dir() {
                continue;
            }

            // https://en.wikipedia.org/wiki/.DS_Store
            if file_name == ".DS_Store" {
                continue;
            }

            let basename = file_name.to_str().ok_or_else(|| {
                log::error!("invalid table file name {file_name:?} in {}", dir.display());
                Error::FileNameParse {
                    basename: file_name.to_string_lossy().into_owned(),
                    field: "utf8",
                }
            })?;

            if FileName::is_temp_basename(basename) {
                log::debug!("Skipping unfinished table file {basename} during recovery");
                continue;
            }

            let name = FileName::parse(basename, is_order)?;
            let path = dirent.path();
            let cache_data = std::fs::metadata(&path)?.len() <= self.cache_small_files_under;

            let file = TableFile::open(name, &path, self.layout.lock_path(), is_order, cache_data, registry.clone())?;
            files.push(file);
        }

        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::tests_support::write_minimal_fixture;
    use test_log::test;

    #[test]
    fn recovers_ordered_and_out_of_order_files_skipping_temp() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = ShardLayout::new(dir.path());
        std::fs::create_dir_all(layout.ordered_dir()).expect("mkdir ordered");
        std::fs::create_dir_all(layout.out_of_order_dir()).expect("mkdir unordered");

        write_minimal_fixture(&layout.ordered_dir().join("0000000000000001-0-0-0.tssp"), b"a");
        write_minimal_fixture(&layout.ordered_dir().join("0000000000000002-0-0-0.tssp"), b"bb");
        write_minimal_fixture(&layout.ordered_dir().join("0000000000000003-0-0-0.init"), b"unfinished");
        write_minimal_fixture(
            &layout.out_of_order_dir().join("0000000000000001-0-0-0.tssp"),
            b"c",
        );

        let shard = ShardConfig::new(dir.path()).open().expect("open");

        assert_eq!(shard.ordered.len(), 2);
        assert_eq!(shard.out_of_order.len(), 1);
        assert!(shard.ordered.files().iter().all(|f| f.order()));
        assert!(shard.out_of_order.files().iter().all(|f| !f.order()));
    }

    #[test]
    fn open_creates_layout_for_a_brand_new_shard() {
        let dir = tempfile::tempdir().expect("tempdir");
        let shard = ShardConfig::new(dir.path())
            .level_count(3)
            .open()
            .expect("open empty shard");

        assert!(shard.ordered.is_empty());
        assert!(shard.out_of_order.is_empty());
        assert!(dir.path().join("tssp").is_dir());
        assert!(dir.path().join("tssp/out-of-order").is_dir());
        assert!(dir.path().join("compact_log").is_dir());
    }
}
