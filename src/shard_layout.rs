// Copyright (c) openGemini contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Resolves the on-disk subdirectories one shard's table files live under (`tssp/`,
//! `tssp/out-of-order/`, `compact_log/`, `downsample_log/`) but gives it no type; every
//! lifecycle operation that needs to know which
//! subdirectory a [`crate::file_name::FileName`] belongs to (based on its `order` bit) goes
//! through this helper instead of re-joining path components ad hoc.

use crate::fs::{COMPACT_LOG_DIR, DOWNSAMPLE_LOG_DIR, ORDERED_DIR, OUT_OF_ORDER_DIR};
use std::path::{Path, PathBuf};

/// The set of paths under one shard's root directory that this subsystem reads from or writes
/// advisory-lock/compaction-log state into.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardLayout {
    root: PathBuf,
}

impl ShardLayout {
    /// Anchors a layout at `root` (the shard's own directory).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The shard's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding time-ordered (`order == true`) table files.
    #[must_use]
    pub fn ordered_dir(&self) -> PathBuf {
        self.root.join(ORDERED_DIR)
    }

    /// Directory holding out-of-order (`order == false`) table files.
    #[must_use]
    pub fn out_of_order_dir(&self) -> PathBuf {
        self.ordered_dir().join(OUT_OF_ORDER_DIR)
    }

    /// The directory a file with the given `order` classification belongs under.
    #[must_use]
    pub fn dir_for(&self, order: bool) -> PathBuf {
        if order {
            self.ordered_dir()
        } else {
            self.out_of_order_dir()
        }
    }

    /// Directory holding compaction logs.
    #[must_use]
    pub fn compact_log_dir(&self) -> PathBuf {
        self.root.join(COMPACT_LOG_DIR)
    }

    /// Directory holding downsample logs.
    #[must_use]
    pub fn downsample_log_dir(&self) -> PathBuf {
        self.root.join(DOWNSAMPLE_LOG_DIR)
    }

    /// The advisory lock file path used around unlink/rename.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.root.join("LOCK")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn resolves_subdirectories_under_root() {
        let layout = ShardLayout::new("/data/db0/rp0/shard7");

        assert_eq!(layout.ordered_dir(), Path::new("/data/db0/rp0/shard7/tssp"));
        assert_eq!(
            layout.out_of_order_dir(),
            Path::new("/data/db0/rp0/shard7/tssp/out-of-order")
        );
        assert_eq!(layout.dir_for(true), layout.ordered_dir());
        assert_eq!(layout.dir_for(false), layout.out_of_order_dir());
        assert_eq!(
            layout.compact_log_dir(),
            Path::new("/data/db0/rp0/shard7/compact_log")
        );
        assert_eq!(
            layout.downsample_log_dir(),
            Path::new("/data/db0/rp0/shard7/downsample_log")
        );
    }
}
