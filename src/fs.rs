// Copyright (c) openGemini contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Small filesystem helpers shared by the manifest and table-file machinery.

use std::{
    io::Write,
    path::Path,
};

/// Magic bytes stamped at the head of every TSSP on-disk structure (trailer, meta-index).
pub const MAGIC_BYTES: [u8; 4] = [b'T', b'S', b'S', b'P'];

/// Subdirectory holding time-ordered table files under a shard root.
pub const ORDERED_DIR: &str = "tssp";

/// Subdirectory holding out-of-order table files under a shard root.
pub const OUT_OF_ORDER_DIR: &str = "out-of-order";

/// Subdirectory holding compaction logs under a shard root.
pub const COMPACT_LOG_DIR: &str = "compact_log";

/// Subdirectory holding downsample logs under a shard root.
pub const DOWNSAMPLE_LOG_DIR: &str = "downsample_log";

/// Suffix of a committed, readable table file.
pub const TSSP_SUFFIX: &str = "tssp";

/// Suffix of a table file that is still being written.
pub const INIT_SUFFIX: &str = "init";

/// Atomically rewrites a file: write to a temp file in the same directory, fsync, then rename
/// over the target. This avoids a window where a crash could leave the file truncated or
/// half-written, which matters for the level/manifest-adjacent bookkeeping this subsystem reads
/// on recovery.
pub fn rewrite_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let folder = path
        .parent()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent"))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(path).map_err(|e| e.error)?;

    #[cfg(not(target_os = "windows"))]
    {
        let file = std::fs::File::open(folder)?;
        file.sync_all()?;
    }

    Ok(())
}

/// Returns `true` if removing `path` should be treated as success: the file is already gone.
pub fn is_not_found(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use test_log::test;

    #[test]
    fn atomic_rewrite() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.txt");

        {
            let mut file = std::fs::File::create(&path)?;
            write!(file, "before")?;
        }

        rewrite_atomic(&path, b"after")?;

        assert_eq!("after", std::fs::read_to_string(&path)?);

        Ok(())
    }
}
