// Copyright (c) openGemini contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! C2 — `FileReader`: owns the OS file handle and cached trailer/meta-index/chunk-meta blocks,
//! and serves block and point reads.

mod cache;
pub mod chunk_meta;
pub mod meta_index;
pub mod trailer;

use crate::{
    coding::Decode,
    error::{Error, Result},
    offset::{DataOffset, DataSize},
};
use cache::DataCache;
pub use chunk_meta::{ChunkMeta, SegmentDescriptor};
pub use meta_index::{MetaIndex, MetaIndexBlock};
use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicI64, AtomicUsize, Ordering},
        Mutex, RwLock,
    },
};
pub use trailer::Trailer;

/// RAII guard tracking that a caller is mid-read against the reader's cache, so
/// [`FileReader::free_memory`] can tell that clearing it right now would race an in-flight
/// `read_data`.
struct PinGuard<'a>(&'a AtomicUsize);

impl<'a> PinGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for PinGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Components loaded by [`FileReader::load_components`]: the meta-index plus every chunk-meta
/// it points at (but not the data bytes themselves).
#[derive(Default)]
struct Components {
    meta_index: MetaIndexBlock,
    chunk_metas: Vec<ChunkMeta>,
}

/// Owns the on-disk file handle (lazily reopened after [`FileReader::free_file_handle`]) and the
/// optional in-memory data cache.
pub struct FileReader {
    path: Mutex<PathBuf>,
    file: Mutex<Option<File>>,
    trailer: Trailer,
    components: RwLock<Option<Components>>,
    cache: RwLock<DataCache>,
    in_mem_size: AtomicI64,
    pin_count: AtomicUsize,
    #[cfg(feature = "metrics")]
    metrics: crate::metrics::Metrics,
}

impl FileReader {
    /// Opens `path`, reading its trailer. If `cache_data` is set, immediately loads the data
    /// section into memory (used for small files the caller expects to re-read right away).
    pub fn open(path: &Path, cache_data: bool) -> Result<Self> {
        log::debug!("Opening table file reader for {path:?}");

        let trailer = Trailer::from_file(path)?;
        let file = File::open(path)?;

        let reader = Self {
            path: Mutex::new(path.to_path_buf()),
            file: Mutex::new(Some(file)),
            trailer,
            components: RwLock::new(None),
            cache: RwLock::new(DataCache::default()),
            in_mem_size: AtomicI64::new(0),
            pin_count: AtomicUsize::new(0),
            #[cfg(feature = "metrics")]
            metrics: crate::metrics::Metrics::default(),
        };

        if cache_data {
            reader.load_into_memory()?;
        }

        Ok(reader)
    }

    /// Cache-effectiveness counters for this reader. Only present with the `metrics` feature.
    #[cfg(feature = "metrics")]
    #[must_use]
    pub fn metrics(&self) -> &crate::metrics::Metrics {
        &self.metrics
    }

    /// Pins the reader's cache, preventing a concurrent `free_memory` from reclaiming it.
    /// Used by `TableFile::ref_reader` to let a caller hold a borrow across several `read_data`
    /// calls without the arena disappearing mid-scan.
    pub fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Releases a pin taken with [`FileReader::pin`].
    pub fn unpin(&self) {
        self.pin_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// The file's trailer.
    #[must_use]
    pub fn trailer(&self) -> &Trailer {
        &self.trailer
    }

    /// Bytes currently held by this reader's in-memory cache.
    #[must_use]
    pub fn in_mem_size(&self) -> i64 {
        self.in_mem_size.load(Ordering::Acquire)
    }

    /// The path this reader currently reads from. May change across a `rename`.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.path.lock().expect("lock is poisoned").clone()
    }

    /// Renames the underlying file on disk and updates the path this reader reads from.
    /// Drops any open file handle so the next read reopens at the new path.
    pub fn rename(&self, new_path: &Path) -> Result<()> {
        let mut path = self.path.lock().expect("lock is poisoned");
        std::fs::rename(&*path, new_path)?;
        *path = new_path.to_path_buf();
        *self.file.lock().expect("lock is poisoned") = None;
        Ok(())
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut File) -> std::io::Result<T>) -> Result<T> {
        let mut guard = self.file.lock().expect("lock is poisoned");

        if guard.is_none() {
            let path = self.path.lock().expect("lock is poisoned").clone();
            log::trace!("Reopening file handle for {path:?}");
            *guard = Some(File::open(&path)?);
        }

        #[allow(clippy::expect_used)]
        let file = guard.as_mut().expect("just reopened above");
        Ok(f(file)?)
    }

    fn read_at_raw(&self, offset: u64, size: u64) -> Result<Vec<u8>> {
        self.with_file(|file| {
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = vec![0u8; size as usize];
            file.read_exact(&mut buf)?;
            Ok(buf)
        })
    }

    /// Loads the trailer's meta-index and every chunk-meta it references, but not data bytes.
    pub fn load_components(&self) -> Result<()> {
        {
            let existing = self.components.read().expect("lock is poisoned");
            if existing.is_some() {
                return Ok(());
            }
        }

        let raw = self.read_at_raw(
            self.trailer.meta_index_offset,
            u64::from(self.trailer.meta_index_count) * meta_index_entry_size(),
        )?;
        let mut cursor = std::io::Cursor::new(&raw);
        let meta_index = MetaIndexBlock::decode_count(&mut cursor, self.trailer.meta_index_count)
            .map_err(|e| match e {
                crate::coding::DecodeError::Io(e) => Error::Io(e),
                crate::coding::DecodeError::InvalidHeader(what) => Error::Corrupt {
                    what,
                    offset: Some(self.trailer.meta_index_offset),
                },
            })?;

        let mut chunk_metas = Vec::with_capacity(meta_index.len());
        for entry in meta_index.as_slice() {
            chunk_metas.push(self.decode_chunk_meta_at(entry.meta_offset)?);
        }

        *self.components.write().expect("lock is poisoned") = Some(Components {
            meta_index,
            chunk_metas,
        });

        Ok(())
    }

    fn decode_chunk_meta_at(&self, offset: u64) -> Result<ChunkMeta> {
        // Chunk-meta records are variable length (series id + segment count + segments), so we
        // read a generous header first, then decode in place. In this subsystem they are always
        // small (one series' segment list), so a single bounded read suffices.
        const MAX_CHUNK_META_SIZE: u64 = 64 * 1024;
        let remaining = self.trailer.meta_index_offset.saturating_sub(offset);
        let read_len = remaining.min(MAX_CHUNK_META_SIZE);

        let raw = self.read_at_raw(offset, read_len)?;
        let mut cursor = std::io::Cursor::new(&raw);
        ChunkMeta::decode_from(&mut cursor).map_err(|e| match e {
            crate::coding::DecodeError::Io(e) => Error::Io(e),
            crate::coding::DecodeError::InvalidHeader(what) => Error::Corrupt {
                what,
                offset: Some(offset),
            },
        })
    }

    fn with_components<T>(&self, f: impl FnOnce(&Components) -> T) -> Result<T> {
        self.load_components()?;
        let guard = self.components.read().expect("lock is poisoned");
        #[allow(clippy::expect_used)]
        Ok(f(guard.as_ref().expect("just loaded above")))
    }

    /// Binary-searches the meta-index for the first entry that could contain `series_id`
    /// within `time_range` (inclusive on both ends). Returns `None` on a definite miss.
    pub fn meta_index(
        &self,
        series_id: u64,
        time_range: (i64, i64),
    ) -> Result<Option<(usize, MetaIndex)>> {
        if !self.contains_value(series_id, time_range) {
            return Ok(None);
        }

        self.with_components(|c| c.meta_index.find(series_id))
    }

    /// Direct accessor into the meta-index.
    pub fn meta_index_at(&self, i: usize) -> Result<Option<MetaIndex>> {
        self.with_components(|c| c.meta_index.at(i).copied())
    }

    /// Direct accessor into the decoded chunk-meta blocks.
    pub fn chunk_meta_at(&self, i: usize) -> Result<ChunkMeta> {
        self.with_components(|c| (c.chunk_metas.get(i).cloned(), c.chunk_metas.len()))
            .and_then(|(found, len)| {
                found.ok_or(Error::OutOfRange {
                    what: "chunk-meta index",
                    index: i,
                    len,
                })
            })
    }

    /// Decodes the chunk-meta record for a specific series, given its meta-index entry.
    /// `buf` is reusable scratch for the raw read.
    pub fn chunk_meta(&self, meta_idx: &MetaIndex, buf: &mut Vec<u8>) -> Result<ChunkMeta> {
        buf.clear();
        let chunk = self.decode_chunk_meta_at(meta_idx.meta_offset)?;
        Ok(chunk)
    }

    /// Bulk-reads every chunk-meta referenced by one meta-index entry. In this subsystem one
    /// meta-index entry maps to exactly one chunk-meta record, so this is a thin convenience
    /// over [`FileReader::chunk_meta`].
    pub fn read_chunk_meta_data(&self, meta_idx: &MetaIndex, dst: &mut Vec<ChunkMeta>) -> Result<()> {
        dst.clear();
        let mut scratch = Vec::new();
        dst.push(self.chunk_meta(meta_idx, &mut scratch)?);
        Ok(())
    }

    /// Raw byte read from the data section, satisfied from the in-memory cache if loaded.
    pub fn read_data(&self, offset: DataOffset, size: DataSize, dst: &mut Vec<u8>) -> Result<()> {
        let _pin = PinGuard::new(&self.pin_count);

        {
            let cache = self.cache.read().expect("lock is poisoned");
            if !cache.is_empty() {
                let bytes = cache.read(offset.0, size.0).ok_or(Error::OutOfRange {
                    what: "data offset",
                    index: offset.0 as usize,
                    len: cache.len(),
                })?;
                dst.clear();
                dst.extend_from_slice(bytes);
                #[cfg(feature = "metrics")]
                self.metrics.data_reads_cached.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }

        let raw = self.read_at_raw(offset.0, size.0)?;
        dst.clear();
        dst.extend_from_slice(&raw);
        #[cfg(feature = "metrics")]
        self.metrics.data_reads_io.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Decodes the `segment_index`-th segment of `chunk_meta`. `scratch` is reusable across
    /// calls.
    pub fn read_at(
        &self,
        chunk_meta: &ChunkMeta,
        segment_index: usize,
        dst: &mut Vec<u8>,
        scratch: &mut Vec<u8>,
    ) -> Result<()> {
        let segment = chunk_meta.segment_at(segment_index)?;
        scratch.clear();
        self.read_data(DataOffset(segment.offset), DataSize(u64::from(segment.size)), dst)
    }

    /// Fast negative check: is `id` within the file's series-id range at all?
    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        (self.trailer.min_series_id..=self.trailer.max_series_id).contains(&id)
    }

    /// Fast negative check combining series-id and time-range containment.
    #[must_use]
    pub fn contains_value(&self, id: u64, range: (i64, i64)) -> bool {
        self.contains(id) && self.contains_time(range)
    }

    /// Fast negative check: does `range` (inclusive) overlap the file's time range at all?
    #[must_use]
    pub fn contains_time(&self, range: (i64, i64)) -> bool {
        let (lo, hi) = range;
        self.trailer.min_time <= hi && lo <= self.trailer.max_time
    }

    /// Reads all data bytes into the cache. Idempotent.
    pub fn load_into_memory(&self) -> Result<()> {
        {
            let cache = self.cache.read().expect("lock is poisoned");
            if !cache.is_empty() {
                return Ok(());
            }
        }

        let data = self.read_at_raw(0, self.trailer.data_size)?;
        let size = data.len() as i64;

        let mut cache = self.cache.write().expect("lock is poisoned");
        if cache.is_empty() {
            *cache = DataCache::load(data);
            self.in_mem_size.store(size, Ordering::Release);
        }

        Ok(())
    }

    /// Drops the data cache; keeps the file handle and loaded components. Returns the number of
    /// bytes freed. Will not free while a `read_data` call is pinning the cache; the caller
    /// (`TableFile`) is responsible for deferring in that case.
    pub fn free_memory(&self) -> usize {
        if self.pin_count.load(Ordering::Acquire) > 0 {
            return 0;
        }

        let mut cache = self.cache.write().expect("lock is poisoned");
        let freed = cache.clear();
        self.in_mem_size.store(0, Ordering::Release);
        freed
    }

    /// Drops the OS file handle; keeps components and cache. Lazily reopened on next disk read.
    pub fn free_file_handle(&self) {
        *self.file.lock().expect("lock is poisoned") = None;
    }

    /// `(min, max)` timestamp in the file.
    #[must_use]
    pub fn min_max_time(&self) -> (i64, i64) {
        (self.trailer.min_time, self.trailer.max_time)
    }

    /// `(min, max)` series id in the file.
    #[must_use]
    pub fn min_max_series_id(&self) -> (u64, u64) {
        (self.trailer.min_series_id, self.trailer.max_series_id)
    }

    /// Average row count per chunk across all loaded chunk-metas. Requires components to be
    /// loaded (loads them if necessary).
    pub fn average_chunk_rows(&self) -> Result<u64> {
        self.with_components(|c| {
            if c.chunk_metas.is_empty() {
                return 0;
            }
            let total: u64 = c.chunk_metas.iter().map(ChunkMeta::average_rows).sum();
            total / c.chunk_metas.len() as u64
        })
    }

    /// Largest row count among any chunk's segments.
    pub fn max_chunk_rows(&self) -> Result<u32> {
        self.with_components(|c| c.chunk_metas.iter().map(ChunkMeta::max_rows).max().unwrap_or(0))
    }
}

fn meta_index_entry_size() -> u64 {
    // 5 * u64
    5 * 8
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{coding::Encode, fs::MAGIC_BYTES};
    use std::io::Write;
    use test_log::test;

    /// Writes a minimal, valid table file: one series, one chunk with one segment.
    fn write_fixture(path: &Path) -> (MetaIndex, ChunkMeta) {
        let data = b"hello world, this is segment data".to_vec();

        let mut file = std::fs::File::create(path).expect("create");

        file.write_all(&data).expect("write data");
        let data_size = data.len() as u64;

        let meta_offset = data_size;
        let chunk = ChunkMeta {
            series_id: 42,
            segments: vec![SegmentDescriptor {
                offset: 0,
                size: data.len() as u32,
                row_count: 1,
                min_time: 10,
                max_time: 20,
            }],
        };
        let chunk_bytes = chunk.encode_into_vec();
        file.write_all(&chunk_bytes).expect("write chunk meta");

        let meta_index_offset = meta_offset + chunk_bytes.len() as u64;
        let meta_entry = MetaIndex {
            series_id_min: 42,
            series_id_max: 42,
            data_offset: 0,
            data_size,
            meta_offset,
        };
        let mut meta_index_bytes = vec![];
        meta_entry.encode_into(&mut meta_index_bytes).expect("encode");
        file.write_all(&meta_index_bytes).expect("write meta index");

        let trailer = Trailer {
            version: trailer::CURRENT_VERSION,
            created_at: 1,
            data_size,
            meta_index_offset,
            meta_index_count: 1,
            chunk_meta_block_count: 1,
            min_series_id: 42,
            max_series_id: 42,
            min_time: 10,
            max_time: 20,
        };
        trailer.write_into(&mut file).expect("write trailer");

        // Sanity: magic bytes present.
        let _ = MAGIC_BYTES;

        (meta_entry, chunk)
    }

    #[test]
    fn open_and_point_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("0000000000000001-0-0-0.tssp");
        let (meta_entry, chunk) = write_fixture(&path);

        let reader = FileReader::open(&path, false).expect("open");

        assert!(reader.contains(42));
        assert!(!reader.contains(43));
        assert!(reader.contains_time((15, 25)));
        assert!(!reader.contains_time((21, 30)));

        let found = reader.meta_index(42, (10, 20)).expect("lookup").expect("hit");
        assert_eq!(found.1, meta_entry);

        assert!(reader.meta_index(43, (10, 20)).expect("lookup").is_none());

        let decoded_chunk = reader.chunk_meta_at(0).expect("chunk at 0");
        assert_eq!(decoded_chunk, chunk);

        let mut dst = vec![];
        let mut scratch = vec![];
        reader.read_at(&chunk, 0, &mut dst, &mut scratch).expect("read segment");
        assert_eq!(dst, b"hello world, this is segment data");

        match reader.read_at(&chunk, 5, &mut dst, &mut scratch) {
            Err(Error::OutOfRange { .. }) => {}
            other => panic!("expected OutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn load_into_memory_then_free() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("0000000000000001-0-0-0.tssp");
        write_fixture(&path);

        let reader = FileReader::open(&path, false).expect("open");
        assert_eq!(reader.in_mem_size(), 0);

        reader.load_into_memory().expect("load");
        assert!(reader.in_mem_size() > 0);

        // Idempotent.
        reader.load_into_memory().expect("load again");

        let freed = reader.free_memory();
        assert!(freed > 0);
        assert_eq!(reader.in_mem_size(), 0);
    }

    #[test]
    fn free_file_handle_reopens_lazily() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("0000000000000001-0-0-0.tssp");
        let (_, chunk) = write_fixture(&path);

        let reader = FileReader::open(&path, false).expect("open");
        reader.free_file_handle();

        let mut dst = vec![];
        let mut scratch = vec![];
        reader
            .read_at(&chunk, 0, &mut dst, &mut scratch)
            .expect("should reopen and read");
        assert_eq!(dst, b"hello world, this is segment data");
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn metrics_distinguish_cached_from_disk_reads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("0000000000000001-0-0-0.tssp");
        let (_, chunk) = write_fixture(&path);

        let reader = FileReader::open(&path, false).expect("open");
        let mut dst = vec![];
        let mut scratch = vec![];

        reader.read_at(&chunk, 0, &mut dst, &mut scratch).expect("disk read");
        assert_eq!(reader.metrics().data_reads_io(), 1);
        assert_eq!(reader.metrics().data_reads_cached(), 0);

        reader.load_into_memory().expect("load");
        reader.read_at(&chunk, 0, &mut dst, &mut scratch).expect("cached read");
        assert_eq!(reader.metrics().data_reads_cached(), 1);
    }
}
