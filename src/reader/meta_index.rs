// Copyright (c) openGemini contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The sorted-by-series-id index at the end of a table file's meta section.

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// One entry of the meta-index: the series-id range covered by a chunk-meta block, and where
/// that block's data and chunk-meta bytes live.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MetaIndex {
    /// Smallest series id covered by this entry.
    pub series_id_min: u64,
    /// Largest series id covered by this entry.
    pub series_id_max: u64,
    /// Byte offset of the associated data within the data section.
    pub data_offset: u64,
    /// Byte size of the associated data.
    pub data_size: u64,
    /// Byte offset of the chunk-meta block describing this entry's series.
    pub meta_offset: u64,
}

impl MetaIndex {
    /// Returns `true` if `series_id` falls within this entry's range.
    #[must_use]
    pub fn contains_series(&self, series_id: u64) -> bool {
        (self.series_id_min..=self.series_id_max).contains(&series_id)
    }
}

impl Encode for MetaIndex {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<BigEndian>(self.series_id_min)?;
        writer.write_u64::<BigEndian>(self.series_id_max)?;
        writer.write_u64::<BigEndian>(self.data_offset)?;
        writer.write_u64::<BigEndian>(self.data_size)?;
        writer.write_u64::<BigEndian>(self.meta_offset)?;
        Ok(())
    }
}

impl Decode for MetaIndex {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            series_id_min: reader.read_u64::<BigEndian>()?,
            series_id_max: reader.read_u64::<BigEndian>()?,
            data_offset: reader.read_u64::<BigEndian>()?,
            data_size: reader.read_u64::<BigEndian>()?,
            meta_offset: reader.read_u64::<BigEndian>()?,
        })
    }
}

/// The full sorted meta-index of a table file, held in memory once loaded.
#[derive(Clone, Debug, Default)]
pub struct MetaIndexBlock {
    entries: Vec<MetaIndex>,
}

impl MetaIndexBlock {
    /// Wraps an already-sorted vector of entries.
    #[must_use]
    pub fn new(entries: Vec<MetaIndex>) -> Self {
        debug_assert!(
            entries.windows(2).all(|w| w[0].series_id_min <= w[1].series_id_min),
            "meta-index entries must be sorted by series id"
        );
        Self { entries }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Direct accessor by index.
    #[must_use]
    pub fn at(&self, i: usize) -> Option<&MetaIndex> {
        self.entries.get(i)
    }

    /// Binary-searches for the first entry that could contain `series_id`.
    ///
    /// Returns `None` if `series_id` is outside every entry's range (a definite miss); the
    /// caller is not expected to distinguish "not found" from "out of range" — both are a miss.
    #[must_use]
    pub fn find(&self, series_id: u64) -> Option<(usize, MetaIndex)> {
        if self.entries.is_empty() {
            return None;
        }

        // Partition point: first entry whose `series_id_max` is >= series_id.
        let idx = self
            .entries
            .partition_point(|e| e.series_id_max < series_id);

        let entry = self.entries.get(idx)?;

        if entry.contains_series(series_id) {
            Some((idx, *entry))
        } else {
            None
        }
    }

    /// Reads all entries as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[MetaIndex] {
        &self.entries
    }
}

impl Encode for MetaIndexBlock {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        for entry in &self.entries {
            entry.encode_into(writer)?;
        }
        Ok(())
    }
}

impl MetaIndexBlock {
    /// Reads `count` entries from `reader`.
    pub fn decode_count<R: Read>(reader: &mut R, count: u32) -> Result<Self, DecodeError> {
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entries.push(MetaIndex::decode_from(reader)?);
        }
        Ok(Self { entries })
    }
}
