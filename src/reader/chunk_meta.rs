// Copyright (c) openGemini contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-series chunk descriptors: segment offsets and per-segment min/max time.

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// One segment within a chunk: a contiguous run of records for one series, with its own
/// min/max timestamp so range scans can skip whole segments.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentDescriptor {
    /// Byte offset of the segment within the data section.
    pub offset: u64,
    /// Byte size of the segment.
    pub size: u32,
    /// Row count of the segment.
    pub row_count: u32,
    /// Smallest timestamp in the segment (unix nanoseconds).
    pub min_time: i64,
    /// Largest timestamp in the segment (unix nanoseconds).
    pub max_time: i64,
}

impl SegmentDescriptor {
    /// Returns `true` if `[lo, hi]` (inclusive on both ends) overlaps this segment's time range.
    #[must_use]
    pub fn overlaps(&self, lo: i64, hi: i64) -> bool {
        self.min_time <= hi && lo <= self.max_time
    }
}

impl Encode for SegmentDescriptor {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<BigEndian>(self.offset)?;
        writer.write_u32::<BigEndian>(self.size)?;
        writer.write_u32::<BigEndian>(self.row_count)?;
        writer.write_i64::<BigEndian>(self.min_time)?;
        writer.write_i64::<BigEndian>(self.max_time)?;
        Ok(())
    }
}

impl Decode for SegmentDescriptor {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            offset: reader.read_u64::<BigEndian>()?,
            size: reader.read_u32::<BigEndian>()?,
            row_count: reader.read_u32::<BigEndian>()?,
            min_time: reader.read_i64::<BigEndian>()?,
            max_time: reader.read_i64::<BigEndian>()?,
        })
    }
}

/// Descriptor for one series' chunk: a list of segments, each independently time-bounded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkMeta {
    /// The series this chunk belongs to.
    pub series_id: u64,
    /// Segments making up this chunk, in time order.
    pub segments: Vec<SegmentDescriptor>,
}

impl ChunkMeta {
    /// Average row count per segment (for compaction heuristics upstream).
    #[must_use]
    pub fn average_rows(&self) -> u64 {
        if self.segments.is_empty() {
            return 0;
        }
        let total: u64 = self.segments.iter().map(|s| u64::from(s.row_count)).sum();
        total / self.segments.len() as u64
    }

    /// Largest row count among this chunk's segments.
    #[must_use]
    pub fn max_rows(&self) -> u32 {
        self.segments.iter().map(|s| s.row_count).max().unwrap_or(0)
    }

    /// Fetches the `segment_index`-th segment, or an `OutOfRange` error.
    pub fn segment_at(&self, segment_index: usize) -> crate::Result<&SegmentDescriptor> {
        self.segments
            .get(segment_index)
            .ok_or_else(|| crate::Error::OutOfRange {
                what: "segment index",
                index: segment_index,
                len: self.segments.len(),
            })
    }
}

impl Encode for ChunkMeta {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<BigEndian>(self.series_id)?;
        writer.write_u32::<BigEndian>(self.segments.len() as u32)?;
        for segment in &self.segments {
            segment.encode_into(writer)?;
        }
        Ok(())
    }
}

impl Decode for ChunkMeta {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let series_id = reader.read_u64::<BigEndian>()?;
        let count = reader.read_u32::<BigEndian>()?;

        let mut segments = Vec::with_capacity(count as usize);
        for _ in 0..count {
            segments.push(SegmentDescriptor::decode_from(reader)?);
        }

        Ok(Self { series_id, segments })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_log::test;

    fn fixture() -> ChunkMeta {
        ChunkMeta {
            series_id: 7,
            segments: vec![
                SegmentDescriptor {
                    offset: 0,
                    size: 64,
                    row_count: 10,
                    min_time: 0,
                    max_time: 100,
                },
                SegmentDescriptor {
                    offset: 64,
                    size: 64,
                    row_count: 20,
                    min_time: 101,
                    max_time: 200,
                },
            ],
        }
    }

    #[test]
    fn round_trip() {
        let chunk = fixture();
        let bytes = chunk.encode_into_vec();
        let mut cursor = Cursor::new(bytes);
        let decoded = ChunkMeta::decode_from(&mut cursor).expect("should decode");
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn stats() {
        let chunk = fixture();
        assert_eq!(chunk.average_rows(), 15);
        assert_eq!(chunk.max_rows(), 20);
    }

    #[test]
    fn out_of_range_segment_is_bounded_error() {
        let chunk = fixture();
        match chunk.segment_at(5) {
            Err(crate::Error::OutOfRange { index: 5, len: 2, .. }) => {}
            other => panic!("expected OutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn time_overlap_is_inclusive() {
        let seg = SegmentDescriptor {
            offset: 0,
            size: 1,
            row_count: 1,
            min_time: 10,
            max_time: 20,
        };

        assert!(seg.overlaps(20, 30));
        assert!(seg.overlaps(0, 10));
        assert!(!seg.overlaps(21, 30));
        assert!(!seg.overlaps(0, 9));
    }
}
