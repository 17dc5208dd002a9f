// Copyright (c) openGemini contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The fixed-size footer at the end of every committed TSSP table file.

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    fs::MAGIC_BYTES,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// On-disk format version.
pub const CURRENT_VERSION: u16 = 1;

/// Fixed on-disk size of [`Trailer`], including padding. Chosen generously so the layout can
/// grow a few fields without becoming a breaking format change.
pub const TRAILER_SIZE: usize = 96;

/// Fixed-size footer describing a committed table file's layout and summary statistics.
///
/// ```text
/// | data section | meta section (meta-index + chunk-meta blocks) | trailer (fixed) |
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Trailer {
    /// On-disk format version.
    pub version: u16,
    /// Creation time, unix seconds.
    pub created_at: u64,
    /// Byte size of the data section.
    pub data_size: u64,
    /// Byte offset at which the meta-index begins.
    pub meta_index_offset: u64,
    /// Number of entries in the meta-index.
    pub meta_index_count: u32,
    /// Number of chunk-meta blocks referenced by the meta-index.
    pub chunk_meta_block_count: u32,
    /// Smallest series id present in the file.
    pub min_series_id: u64,
    /// Largest series id present in the file.
    pub max_series_id: u64,
    /// Smallest timestamp present in the file (unix nanoseconds).
    pub min_time: i64,
    /// Largest timestamp present in the file (unix nanoseconds).
    pub max_time: i64,
}

impl Encode for Trailer {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_all(&MAGIC_BYTES)?;
        writer.write_u16::<BigEndian>(self.version)?;
        writer.write_u64::<BigEndian>(self.created_at)?;
        writer.write_u64::<BigEndian>(self.data_size)?;
        writer.write_u64::<BigEndian>(self.meta_index_offset)?;
        writer.write_u32::<BigEndian>(self.meta_index_count)?;
        writer.write_u32::<BigEndian>(self.chunk_meta_block_count)?;
        writer.write_u64::<BigEndian>(self.min_series_id)?;
        writer.write_u64::<BigEndian>(self.max_series_id)?;
        writer.write_i64::<BigEndian>(self.min_time)?;
        writer.write_i64::<BigEndian>(self.max_time)?;
        Ok(())
    }
}

impl Decode for Trailer {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut magic = [0u8; MAGIC_BYTES.len()];
        reader.read_exact(&mut magic)?;

        if magic != MAGIC_BYTES {
            return Err(DecodeError::InvalidHeader("Trailer"));
        }

        Ok(Self {
            version: reader.read_u16::<BigEndian>()?,
            created_at: reader.read_u64::<BigEndian>()?,
            data_size: reader.read_u64::<BigEndian>()?,
            meta_index_offset: reader.read_u64::<BigEndian>()?,
            meta_index_count: reader.read_u32::<BigEndian>()?,
            chunk_meta_block_count: reader.read_u32::<BigEndian>()?,
            min_series_id: reader.read_u64::<BigEndian>()?,
            max_series_id: reader.read_u64::<BigEndian>()?,
            min_time: reader.read_i64::<BigEndian>()?,
            max_time: reader.read_i64::<BigEndian>()?,
        })
    }
}

impl Trailer {
    /// Writes the trailer, padded to [`TRAILER_SIZE`].
    pub fn write_into<W: Write>(&self, writer: &mut W) -> crate::Result<()> {
        let mut buf = Vec::with_capacity(TRAILER_SIZE);
        self.encode_into(&mut buf).map_err(|e| match e {
            EncodeError::Io(e) => crate::Error::Io(e),
        })?;

        assert!(
            buf.len() <= TRAILER_SIZE,
            "trailer payload grew past its padded size"
        );
        buf.resize(TRAILER_SIZE, 0);

        writer.write_all(&buf)?;
        Ok(())
    }

    /// Reads the trailer from the last [`TRAILER_SIZE`] bytes of `path`.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        use std::io::{Seek, SeekFrom};

        let mut file = std::fs::File::open(path)?;
        let len = file.metadata()?.len();

        if len < TRAILER_SIZE as u64 {
            return Err(crate::Error::Corrupt {
                what: "trailer",
                offset: Some(0),
            });
        }

        file.seek(SeekFrom::Start(len - TRAILER_SIZE as u64))?;

        Trailer::decode_from(&mut file).map_err(|e| match e {
            DecodeError::InvalidHeader(what) => crate::Error::Corrupt {
                what,
                offset: Some(len - TRAILER_SIZE as u64),
            },
            DecodeError::Io(e) => crate::Error::Io(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_log::test;

    #[test]
    fn round_trip() {
        let trailer = Trailer {
            version: CURRENT_VERSION,
            created_at: 1_700_000_000,
            data_size: 4_096,
            meta_index_offset: 4_096,
            meta_index_count: 3,
            chunk_meta_block_count: 1,
            min_series_id: 1,
            max_series_id: 100,
            min_time: 10,
            max_time: 20,
        };

        let mut buf = vec![];
        trailer.write_into(&mut buf).expect("should write");
        assert_eq!(buf.len(), TRAILER_SIZE);

        let mut cursor = Cursor::new(&buf);
        let decoded = Trailer::decode_from(&mut cursor).expect("should decode");
        assert_eq!(decoded, trailer);
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.tssp");
        std::fs::write(&path, vec![0u8; TRAILER_SIZE]).expect("write");

        match Trailer::from_file(&path) {
            Err(crate::Error::Corrupt { what: "Trailer", .. }) => {}
            other => panic!("expected Corrupt(Trailer), got {other:?}"),
        }
    }
}
