// Copyright (c) openGemini contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! C1 — parsing and encoding of the path-embedded identity of a table file.
//!
//! A table file's basename has the form `<seq:u64-hex>-<level:u16>-<merge:u16>-<extent:u16>`,
//! optionally followed by `.tssp` (committed) or `.init` (still being written). The `order`
//! bit is not part of the basename: it is implied by which shard subdirectory a file lives in
//! (`tssp/` vs `tssp/out-of-order/`), so callers that parse a basename must supply it from
//! context (see [`FileName::parse`]).

use crate::{
    error::{Error, Result},
    fs::{INIT_SUFFIX, TSSP_SUFFIX},
};
use std::fmt;

/// Monotonically increasing identifier assigned at flush/compaction time.
pub type SequenceNo = u64;

/// Level within the compaction hierarchy (0 = freshly flushed).
pub type Level = u16;

/// Merge generation; bumped each time a file participates in a compaction at the same level.
pub type Merge = u16;

/// Secondary index distinguishing multiple files that share `(level, sequence)`.
pub type Extent = u16;

/// The suffix that follows a table file's basename.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileSuffix {
    /// A fully written, readable table file.
    Tssp,
    /// A table file still being written by the flush/compaction writer.
    Init,
}

impl FileSuffix {
    /// Returns the string suffix (without the leading dot).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tssp => TSSP_SUFFIX,
            Self::Init => INIT_SUFFIX,
        }
    }
}

impl fmt::Display for FileSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed and total-ordered identity of a table file.
///
/// Total order is `(sequence, extent)` ascending; `level`, `merge`, and `suffix` are metadata
/// only and never participate in ordering. `order` classifies the file into one of two disjoint
/// ordered sequences within a [`crate::table_set::TableSet`] (time-ordered vs out-of-order data).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileName {
    sequence: SequenceNo,
    level: Level,
    merge: Merge,
    extent: Extent,
    order: bool,
    suffix: FileSuffix,
}

impl FileName {
    /// Constructs a new, well-formed file name.
    #[must_use]
    pub fn new(
        sequence: SequenceNo,
        level: Level,
        merge: Merge,
        extent: Extent,
        order: bool,
        suffix: FileSuffix,
    ) -> Self {
        Self {
            sequence,
            level,
            merge,
            extent,
            order,
            suffix,
        }
    }

    /// Parses a basename of the form `<seq:hex>-<level>-<merge>-<extent>[.tssp|.init]`.
    ///
    /// `order` must be supplied by the caller based on which shard subdirectory the file was
    /// found in — it is not encoded in the basename itself.
    pub fn parse(basename: &str, order: bool) -> Result<Self> {
        let parse_err = |field: &'static str| -> Error {
            Error::FileNameParse {
                basename: basename.to_string(),
                field,
            }
        };

        let (stem, suffix) = match basename.rsplit_once('.') {
            Some((stem, TSSP_SUFFIX)) => (stem, FileSuffix::Tssp),
            Some((stem, INIT_SUFFIX)) => (stem, FileSuffix::Init),
            Some(_) => return Err(parse_err("suffix")),
            // A bare stem with no suffix is accepted as an (implicit) committed file, matching
            // on-disk layouts written before the `.tssp` suffix was introduced.
            None => (basename, FileSuffix::Tssp),
        };

        let mut parts = stem.split('-');

        let sequence = parts
            .next()
            .ok_or_else(|| parse_err("sequence"))
            .and_then(|s| u64::from_str_radix(s, 16).map_err(|_| parse_err("sequence")))?;

        let level = parts
            .next()
            .ok_or_else(|| parse_err("level"))
            .and_then(|s| s.parse::<u16>().map_err(|_| parse_err("level")))?;

        let merge = parts
            .next()
            .ok_or_else(|| parse_err("merge"))
            .and_then(|s| s.parse::<u16>().map_err(|_| parse_err("merge")))?;

        let extent = parts
            .next()
            .ok_or_else(|| parse_err("extent"))
            .and_then(|s| s.parse::<u16>().map_err(|_| parse_err("extent")))?;

        if parts.next().is_some() {
            return Err(parse_err("extra field"));
        }

        Ok(Self {
            sequence,
            level,
            merge,
            extent,
            order,
            suffix,
        })
    }

    /// Returns `true` if `basename` names a temporary (still-being-written) file.
    #[must_use]
    pub fn is_temp_basename(basename: &str) -> bool {
        basename
            .rsplit_once('.')
            .is_some_and(|(_, ext)| ext == INIT_SUFFIX)
    }

    /// The file's sequence number.
    #[must_use]
    pub fn sequence(&self) -> SequenceNo {
        self.sequence
    }

    /// The file's level.
    #[must_use]
    pub fn level(&self) -> Level {
        self.level
    }

    /// The file's merge generation.
    #[must_use]
    pub fn merge(&self) -> Merge {
        self.merge
    }

    /// The file's extent.
    #[must_use]
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Whether this file holds time-ordered data.
    #[must_use]
    pub fn order(&self) -> bool {
        self.order
    }

    /// The file's suffix.
    #[must_use]
    pub fn suffix(&self) -> FileSuffix {
        self.suffix
    }

    /// Returns `true` if this name identifies a still-being-written file.
    #[must_use]
    pub fn is_temp(&self) -> bool {
        self.suffix == FileSuffix::Init
    }

    /// Returns a copy of this name with the suffix replaced (used by `TableFile::rename`
    /// when an `.init` file is committed to `.tssp`).
    #[must_use]
    pub fn with_suffix(mut self, suffix: FileSuffix) -> Self {
        self.suffix = suffix;
        self
    }

    /// The `(sequence, extent)` tuple used for total ordering within one order-class.
    #[must_use]
    pub fn sort_key(&self) -> (SequenceNo, Extent) {
        (self.sequence, self.extent)
    }

    /// The `(level, sequence)` tuple used by [`crate::table_set::TableSet::fully_compacted`] to
    /// detect that several files are just extents of one logical file.
    #[must_use]
    pub fn level_sequence(&self) -> (Level, SequenceNo) {
        (self.level, self.sequence)
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x}-{}-{}-{}.{}",
            self.sequence, self.level, self.merge, self.extent, self.suffix
        )
    }
}

impl std::str::FromStr for FileName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // `FromStr` has no way to supply the order bit from directory context; default to
        // ordered. Callers that care about out-of-order classification should use `parse`.
        Self::parse(s, true)
    }
}

impl PartialOrd for FileName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}
