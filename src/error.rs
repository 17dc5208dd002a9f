// Copyright (c) openGemini contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Crate-wide error type.

use crate::coding::DecodeError;

/// Errors that can occur while operating on TSSP table files.
#[derive(Debug)]
pub enum Error {
    /// I/O error, with the path that was being operated on if known.
    Io(std::io::Error),

    /// A file's basename did not match the `<seq>-<level>-<merge>-<extent>[.ext]` grammar.
    FileNameParse {
        /// The basename that failed to parse.
        basename: String,
        /// Which field of the grammar failed.
        field: &'static str,
    },

    /// Deserialization of an on-disk structure failed.
    Decode(DecodeError),

    /// The trailer, meta-index, or chunk-meta block failed structural validation.
    Corrupt {
        /// Which structure was being validated.
        what: &'static str,
        /// Byte offset at which validation failed, if known.
        offset: Option<u64>,
    },

    /// A segment index or meta-index position was out of bounds.
    OutOfRange {
        /// What kind of index was out of range.
        what: &'static str,
        /// The index that was requested.
        index: usize,
        /// The valid length.
        len: usize,
    },

    /// Operation attempted on a file that has already been stopped.
    FileClosed,

    /// The file was not found on disk (only meaningful on the remove path, where it is
    /// treated as success).
    NotFound,

    /// Declared in the core but delegated to a higher layer (tombstone path).
    Unimplemented(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::FileNameParse { basename, field } => {
                write!(f, "invalid table file name {basename:?}: bad {field}")
            }
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::Corrupt { what, offset } => match offset {
                Some(offset) => write!(f, "corrupt {what} at offset {offset}"),
                None => write!(f, "corrupt {what}"),
            },
            Self::OutOfRange { what, index, len } => {
                write!(f, "{what} index {index} out of range (len {len})")
            }
            Self::FileClosed => write!(f, "operation attempted on a closed table file"),
            Self::NotFound => write!(f, "file not found"),
            Self::Unimplemented(what) => write!(f, "{what}: not implemented in core; delegated"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
