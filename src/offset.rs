// Copyright (c) openGemini contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Distinct newtypes for byte positions into a table file's data section.
//!
//! `read_data(offset, size, ...)` takes two `u64`s in a row; a bare-`u64` pair lets a caller
//! transpose them without the compiler noticing. One newtype per role instead of one shared
//! across both.

use std::fmt;

macro_rules! byte_newtype {
    ($name:ident) => {
        /// See the module docs.
        #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u64 {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

byte_newtype!(DataOffset);
byte_newtype!(DataSize);

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn conversions_round_trip() {
        let offset = DataOffset::from(42u64);
        assert_eq!(u64::from(offset), 42);
        assert_eq!(offset.to_string(), "42");

        let size = DataSize::from(7u64);
        assert_eq!(u64::from(size), 7);
    }
}
