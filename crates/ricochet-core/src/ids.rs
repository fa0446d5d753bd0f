//! Program identifiers
//!
//! Every program entity the analysis touches is referred to by a dense
//! `u32` index. Names live in the program representation; the engine only
//! ever compares and hashes these ids.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            /// Position of this id in its owning table
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl From<usize> for $name {
            fn from(index: usize) -> Self {
                Self(index as u32)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

define_id!(
    /// A method (procedure) of the program
    MethodId,
    "m"
);

define_id!(
    /// A program point; statement ids are unique across the whole program
    StmtId,
    "s"
);

define_id!(
    /// A local variable; local ids are unique across the whole program
    Local,
    "v"
);

define_id!(
    /// A reference type
    TypeId,
    "t"
);

define_id!(
    /// A declared instance or static field
    FieldId,
    "f"
);

impl FieldId {
    /// Pseudo-field standing for every element of an array
    pub const ARRAY: FieldId = FieldId(0);

    pub fn is_array(self) -> bool {
        self == Self::ARRAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        assert_eq!(MethodId(3).to_string(), "m3");
        assert_eq!(StmtId(12).to_string(), "s12");
        assert_eq!(Local(0).to_string(), "v0");
        assert_eq!(FieldId::ARRAY.to_string(), "f0");
    }

    #[test]
    fn test_index_round_trip() {
        let id = StmtId::from(42usize);
        assert_eq!(id.index(), 42);
        assert!(FieldId::from(0usize).is_array());
    }
}
