//! The version word: format revision plus target description.

use std::fmt;

use bitflags::bitflags;

use crate::error::ErrorKind;
use crate::ir::{Endianness, PointerSize, TargetInfo};

/// Wire-format revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Revision {
    V0 = 0,
    V1 = 1,
    #[default]
    V2 = 2,
}

bitflags! {
    /// Behaviours that differ between revisions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FormatFlags: u8 {
        /// Type ids >= 12 are shifted by one to make room for a "Type" plane.
        const TYPES_IN_VALUE_PLANES = 1 << 0;
        /// Null values are encoded as ordinary plane entries.
        const EXPLICIT_NULLS = 1 << 1;
        /// GEP indices use fixed planes instead of a tag in the slot.
        const FIXED_GEP_INDICES = 1 << 2;
        /// Strings are followed by padding to a 4-byte boundary.
        const PADDED_STRINGS = 1 << 3;
    }
}

impl Revision {
    pub const CURRENT: Revision = Revision::V2;

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Revision::V0),
            1 => Some(Revision::V1),
            2 => Some(Revision::V2),
            _ => None,
        }
    }

    pub fn number(self) -> u32 {
        self as u32
    }

    pub fn flags(self) -> FormatFlags {
        match self {
            Revision::V0 => FormatFlags::all(),
            Revision::V1 => FormatFlags::EXPLICIT_NULLS | FormatFlags::FIXED_GEP_INDICES,
            Revision::V2 => FormatFlags::empty(),
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

impl TryFrom<u32> for Revision {
    type Error = ErrorKind;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        Revision::from_u32(v).ok_or(ErrorKind::UnsupportedVersion(v))
    }
}

const BIG_ENDIAN: u32 = 1 << 0;
const POINTER_64: u32 = 1 << 1;
const ANY_ENDIAN: u32 = 1 << 2;
const ANY_POINTER: u32 = 1 << 3;
const REVISION_SHIFT: u32 = 4;

/// A decoded version word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub revision: Revision,
    pub target: TargetInfo,
}

impl Version {
    pub fn new(revision: Revision, target: TargetInfo) -> Self {
        Version { revision, target }
    }

    pub fn flags(&self) -> FormatFlags {
        self.revision.flags()
    }

    pub fn encode(&self) -> u32 {
        let mut word = self.revision.number() << REVISION_SHIFT;
        word |= match self.target.endianness {
            Endianness::Little => 0,
            Endianness::Big => BIG_ENDIAN,
            Endianness::Unspecified => ANY_ENDIAN,
        };
        word |= match self.target.pointer_size {
            PointerSize::Bits32 => 0,
            PointerSize::Bits64 => POINTER_64,
            PointerSize::Unspecified => ANY_POINTER,
        };
        word
    }

    pub fn decode(word: u32) -> Result<Self, ErrorKind> {
        let revision = Revision::try_from(word >> REVISION_SHIFT)?;
        let endianness = if word & ANY_ENDIAN != 0 {
            Endianness::Unspecified
        } else if word & BIG_ENDIAN != 0 {
            Endianness::Big
        } else {
            Endianness::Little
        };
        let pointer_size = if word & ANY_POINTER != 0 {
            PointerSize::Unspecified
        } else if word & POINTER_64 != 0 {
            PointerSize::Bits64
        } else {
            PointerSize::Bits32
        };
        Ok(Version {
            revision,
            target: TargetInfo {
                endianness,
                pointer_size,
            },
        })
    }
}
