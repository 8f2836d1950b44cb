//! pack v2 codec
//!
//! the wire-batching format: a `PACK` header, per-object variable-length
//! headers, zlib-compressed payloads (possibly deltified against another
//! pack entry or a referenced oid), and a trailing SHA-1. the companion
//! index (v2) gives fanout + binary-search lookup by oid.

pub mod delta;
pub mod emit;
pub mod index;
pub mod parse;
pub mod varint;

pub use emit::{emit_pack, PackedEntry};
pub use index::{PackIndex, PackIndexEntry};
pub use parse::{parse_pack, PackObject};

use crate::error::{Error, Result};
use crate::object::Kind;

/// pack magic bytes
pub const PACK_MAGIC: [u8; 4] = *b"PACK";
/// the only supported pack version
pub const PACK_VERSION: u32 = 2;

/// object type codes on the pack wire
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackObjectType {
    Commit,
    Tree,
    Blob,
    Tag,
    /// delta whose base is another pack entry at a relative negative offset
    OfsDelta,
    /// delta whose base is an oid
    RefDelta,
}

impl PackObjectType {
    pub fn code(&self) -> u8 {
        match self {
            PackObjectType::Commit => 1,
            PackObjectType::Tree => 2,
            PackObjectType::Blob => 3,
            PackObjectType::Tag => 4,
            PackObjectType::OfsDelta => 6,
            PackObjectType::RefDelta => 7,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(PackObjectType::Commit),
            2 => Ok(PackObjectType::Tree),
            3 => Ok(PackObjectType::Blob),
            4 => Ok(PackObjectType::Tag),
            6 => Ok(PackObjectType::OfsDelta),
            7 => Ok(PackObjectType::RefDelta),
            other => Err(Error::PackFormat(format!("unknown object type {other}"))),
        }
    }

    /// the plain object kind, for non-delta types
    pub fn kind(&self) -> Option<Kind> {
        match self {
            PackObjectType::Commit => Some(Kind::Commit),
            PackObjectType::Tree => Some(Kind::Tree),
            PackObjectType::Blob => Some(Kind::Blob),
            PackObjectType::Tag => Some(Kind::Tag),
            PackObjectType::OfsDelta | PackObjectType::RefDelta => None,
        }
    }

    pub fn from_kind(kind: Kind) -> Self {
        match kind {
            Kind::Commit => PackObjectType::Commit,
            Kind::Tree => PackObjectType::Tree,
            Kind::Blob => PackObjectType::Blob,
            Kind::Tag => PackObjectType::Tag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_codes() {
        for t in [
            PackObjectType::Commit,
            PackObjectType::Tree,
            PackObjectType::Blob,
            PackObjectType::Tag,
            PackObjectType::OfsDelta,
            PackObjectType::RefDelta,
        ] {
            assert_eq!(PackObjectType::from_code(t.code()).unwrap(), t);
        }
        // 5 is reserved
        assert!(PackObjectType::from_code(5).is_err());
        assert!(PackObjectType::from_code(0).is_err());
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(PackObjectType::Blob.kind(), Some(Kind::Blob));
        assert_eq!(PackObjectType::OfsDelta.kind(), None);
        assert_eq!(PackObjectType::from_kind(Kind::Tag), PackObjectType::Tag);
    }
}
