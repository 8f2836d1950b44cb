//! git object codec
//!
//! serialises the four object kinds to their canonical payload bytes and
//! parses them back. the framed form `"{kind} {size}\0{payload}"` is what
//! gets hashed; storage holds the unframed payload.

pub mod commit;
pub mod tag;
pub mod tree;

pub use commit::{Commit, Signature};
pub use tag::Tag;
pub use tree::{EntryMode, Tree, TreeEntry};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// the four git object kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl Kind {
    /// wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Blob => "blob",
            Kind::Tree => "tree",
            Kind::Commit => "commit",
            Kind::Tag => "tag",
        }
    }

    /// parse a wire name
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "blob" => Ok(Kind::Blob),
            "tree" => Ok(Kind::Tree),
            "commit" => Ok(Kind::Commit),
            "tag" => Ok(Kind::Tag),
            other => Err(Error::InvalidObject(format!("unknown object kind: {other}"))),
        }
    }

    /// single-byte code used in bundle index entries
    pub fn code(&self) -> u8 {
        match self {
            Kind::Commit => 1,
            Kind::Tree => 2,
            Kind::Blob => 3,
            Kind::Tag => 4,
        }
    }

    /// parse a bundle index code
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Kind::Commit),
            2 => Ok(Kind::Tree),
            3 => Ok(Kind::Blob),
            4 => Ok(Kind::Tag),
            other => Err(Error::InvalidObject(format!("unknown kind code: {other}"))),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// frame a payload for hashing or wire transfer
pub fn frame(kind: Kind, payload: &[u8]) -> Vec<u8> {
    let header = format!("{} {}\0", kind.as_str(), payload.len());
    let mut out = Vec::with_capacity(header.len() + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// split framed bytes back into kind and payload
pub fn parse_frame(framed: &[u8]) -> Result<(Kind, &[u8])> {
    let nul = framed
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::InvalidObject("missing frame header terminator".to_string()))?;
    let header = std::str::from_utf8(&framed[..nul])
        .map_err(|_| Error::InvalidObject("frame header is not utf-8".to_string()))?;
    let (kind_str, size_str) = header
        .split_once(' ')
        .ok_or_else(|| Error::InvalidObject("malformed frame header".to_string()))?;
    let kind = Kind::parse(kind_str)?;
    let size: usize = size_str
        .parse()
        .map_err(|_| Error::InvalidObject(format!("bad frame size: {size_str}")))?;

    let payload = &framed[nul + 1..];
    if payload.len() != size {
        return Err(Error::InvalidObject(format!(
            "frame size {size} does not match payload length {}",
            payload.len()
        )));
    }
    Ok((kind, payload))
}

/// validate a payload parses as its declared kind
///
/// blobs are opaque and always valid; the structured kinds round through
/// their parsers.
pub fn validate(kind: Kind, payload: &[u8]) -> Result<()> {
    match kind {
        Kind::Blob => Ok(()),
        Kind::Tree => Tree::parse(payload).map(|_| ()),
        Kind::Commit => Commit::parse(payload).map(|_| ()),
        Kind::Tag => Tag::parse(payload).map(|_| ()),
    }
}
