use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

use crate::error::{Error, Result};
use crate::object::Kind;

/// SHA-1 object identifier used for content addressing
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid([u8; 20]);

impl Oid {
    /// zero oid (useful as sentinel)
    pub const ZERO: Oid = Oid([0u8; 20]);

    /// create from raw bytes
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// create from a 20-byte slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 20 {
            return Err(Error::InvalidOidHex(hex::encode(bytes)));
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// parse from a 40-char hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != 40 {
            return Err(Error::InvalidOidHex(s.to_string()));
        }
        let bytes = hex::decode(s).map_err(|_| Error::InvalidOidHex(s.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// get raw bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// convert to lowercase hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// leading byte, used by fanout tables
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", &self.to_hex()[..10])
    }
}

impl Serialize for Oid {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Oid {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// a short oid prefix, 4 to 39 lowercase hex chars
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShortOid(String);

impl ShortOid {
    /// parse and validate a prefix string
    pub fn new(prefix: &str) -> Result<Self> {
        if prefix.len() < 4 || prefix.len() > 39 {
            return Err(Error::InvalidOidHex(prefix.to_string()));
        }
        if !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidOidHex(prefix.to_string()));
        }
        Ok(Self(prefix.to_ascii_lowercase()))
    }

    /// the normalized prefix string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// does the given oid start with this prefix
    pub fn matches(&self, oid: &Oid) -> bool {
        oid.to_hex().starts_with(&self.0)
    }
}

impl fmt::Display for ShortOid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// compute the oid of an object from its kind and payload
///
/// the hash input is the git framing `"{kind} {size}\0{payload}"`; storage
/// holds the unframed payload and the header is reconstructed here.
pub fn hash_object(kind: Kind, payload: &[u8]) -> Oid {
    let mut hasher = ObjectHasher::new(kind, payload.len() as u64);
    hasher.update(payload);
    hasher.finalize()
}

/// streaming framed hasher for large payloads
///
/// produces the same oid whether the payload is fed in one shot or in
/// chunks. the total size must be known up front since it is part of the
/// frame header.
pub struct ObjectHasher {
    hasher: Sha1,
}

impl ObjectHasher {
    /// start hashing an object of the given kind and total payload size
    pub fn new(kind: Kind, size: u64) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b" ");
        hasher.update(size.to_string().as_bytes());
        hasher.update(b"\0");
        Self { hasher }
    }

    /// feed payload bytes
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// finalize and return the oid
    pub fn finalize(self) -> Oid {
        Oid(self.hasher.finalize().into())
    }
}

/// plain SHA-1 over raw bytes, used for pack trailers
pub fn sha1(data: &[u8]) -> Oid {
    Oid(Sha1::digest(data).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oid_hex_roundtrip() {
        let original = Oid::from_hex("ce013625030ba8dba906f756967f9e9ca394464a").unwrap();
        let parsed = Oid::from_hex(&original.to_hex()).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_oid_invalid_hex() {
        assert!(Oid::from_hex("not valid hex").is_err());
        assert!(Oid::from_hex("abcd").is_err()); // too short
        assert!(Oid::from_hex("ce013625030ba8dba906f756967f9e9ca394464aff").is_err()); // too long
    }

    #[test]
    fn test_oid_ordering() {
        let a = Oid::from_hex("0000000000000000000000000000000000000001").unwrap();
        let b = Oid::from_hex("0000000000000000000000000000000000000002").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_hash_known_blob() {
        // `echo 'hello' | git hash-object --stdin`
        let oid = hash_object(Kind::Blob, b"hello\n");
        assert_eq!(oid.to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");
    }

    #[test]
    fn test_hash_empty_blob() {
        let oid = hash_object(Kind::Blob, b"");
        assert_eq!(oid.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[test]
    fn test_hash_empty_tree() {
        let oid = hash_object(Kind::Tree, b"");
        assert_eq!(oid.to_hex(), "4b825dc642cb6eb9a060e54bf8d69288fbee4904");
    }

    #[test]
    fn test_streaming_hasher_matches_one_shot() {
        let direct = hash_object(Kind::Blob, b"helloworld");

        let mut streaming = ObjectHasher::new(Kind::Blob, 10);
        streaming.update(b"hello");
        streaming.update(b"world");
        assert_eq!(direct, streaming.finalize());
    }

    #[test]
    fn test_hash_distinguishes_kind() {
        let blob = hash_object(Kind::Blob, b"x");
        let tree = hash_object(Kind::Tree, b"x");
        assert_ne!(blob, tree);
    }

    #[test]
    fn test_short_oid_validation() {
        assert!(ShortOid::new("ce0").is_err()); // too short
        assert!(ShortOid::new("ce01").is_ok());
        assert!(ShortOid::new(&"a".repeat(39)).is_ok());
        assert!(ShortOid::new(&"a".repeat(40)).is_err()); // full oid, not a prefix
        assert!(ShortOid::new("zzzz").is_err());
    }

    #[test]
    fn test_short_oid_matches() {
        let oid = Oid::from_hex("ce013625030ba8dba906f756967f9e9ca394464a").unwrap();
        assert!(ShortOid::new("ce01").unwrap().matches(&oid));
        assert!(ShortOid::new("CE01").unwrap().matches(&oid)); // normalized
        assert!(!ShortOid::new("ce02").unwrap().matches(&oid));
    }

    #[test]
    fn test_oid_serde_json() {
        let oid = Oid::from_hex("ce013625030ba8dba906f756967f9e9ca394464a").unwrap();
        let json = serde_json::to_string(&oid).unwrap();
        assert!(json.contains("ce0136"));
        let parsed: Oid = serde_json::from_str(&json).unwrap();
        assert_eq!(oid, parsed);
    }
}
