use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::object::Kind;
use crate::oid::Oid;

/// bundle magic bytes
pub const BUNDLE_MAGIC: [u8; 4] = *b"BNDL";
/// current bundle format version
pub const BUNDLE_VERSION: u32 = 1;
/// fixed header size; payloads start here
pub const BUNDLE_HEADER_SIZE: u64 = 64;
/// oid(20) + offset(8) + size(4) + kind(1)
pub const BUNDLE_INDEX_ENTRY_SIZE: u64 = 33;

/// parsed fixed header of a bundle
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleHeader {
    pub version: u32,
    pub entry_count: u32,
    pub index_offset: u64,
    pub total_size: u64,
    pub checksum: [u8; 16],
}

impl BundleHeader {
    /// parse the fixed 64-byte header
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BUNDLE_HEADER_SIZE as usize {
            return Err(Error::BundleFormat("truncated header".to_string()));
        }
        if bytes[..4] != BUNDLE_MAGIC {
            return Err(Error::BundleFormat("bad magic".to_string()));
        }
        let version = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
        if version != BUNDLE_VERSION {
            return Err(Error::BundleFormat(format!("unsupported version {version}")));
        }
        let entry_count = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
        let index_offset = u64::from_be_bytes(bytes[12..20].try_into().unwrap());
        let total_size = u64::from_be_bytes(bytes[20..28].try_into().unwrap());
        let mut checksum = [0u8; 16];
        checksum.copy_from_slice(&bytes[28..44]);

        if index_offset < BUNDLE_HEADER_SIZE || index_offset > total_size {
            return Err(Error::BundleFormat(format!(
                "index offset {index_offset} out of bounds"
            )));
        }
        let index_size = entry_count as u64 * BUNDLE_INDEX_ENTRY_SIZE;
        if index_offset + index_size != total_size {
            return Err(Error::BundleFormat(
                "index does not span to total size".to_string(),
            ));
        }

        Ok(Self {
            version,
            entry_count,
            index_offset,
            total_size,
            checksum,
        })
    }

    fn serialize(&self) -> [u8; BUNDLE_HEADER_SIZE as usize] {
        let mut out = [0u8; BUNDLE_HEADER_SIZE as usize];
        out[..4].copy_from_slice(&BUNDLE_MAGIC);
        out[4..8].copy_from_slice(&self.version.to_be_bytes());
        out[8..12].copy_from_slice(&self.entry_count.to_be_bytes());
        out[12..20].copy_from_slice(&self.index_offset.to_be_bytes());
        out[20..28].copy_from_slice(&self.total_size.to_be_bytes());
        out[28..44].copy_from_slice(&self.checksum);
        out
    }
}

/// one index record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleEntry {
    pub oid: Oid,
    /// payload offset from the start of the bundle
    pub offset: u64,
    pub size: u32,
    pub kind: Kind,
}

/// a parsed bundle index
#[derive(Clone, Debug)]
pub struct Bundle {
    pub header: BundleHeader,
    /// sorted by oid
    pub entries: Vec<BundleEntry>,
}

impl Bundle {
    /// binary-search an entry by oid
    pub fn find(&self, oid: &Oid) -> Option<&BundleEntry> {
        self.entries
            .binary_search_by(|e| e.oid.cmp(oid))
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn oids(&self) -> impl Iterator<Item = &Oid> {
        self.entries.iter().map(|e| &e.oid)
    }
}

/// 16-lane XOR fold over the payload region
pub fn checksum(payloads: &[u8]) -> [u8; 16] {
    let mut lanes = [0u8; 16];
    for (i, byte) in payloads.iter().enumerate() {
        lanes[i % 16] ^= byte;
    }
    lanes
}

/// assemble bundle bytes from objects
///
/// the map keys give the oid order for free; payloads land back to back
/// after the header, the index after the payloads.
pub fn create_bundle(objects: &BTreeMap<Oid, (Kind, Vec<u8>)>) -> Result<Vec<u8>> {
    let payload_size: u64 = objects.values().map(|(_, p)| p.len() as u64).sum();
    let index_offset = BUNDLE_HEADER_SIZE + payload_size;
    let entry_count = u32::try_from(objects.len())
        .map_err(|_| Error::BundleFormat("too many objects for one bundle".to_string()))?;
    let total_size = index_offset + entry_count as u64 * BUNDLE_INDEX_ENTRY_SIZE;

    let mut payloads = Vec::with_capacity(payload_size as usize);
    let mut entries = Vec::with_capacity(objects.len());
    for (oid, (kind, payload)) in objects {
        entries.push(BundleEntry {
            oid: *oid,
            offset: BUNDLE_HEADER_SIZE + payloads.len() as u64,
            size: u32::try_from(payload.len())
                .map_err(|_| Error::BundleFormat(format!("object {oid} too large for bundle")))?,
            kind: *kind,
        });
        payloads.extend_from_slice(payload);
    }

    let header = BundleHeader {
        version: BUNDLE_VERSION,
        entry_count,
        index_offset,
        total_size,
        checksum: checksum(&payloads),
    };

    let mut out = Vec::with_capacity(total_size as usize);
    out.extend_from_slice(&header.serialize());
    out.extend_from_slice(&payloads);
    for entry in &entries {
        out.extend_from_slice(entry.oid.as_bytes());
        out.extend_from_slice(&entry.offset.to_be_bytes());
        out.extend_from_slice(&entry.size.to_be_bytes());
        out.push(entry.kind.code());
    }
    Ok(out)
}

/// parse the index section given a parsed header
pub fn parse_index(header: &BundleHeader, index_bytes: &[u8]) -> Result<Vec<BundleEntry>> {
    let expected = header.entry_count as usize * BUNDLE_INDEX_ENTRY_SIZE as usize;
    if index_bytes.len() != expected {
        return Err(Error::BundleIndex(format!(
            "index is {} bytes, expected {expected}",
            index_bytes.len()
        )));
    }

    let mut entries = Vec::with_capacity(header.entry_count as usize);
    for chunk in index_bytes.chunks_exact(BUNDLE_INDEX_ENTRY_SIZE as usize) {
        let oid = Oid::from_slice(&chunk[..20])?;
        let offset = u64::from_be_bytes(chunk[20..28].try_into().unwrap());
        let size = u32::from_be_bytes(chunk[28..32].try_into().unwrap());
        let kind = Kind::from_code(chunk[32])?;

        if offset < BUNDLE_HEADER_SIZE {
            return Err(Error::BundleIndex(format!(
                "entry {oid} overlaps the header"
            )));
        }
        if offset + size as u64 > header.index_offset {
            return Err(Error::BundleIndex(format!(
                "entry {oid} extends into the index"
            )));
        }
        entries.push(BundleEntry {
            oid,
            offset,
            size,
            kind,
        });
    }

    for window in entries.windows(2) {
        if window[0].oid >= window[1].oid {
            return Err(Error::BundleIndex(
                "index oids not sorted or duplicated".to_string(),
            ));
        }
    }

    Ok(entries)
}

/// parse a complete bundle and verify its checksum
pub fn parse_bundle(bytes: &[u8]) -> Result<Bundle> {
    let header = BundleHeader::parse(bytes)?;
    if bytes.len() as u64 != header.total_size {
        return Err(Error::BundleFormat(format!(
            "bundle is {} bytes, header says {}",
            bytes.len(),
            header.total_size
        )));
    }
    let entries = parse_index(&header, &bytes[header.index_offset as usize..])?;

    let actual = checksum(&bytes[BUNDLE_HEADER_SIZE as usize..header.index_offset as usize]);
    if actual != header.checksum {
        return Err(Error::BundleCorrupted("checksum mismatch".to_string()));
    }

    Ok(Bundle { header, entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(n: u8) -> Oid {
        Oid::from_bytes([n; 20])
    }

    fn sample() -> BTreeMap<Oid, (Kind, Vec<u8>)> {
        let mut objects = BTreeMap::new();
        objects.insert(oid(3), (Kind::Blob, b"third".to_vec()));
        objects.insert(oid(1), (Kind::Commit, b"first".to_vec()));
        objects.insert(oid(2), (Kind::Tree, b"second!".to_vec()));
        objects
    }

    #[test]
    fn test_roundtrip() {
        let objects = sample();
        let bytes = create_bundle(&objects).unwrap();
        let bundle = parse_bundle(&bytes).unwrap();

        assert_eq!(bundle.entries.len(), 3);
        let oids: Vec<Oid> = bundle.oids().copied().collect();
        assert_eq!(oids, vec![oid(1), oid(2), oid(3)]);

        for (expected_oid, (kind, payload)) in &objects {
            let entry = bundle.find(expected_oid).unwrap();
            assert_eq!(entry.kind, *kind);
            let data = &bytes[entry.offset as usize..entry.offset as usize + entry.size as usize];
            assert_eq!(data, payload.as_slice());
        }
    }

    #[test]
    fn test_empty_bundle() {
        let bytes = create_bundle(&BTreeMap::new()).unwrap();
        assert_eq!(bytes.len() as u64, BUNDLE_HEADER_SIZE);
        let bundle = parse_bundle(&bytes).unwrap();
        assert!(bundle.entries.is_empty());
        assert!(bundle.find(&oid(1)).is_none());
    }

    #[test]
    fn test_deterministic_bytes() {
        let a = create_bundle(&sample()).unwrap();
        let b = create_bundle(&sample()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_corrupted_payload_fails_checksum() {
        let mut bytes = create_bundle(&sample()).unwrap();
        bytes[BUNDLE_HEADER_SIZE as usize] ^= 0xff;
        assert!(matches!(
            parse_bundle(&bytes),
            Err(Error::BundleCorrupted(_))
        ));
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = create_bundle(&sample()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(parse_bundle(&bytes), Err(Error::BundleFormat(_))));
    }

    #[test]
    fn test_truncated_bundle() {
        let bytes = create_bundle(&sample()).unwrap();
        assert!(parse_bundle(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_unsorted_index_rejected() {
        let bytes = create_bundle(&sample()).unwrap();
        let header = BundleHeader::parse(&bytes).unwrap();
        let mut index = bytes[header.index_offset as usize..].to_vec();
        // swap first two index entries
        let entry = BUNDLE_INDEX_ENTRY_SIZE as usize;
        let (a, b) = index.split_at_mut(entry);
        a.swap_with_slice(&mut b[..entry]);
        assert!(parse_index(&header, &index).is_err());
    }

    #[test]
    fn test_entry_overlapping_header_rejected() {
        let objects = sample();
        let mut bytes = create_bundle(&objects).unwrap();
        let header = BundleHeader::parse(&bytes).unwrap();
        // rewrite the first entry's offset to point inside the header
        let index_start = header.index_offset as usize;
        bytes[index_start + 20..index_start + 28].copy_from_slice(&4u64.to_be_bytes());
        assert!(matches!(parse_bundle(&bytes), Err(Error::BundleIndex(_))));
    }

    #[test]
    fn test_checksum_is_order_sensitive_fold() {
        assert_eq!(checksum(b""), [0u8; 16]);
        let a = checksum(b"abcdef");
        let b = checksum(b"abcdfe");
        assert_ne!(a, b);
        // xor fold: applying the same bytes twice cancels out lane-wise
        let mut doubled = b"abcdefabcdef".to_vec();
        doubled.truncate(12);
        // 12 bytes < 16 lanes: each lane hit at most once, nothing cancels
        assert_ne!(checksum(&doubled), [0u8; 16]);
    }
}
