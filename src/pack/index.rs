use crate::error::{Error, Result};
use crate::oid::{sha1, Oid};

/// pack index v2 magic
pub const INDEX_MAGIC: u32 = 0xff74_4f63;
/// pack index version
pub const INDEX_VERSION: u32 = 2;
/// offsets at or above this spill into the 64-bit table
const LARGE_OFFSET_THRESHOLD: u64 = 1 << 31;
const HIGH_BIT: u32 = 0x8000_0000;

/// one record in a pack index
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackIndexEntry {
    pub oid: Oid,
    pub offset: u64,
    pub crc32: u32,
}

/// pack index v2: fanout + sorted oids + crc32s + offsets with a 64-bit
/// spill table for packs past 2 GiB
#[derive(Clone, Debug)]
pub struct PackIndex {
    /// sorted by oid
    entries: Vec<PackIndexEntry>,
    /// cumulative counts per leading byte
    fanout: [u32; 256],
    pack_checksum: Oid,
}

impl PackIndex {
    /// build an index over pack entries (any order) and the pack checksum
    pub fn build(mut entries: Vec<PackIndexEntry>, pack_checksum: Oid) -> Result<Self> {
        entries.sort_by(|a, b| a.oid.cmp(&b.oid));
        for window in entries.windows(2) {
            if window[0].oid == window[1].oid {
                return Err(Error::PackFormat(format!(
                    "duplicate oid {} in index",
                    window[0].oid
                )));
            }
        }

        let mut fanout = [0u32; 256];
        for entry in &entries {
            fanout[entry.oid.first_byte() as usize] += 1;
        }
        let mut running = 0u32;
        for slot in fanout.iter_mut() {
            running += *slot;
            *slot = running;
        }

        Ok(Self {
            entries,
            fanout,
            pack_checksum,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pack_checksum(&self) -> &Oid {
        &self.pack_checksum
    }

    /// look up an entry: fanout narrows to the leading-byte bucket, then
    /// binary search
    pub fn lookup(&self, oid: &Oid) -> Option<&PackIndexEntry> {
        let byte = oid.first_byte() as usize;
        let start = if byte == 0 {
            0
        } else {
            self.fanout[byte - 1] as usize
        };
        let end = self.fanout[byte] as usize;
        if start == end {
            return None;
        }
        self.entries[start..end]
            .binary_search_by(|e| e.oid.cmp(oid))
            .ok()
            .map(|i| &self.entries[start + i])
    }

    pub fn entries(&self) -> &[PackIndexEntry] {
        &self.entries
    }

    /// serialise to index v2 bytes
    ///
    /// section by section: magic, version, fanout, oids, crc32s, 31-bit
    /// offsets (high bit marks a slot in the large table), large offsets,
    /// pack checksum, then the index's own SHA-1.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&INDEX_MAGIC.to_be_bytes());
        out.extend_from_slice(&INDEX_VERSION.to_be_bytes());
        for count in &self.fanout {
            out.extend_from_slice(&count.to_be_bytes());
        }
        for entry in &self.entries {
            out.extend_from_slice(entry.oid.as_bytes());
        }
        for entry in &self.entries {
            out.extend_from_slice(&entry.crc32.to_be_bytes());
        }

        let mut large = Vec::new();
        for entry in &self.entries {
            if entry.offset >= LARGE_OFFSET_THRESHOLD {
                let slot = HIGH_BIT | large.len() as u32;
                out.extend_from_slice(&slot.to_be_bytes());
                large.push(entry.offset);
            } else {
                out.extend_from_slice(&(entry.offset as u32).to_be_bytes());
            }
        }
        for offset in large {
            out.extend_from_slice(&offset.to_be_bytes());
        }

        out.extend_from_slice(self.pack_checksum.as_bytes());
        let own = sha1(&out);
        out.extend_from_slice(own.as_bytes());
        out
    }

    /// parse and validate index v2 bytes
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 + 256 * 4 + 40 {
            return Err(Error::PackFormat("index too short".to_string()));
        }

        let own_start = bytes.len() - 20;
        let declared = Oid::from_slice(&bytes[own_start..])?;
        if sha1(&bytes[..own_start]) != declared {
            return Err(Error::PackCorrupted("index checksum mismatch".to_string()));
        }

        if u32::from_be_bytes(bytes[..4].try_into().unwrap()) != INDEX_MAGIC {
            return Err(Error::PackFormat("bad index magic".to_string()));
        }
        if u32::from_be_bytes(bytes[4..8].try_into().unwrap()) != INDEX_VERSION {
            return Err(Error::PackFormat("unsupported index version".to_string()));
        }

        let mut fanout = [0u32; 256];
        let mut pos = 8;
        for slot in fanout.iter_mut() {
            *slot = u32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap());
            pos += 4;
        }
        for window in fanout.windows(2) {
            if window[1] < window[0] {
                return Err(Error::PackFormat("fanout not monotonic".to_string()));
            }
        }
        let count = fanout[255] as usize;

        let oids_end = pos + count * 20;
        let crcs_end = oids_end + count * 4;
        let offsets_end = crcs_end + count * 4;
        if offsets_end + 40 > bytes.len() {
            return Err(Error::PackFormat("index sections truncated".to_string()));
        }

        let mut oids = Vec::with_capacity(count);
        for i in 0..count {
            oids.push(Oid::from_slice(&bytes[pos + i * 20..pos + i * 20 + 20])?);
        }
        for window in oids.windows(2) {
            if window[0] >= window[1] {
                return Err(Error::PackFormat(
                    "index oids not sorted or duplicated".to_string(),
                ));
            }
        }

        let large_count = (0..count)
            .filter(|i| {
                let at = crcs_end + i * 4;
                u32::from_be_bytes(bytes[at..at + 4].try_into().unwrap()) & HIGH_BIT != 0
            })
            .count();
        let large_end = offsets_end + large_count * 8;
        if large_end + 40 != bytes.len() {
            return Err(Error::PackFormat("index size mismatch".to_string()));
        }

        let mut entries = Vec::with_capacity(count);
        for (i, oid) in oids.into_iter().enumerate() {
            let crc_at = oids_end + i * 4;
            let crc32 = u32::from_be_bytes(bytes[crc_at..crc_at + 4].try_into().unwrap());
            let off_at = crcs_end + i * 4;
            let slot = u32::from_be_bytes(bytes[off_at..off_at + 4].try_into().unwrap());
            let offset = if slot & HIGH_BIT != 0 {
                let large_idx = (slot & !HIGH_BIT) as usize;
                if large_idx >= large_count {
                    return Err(Error::PackFormat(format!(
                        "large offset slot {large_idx} out of range"
                    )));
                }
                let at = offsets_end + large_idx * 8;
                u64::from_be_bytes(bytes[at..at + 8].try_into().unwrap())
            } else {
                slot as u64
            };
            entries.push(PackIndexEntry { oid, offset, crc32 });
        }

        let pack_checksum = Oid::from_slice(&bytes[large_end..large_end + 20])?;
        Ok(Self {
            entries,
            fanout,
            pack_checksum,
        })
    }
}
