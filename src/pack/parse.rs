use std::collections::HashMap;
use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::error::{Error, Result};
use crate::object::Kind;
use crate::oid::{hash_object, sha1, Oid};
use crate::pack::delta::apply_delta;
use crate::pack::varint::{decode_object_header, decode_ofs_offset};
use crate::pack::{PackObjectType, PACK_MAGIC, PACK_VERSION};

/// a fully resolved object out of a pack
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackObject {
    pub oid: Oid,
    pub kind: Kind,
    pub payload: Vec<u8>,
    /// offset of the entry in the pack
    pub offset: u64,
    /// CRC32 of the entry's stored bytes
    pub crc32: u32,
}

enum DeltaBase {
    Offset(u64),
    Ref(Oid),
}

struct RawEntry {
    obj_type: PackObjectType,
    base: Option<DeltaBase>,
    data: Vec<u8>,
    offset: u64,
    crc32: u32,
}

/// parse a pack v2, resolving every delta within the pack
///
/// delta entries whose base appears later in the pack are parked and
/// retried once the base resolves; anything still unresolved afterwards
/// means the pack is self-inconsistent.
pub fn parse_pack(bytes: &[u8]) -> Result<Vec<PackObject>> {
    if bytes.len() < 32 {
        return Err(Error::PackFormat("pack too short".to_string()));
    }
    if bytes[..4] != PACK_MAGIC {
        return Err(Error::PackFormat("bad magic".to_string()));
    }
    let version = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
    if version != PACK_VERSION {
        return Err(Error::PackFormat(format!("unsupported version {version}")));
    }
    let count = u32::from_be_bytes(bytes[8..12].try_into().unwrap()) as usize;

    let body_end = bytes.len() - 20;
    let expected = Oid::from_slice(&bytes[body_end..])?;
    let actual = sha1(&bytes[..body_end]);
    if expected != actual {
        return Err(Error::PackCorrupted(format!(
            "pack checksum mismatch: trailer {expected}, computed {actual}"
        )));
    }

    // first pass: decode entry headers and inflate payloads
    let mut raw = Vec::with_capacity(count);
    let mut pos = 12usize;
    for _ in 0..count {
        let offset = pos as u64;
        let entry_start = pos;

        let (obj_type, size, consumed) = decode_object_header(&bytes[pos..body_end])?;
        pos += consumed;

        let base = match obj_type {
            PackObjectType::OfsDelta => {
                let (rel, consumed) = decode_ofs_offset(&bytes[pos..body_end])?;
                pos += consumed;
                let base_offset = offset
                    .checked_sub(rel)
                    .ok_or_else(|| Error::PackFormat("ofs-delta points before pack".to_string()))?;
                Some(DeltaBase::Offset(base_offset))
            }
            PackObjectType::RefDelta => {
                if pos + 20 > body_end {
                    return Err(Error::PackFormat("truncated ref-delta base".to_string()));
                }
                let base = Oid::from_slice(&bytes[pos..pos + 20])?;
                pos += 20;
                Some(DeltaBase::Ref(base))
            }
            _ => None,
        };

        // the inflater tells us how many compressed bytes it consumed
        let mut decoder = ZlibDecoder::new(&bytes[pos..body_end]);
        let mut data = Vec::with_capacity(size as usize);
        decoder
            .read_to_end(&mut data)
            .map_err(|e| Error::Zlib(e.to_string()))?;
        pos += decoder.total_in() as usize;

        if data.len() as u64 != size {
            return Err(Error::PackCorrupted(format!(
                "entry at {offset} inflated to {} bytes, header says {size}",
                data.len()
            )));
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes[entry_start..pos]);
        raw.push(RawEntry {
            obj_type,
            base,
            data,
            offset,
            crc32: hasher.finalize(),
        });
    }
    if pos != body_end {
        return Err(Error::PackCorrupted(format!(
            "{} trailing bytes after the last entry",
            body_end - pos
        )));
    }

    // second pass: resolve deltas until no progress remains
    let mut resolved: Vec<Option<PackObject>> = Vec::with_capacity(raw.len());
    resolved.resize_with(raw.len(), || None);
    let mut by_offset: HashMap<u64, usize> = HashMap::new();
    let mut by_oid: HashMap<Oid, usize> = HashMap::new();

    loop {
        let mut progressed = false;
        for (i, entry) in raw.iter().enumerate() {
            if resolved[i].is_some() {
                continue;
            }
            let (kind, payload) = match &entry.base {
                None => {
                    let kind = entry.obj_type.kind().ok_or_else(|| {
                        Error::PackCorrupted("delta type without a base".to_string())
                    })?;
                    (kind, entry.data.clone())
                }
                Some(DeltaBase::Offset(base_offset)) => {
                    let Some(base) = by_offset
                        .get(base_offset)
                        .and_then(|&idx| resolved[idx].as_ref())
                    else {
                        continue;
                    };
                    (base.kind, apply_delta(&base.payload, &entry.data)?)
                }
                Some(DeltaBase::Ref(base_oid)) => {
                    let Some(base) = by_oid
                        .get(base_oid)
                        .and_then(|&idx| resolved[idx].as_ref())
                    else {
                        continue;
                    };
                    (base.kind, apply_delta(&base.payload, &entry.data)?)
                }
            };
            let object = PackObject {
                oid: hash_object(kind, &payload),
                kind,
                payload,
                offset: entry.offset,
                crc32: entry.crc32,
            };
            by_offset.insert(entry.offset, i);
            by_oid.insert(object.oid, i);
            resolved[i] = Some(object);
            progressed = true;
        }
        if !progressed {
            break;
        }
    }

    let unresolved = resolved.iter().filter(|r| r.is_none()).count();
    if unresolved > 0 {
        return Err(Error::PackCorrupted(format!(
            "{unresolved} delta entries have no base in this pack"
        )));
    }
    Ok(resolved.into_iter().flatten().collect())
}
