use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Error, Result};
use crate::object::Kind;
use crate::oid::{hash_object, sha1, Oid};
use crate::pack::varint::encode_object_header;
use crate::pack::{PackObjectType, PACK_MAGIC, PACK_VERSION};

/// where an object landed in an emitted pack
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedEntry {
    pub oid: Oid,
    pub offset: u64,
    pub crc32: u32,
}

/// emit a pack v2 from full (non-delta) objects
///
/// identical input produces byte-identical output; the trailing SHA-1
/// covers everything before it. entries report each object's offset and
/// the CRC32 of its stored bytes for index building.
pub fn emit_pack(objects: &[(Kind, Vec<u8>)]) -> Result<(Vec<u8>, Vec<PackedEntry>)> {
    let count = u32::try_from(objects.len())
        .map_err(|_| Error::PackFormat("too many objects for one pack".to_string()))?;

    let mut out = Vec::new();
    out.extend_from_slice(&PACK_MAGIC);
    out.extend_from_slice(&PACK_VERSION.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());

    let mut entries = Vec::with_capacity(objects.len());
    for (kind, payload) in objects {
        let offset = out.len() as u64;
        let entry_start = out.len();

        out.extend(encode_object_header(
            PackObjectType::from_kind(*kind),
            payload.len() as u64,
        ));
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(payload)
            .and_then(|_| encoder.finish())
            .map(|compressed| out.extend_from_slice(&compressed))
            .map_err(|e| Error::Zlib(e.to_string()))?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&out[entry_start..]);
        entries.push(PackedEntry {
            oid: hash_object(*kind, payload),
            offset,
            crc32: hasher.finalize(),
        });
    }

    let trailer = sha1(&out);
    out.extend_from_slice(trailer.as_bytes());
    Ok((out, entries))
}
