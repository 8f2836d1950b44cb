use crate::error::{Error, Result};
use crate::pack::varint::{decode_size, encode_size};

/// apply a delta to its base, producing the result bytes
///
/// a delta is `base-size varint, result-size varint, ops*` where each op
/// is either a copy from the base (cmd byte with flag bits selecting 1-4
/// offset bytes and 1-3 size bytes, little-endian on the wire) or an
/// insert of up to 127 literal bytes.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let (base_size, consumed) = decode_size(delta)?;
    if base_size as usize != base.len() {
        return Err(Error::PackCorrupted(format!(
            "delta base size {base_size} does not match base length {}",
            base.len()
        )));
    }
    let mut pos = consumed;
    let (result_size, consumed) = decode_size(&delta[pos..])?;
    pos += consumed;

    let mut out = Vec::with_capacity(result_size as usize);
    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;

        if cmd & 0x80 != 0 {
            // copy op: flag bits pull offset and size bytes
            let mut offset = 0u64;
            for (i, flag) in [0x01u8, 0x02, 0x04, 0x08].iter().enumerate() {
                if cmd & flag != 0 {
                    let byte = *delta
                        .get(pos)
                        .ok_or_else(|| Error::PackCorrupted("truncated copy op".to_string()))?;
                    offset |= (byte as u64) << (8 * i);
                    pos += 1;
                }
            }
            let mut size = 0u64;
            for (i, flag) in [0x10u8, 0x20, 0x40].iter().enumerate() {
                if cmd & flag != 0 {
                    let byte = *delta
                        .get(pos)
                        .ok_or_else(|| Error::PackCorrupted("truncated copy op".to_string()))?;
                    size |= (byte as u64) << (8 * i);
                    pos += 1;
                }
            }
            if size == 0 {
                size = 0x10000;
            }

            let start = offset as usize;
            let end = start + size as usize;
            if end > base.len() {
                return Err(Error::PackCorrupted(format!(
                    "copy op {start}..{end} outside base of {} bytes",
                    base.len()
                )));
            }
            out.extend_from_slice(&base[start..end]);
        } else if cmd != 0 {
            // insert op: cmd literal bytes follow
            let len = cmd as usize;
            let end = pos + len;
            if end > delta.len() {
                return Err(Error::PackCorrupted("truncated insert op".to_string()));
            }
            out.extend_from_slice(&delta[pos..end]);
            pos = end;
        } else {
            return Err(Error::PackCorrupted("reserved delta op 0".to_string()));
        }
    }

    if out.len() as u64 != result_size {
        return Err(Error::PackCorrupted(format!(
            "delta produced {} bytes, header says {result_size}",
            out.len()
        )));
    }
    Ok(out)
}

/// build a delta from explicit ops; the test helper counterpart of
/// [`apply_delta`], also used by loopback transport tests
pub struct DeltaBuilder {
    base_len: u64,
    ops: Vec<u8>,
    result_len: u64,
}

impl DeltaBuilder {
    pub fn new(base: &[u8]) -> Self {
        Self {
            base_len: base.len() as u64,
            ops: Vec::new(),
            result_len: 0,
        }
    }

    /// copy `size` bytes from `offset` in the base
    pub fn copy(mut self, offset: u64, size: u64) -> Self {
        assert!(size > 0 && size <= 0x10000, "copy size out of range");
        let mut cmd = 0x80u8;
        let mut offset_bytes = Vec::new();
        for i in 0..4 {
            let byte = ((offset >> (8 * i)) & 0xff) as u8;
            if byte != 0 {
                cmd |= 1 << i;
                offset_bytes.push((i, byte));
            }
        }
        let mut size_bytes = Vec::new();
        if size != 0x10000 {
            for i in 0..3 {
                let byte = ((size >> (8 * i)) & 0xff) as u8;
                if byte != 0 {
                    cmd |= 0x10 << i;
                    size_bytes.push((i, byte));
                }
            }
        }
        self.ops.push(cmd);
        self.ops.extend(offset_bytes.into_iter().map(|(_, b)| b));
        self.ops.extend(size_bytes.into_iter().map(|(_, b)| b));
        self.result_len += size;
        self
    }

    /// insert literal bytes (chunked into 127-byte ops)
    pub fn insert(mut self, data: &[u8]) -> Self {
        for chunk in data.chunks(127) {
            self.ops.push(chunk.len() as u8);
            self.ops.extend_from_slice(chunk);
        }
        self.result_len += data.len() as u64;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = encode_size(self.base_len);
        out.extend(encode_size(self.result_len));
        out.extend(self.ops);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pure_insert() {
        let delta = DeltaBuilder::new(b"").insert(b"fresh content").build();
        assert_eq!(apply_delta(b"", &delta).unwrap(), b"fresh content");
    }

    #[test]
    fn test_pure_copy() {
        let base = b"0123456789";
        let delta = DeltaBuilder::new(base).copy(2, 5).build();
        assert_eq!(apply_delta(base, &delta).unwrap(), b"23456");
    }

    #[test]
    fn test_mixed_ops() {
        let base = b"the quick brown fox";
        let delta = DeltaBuilder::new(base)
            .copy(0, 10) // "the quick "
            .insert(b"red ")
            .copy(16, 3) // "fox"
            .build();
        assert_eq!(apply_delta(base, &delta).unwrap(), b"the quick red fox");
    }

    #[test]
    fn test_large_insert_chunks() {
        let data = vec![0x41u8; 300];
        let delta = DeltaBuilder::new(b"").insert(&data).build();
        assert_eq!(apply_delta(b"", &delta).unwrap(), data);
    }

    #[test]
    fn test_copy_size_zero_means_64k() {
        let base = vec![7u8; 0x10000];
        let delta = DeltaBuilder::new(&base).copy(0, 0x10000).build();
        assert_eq!(apply_delta(&base, &delta).unwrap().len(), 0x10000);
    }

    #[test]
    fn test_base_size_mismatch_rejected() {
        let delta = DeltaBuilder::new(b"abc").copy(0, 3).build();
        assert!(apply_delta(b"abcd", &delta).is_err());
    }

    #[test]
    fn test_copy_out_of_bounds_rejected() {
        let base = b"short";
        let mut delta = encode_size(base.len() as u64);
        delta.extend(encode_size(50));
        delta.push(0x90); // copy with 1 size byte, offset 0
        delta.push(50); // size 50 > base
        assert!(apply_delta(base, &delta).is_err());
    }

    #[test]
    fn test_result_size_mismatch_rejected() {
        let base = b"0123456789";
        let mut delta = encode_size(10);
        delta.extend(encode_size(99)); // wrong result size
        delta.push(0x90);
        delta.push(5);
        assert!(apply_delta(base, &delta).is_err());
    }

    #[test]
    fn test_reserved_op_rejected() {
        let mut delta = encode_size(0);
        delta.extend(encode_size(0));
        delta.push(0);
        assert!(apply_delta(b"", &delta).is_err());
    }
}
