use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::bundle::format::create_bundle;
use crate::error::{Error, Result};
use crate::object::Kind;
use crate::oid::Oid;
use crate::store::bucket::ObjectBucket;

/// metadata of a bundle that has been sealed and written to the bucket
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedBundle {
    pub key: String,
    pub entry_count: usize,
    /// sum of payload sizes, the writer's rotation accounting
    pub payload_bytes: u64,
    /// size of the assembled bundle file
    pub total_bytes: u64,
}

type RotationListener = Box<dyn FnMut(&SealedBundle) + Send>;

/// buffered bundle writer with size-based rotation
///
/// objects accumulate in an open bundle; when the next add would push the
/// payload total past `max_bundle_size`, the open bundle is sealed to the
/// bucket and a fresh one is started. the key of the open bundle is fixed
/// at open time so index rows can reference it before the seal.
pub struct BundleWriter {
    bucket: Arc<dyn ObjectBucket>,
    key_prefix: String,
    max_bundle_size: u64,
    buffer: BTreeMap<Oid, (Kind, Vec<u8>)>,
    buffered_bytes: u64,
    current_key: String,
    listeners: Vec<RotationListener>,
    closed: bool,
}

impl BundleWriter {
    pub fn new(bucket: Arc<dyn ObjectBucket>, key_prefix: impl Into<String>, max_bundle_size: u64) -> Self {
        let key_prefix = key_prefix.into();
        let current_key = generate_key(&key_prefix);
        Self {
            bucket,
            key_prefix,
            max_bundle_size,
            buffer: BTreeMap::new(),
            buffered_bytes: 0,
            current_key,
            listeners: Vec::new(),
            closed: false,
        }
    }

    /// register a rotation listener fired after every seal
    pub fn on_rotate(&mut self, listener: impl FnMut(&SealedBundle) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// key the open bundle will be sealed under
    pub fn current_key(&self) -> &str {
        &self.current_key
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn pending_bytes(&self) -> u64 {
        self.buffered_bytes
    }

    /// read an object still sitting in the open bundle
    pub fn pending_get(&self, oid: &Oid) -> Option<(Kind, Vec<u8>)> {
        self.buffer.get(oid).cloned()
    }

    /// buffer an object, rotating first if it would overflow the open
    /// bundle; returns the sealed bundle when a rotation happened
    pub fn add(&mut self, oid: Oid, kind: Kind, payload: Vec<u8>) -> Result<Option<SealedBundle>> {
        if self.closed {
            return Err(Error::io("bundle writer", "writer is closed"));
        }
        if self.buffer.contains_key(&oid) {
            return Err(Error::BundleFormat(format!(
                "duplicate object {oid} in open bundle"
            )));
        }

        let mut sealed = None;
        if !self.buffer.is_empty()
            && self.buffered_bytes + payload.len() as u64 > self.max_bundle_size
        {
            sealed = self.seal()?;
        }

        self.buffered_bytes += payload.len() as u64;
        self.buffer.insert(oid, (kind, payload));
        Ok(sealed)
    }

    /// seal the open bundle now, if it holds anything
    pub fn flush(&mut self) -> Result<Option<SealedBundle>> {
        if self.closed {
            return Err(Error::io("bundle writer", "writer is closed"));
        }
        self.seal()
    }

    /// flush remaining objects exactly once; idempotent afterwards
    pub fn close(&mut self) -> Result<Option<SealedBundle>> {
        if self.closed {
            return Ok(None);
        }
        let sealed = self.seal()?;
        self.closed = true;
        Ok(sealed)
    }

    fn seal(&mut self) -> Result<Option<SealedBundle>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let bytes = create_bundle(&self.buffer)?;
        self.bucket.put(&self.current_key, &bytes)?;

        let sealed = SealedBundle {
            key: std::mem::replace(&mut self.current_key, generate_key(&self.key_prefix)),
            entry_count: self.buffer.len(),
            payload_bytes: self.buffered_bytes,
            total_bytes: bytes.len() as u64,
        };
        debug!(
            key = %sealed.key,
            objects = sealed.entry_count,
            bytes = sealed.total_bytes,
            "sealed bundle"
        );

        self.buffer.clear();
        self.buffered_bytes = 0;
        for listener in &mut self.listeners {
            listener(&sealed);
        }
        Ok(Some(sealed))
    }
}

fn generate_key(prefix: &str) -> String {
    format!("{prefix}{}.bundle", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::format::parse_bundle;
    use crate::store::bucket::MemoryBucket;
    use std::sync::Mutex;

    fn oid(n: u8) -> Oid {
        Oid::from_bytes([n; 20])
    }

    fn writer(max: u64) -> (Arc<MemoryBucket>, BundleWriter) {
        let bucket = Arc::new(MemoryBucket::new());
        let writer = BundleWriter::new(bucket.clone(), "bundles/", max);
        (bucket, writer)
    }

    #[test]
    fn test_rotation_at_size_threshold() {
        let (bucket, mut writer) = writer(1024);

        assert!(writer.add(oid(1), Kind::Blob, vec![0; 400]).unwrap().is_none());
        assert!(writer.add(oid(2), Kind::Blob, vec![0; 400]).unwrap().is_none());
        // third add would reach 1200 > 1024: objects 1+2 seal first
        let sealed = writer.add(oid(3), Kind::Blob, vec![0; 400]).unwrap().unwrap();
        assert_eq!(sealed.entry_count, 2);
        assert_eq!(bucket.list("bundles/").unwrap().len(), 1);

        // close seals the remaining object
        let last = writer.close().unwrap().unwrap();
        assert_eq!(last.entry_count, 1);
        assert_eq!(bucket.list("bundles/").unwrap().len(), 2);
    }

    #[test]
    fn test_sealed_bundles_parse() {
        let (bucket, mut writer) = writer(64);
        writer.add(oid(1), Kind::Blob, b"hello".to_vec()).unwrap();
        let sealed = writer.flush().unwrap().unwrap();

        let bytes = bucket.get(&sealed.key).unwrap().unwrap();
        let bundle = parse_bundle(&bytes).unwrap();
        assert_eq!(bundle.entries.len(), 1);
        assert_eq!(bundle.entries[0].oid, oid(1));
    }

    #[test]
    fn test_duplicate_add_refused() {
        let (_bucket, mut writer) = writer(1024);
        writer.add(oid(1), Kind::Blob, b"x".to_vec()).unwrap();
        assert!(writer.add(oid(1), Kind::Blob, b"x".to_vec()).is_err());
    }

    #[test]
    fn test_duplicate_allowed_after_rotation() {
        let (_bucket, mut writer) = writer(1024);
        writer.add(oid(1), Kind::Blob, b"x".to_vec()).unwrap();
        writer.flush().unwrap();
        // a new open bundle may hold the oid again
        assert!(writer.add(oid(1), Kind::Blob, b"x".to_vec()).is_ok());
    }

    #[test]
    fn test_flush_empty_is_noop() {
        let (bucket, mut writer) = writer(1024);
        assert!(writer.flush().unwrap().is_none());
        assert!(bucket.list("bundles/").unwrap().is_empty());
    }

    #[test]
    fn test_close_idempotent() {
        let (bucket, mut writer) = writer(1024);
        writer.add(oid(1), Kind::Blob, b"x".to_vec()).unwrap();

        assert!(writer.close().unwrap().is_some());
        assert!(writer.close().unwrap().is_none());
        assert_eq!(bucket.list("bundles/").unwrap().len(), 1);
        assert!(writer.add(oid(2), Kind::Blob, b"y".to_vec()).is_err());
    }

    #[test]
    fn test_rotation_listener_fires() {
        let (_bucket, mut writer) = writer(8);
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        writer.on_rotate(move |sealed| seen.lock().unwrap().push(sealed.key.clone()));

        writer.add(oid(1), Kind::Blob, vec![0; 6]).unwrap();
        writer.add(oid(2), Kind::Blob, vec![0; 6]).unwrap(); // rotates
        writer.close().unwrap(); // seals the second

        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_pending_read_through() {
        let (_bucket, mut writer) = writer(1024);
        writer.add(oid(1), Kind::Blob, b"pending".to_vec()).unwrap();

        let (kind, payload) = writer.pending_get(&oid(1)).unwrap();
        assert_eq!(kind, Kind::Blob);
        assert_eq!(payload, b"pending");
        assert!(writer.pending_get(&oid(2)).is_none());
    }

    #[test]
    fn test_current_key_changes_after_seal() {
        let (_bucket, mut writer) = writer(1024);
        let before = writer.current_key().to_string();
        writer.add(oid(1), Kind::Blob, b"x".to_vec()).unwrap();
        let sealed = writer.flush().unwrap().unwrap();

        assert_eq!(sealed.key, before);
        assert_ne!(writer.current_key(), before);
    }
}
