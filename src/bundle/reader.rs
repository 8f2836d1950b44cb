use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::bundle::format::{parse_index, Bundle, BundleHeader, BUNDLE_HEADER_SIZE, BUNDLE_INDEX_ENTRY_SIZE};
use crate::error::{Error, Result};
use crate::object::Kind;
use crate::oid::Oid;
use crate::store::bucket::ObjectBucket;
use crate::store::cache::LruCache;

type PendingSlot = Arc<Mutex<Option<Arc<Bundle>>>>;

/// bundle reader with an index cache and deduplicated loads
///
/// indices are fetched with two range reads (header, then index section)
/// and cached by bucket key; payload reads are ranged per object. loads of
/// the same key share one fetch through the pending map.
pub struct BundleReader {
    bucket: Arc<dyn ObjectBucket>,
    cache: Mutex<LruCache<Arc<Bundle>>>,
    pending: Mutex<HashMap<String, PendingSlot>>,
}

impl BundleReader {
    pub fn new(bucket: Arc<dyn ObjectBucket>, cache_max_count: usize, cache_max_bytes: u64) -> Self {
        Self {
            bucket,
            cache: Mutex::new(LruCache::new(cache_max_count, cache_max_bytes, None)),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// read one object's payload
    pub fn get(&self, key: &str, oid: &Oid) -> Result<Option<(Kind, Vec<u8>)>> {
        let bundle = self.load_index(key)?;
        let Some(entry) = bundle.find(oid) else {
            return Ok(None);
        };
        let payload = self.read_payload(key, entry.offset, entry.size as u64)?;
        Ok(Some((entry.kind, payload)))
    }

    /// read several objects from one bundle, preserving input order
    pub fn get_batch(&self, key: &str, oids: &[Oid]) -> Result<Vec<Option<(Kind, Vec<u8>)>>> {
        let bundle = self.load_index(key)?;
        let mut out = Vec::with_capacity(oids.len());
        for oid in oids {
            match bundle.find(oid) {
                Some(entry) => {
                    let payload = self.read_payload(key, entry.offset, entry.size as u64)?;
                    out.push(Some((entry.kind, payload)));
                }
                None => out.push(None),
            }
        }
        Ok(out)
    }

    /// read a slice of one object's payload
    pub fn get_range(&self, key: &str, oid: &Oid, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        let bundle = self.load_index(key)?;
        let Some(entry) = bundle.find(oid) else {
            return Ok(None);
        };
        let start = offset.min(entry.size as u64);
        let len = length.min(entry.size as u64 - start);
        let bytes = self.read_payload(key, entry.offset + start, len)?;
        Ok(Some(bytes))
    }

    /// does the bundle hold the oid
    pub fn contains(&self, key: &str, oid: &Oid) -> Result<bool> {
        Ok(self.load_index(key)?.find(oid).is_some())
    }

    /// all oids in the bundle, in index order
    pub fn list_oids(&self, key: &str) -> Result<Vec<Oid>> {
        Ok(self.load_index(key)?.oids().copied().collect())
    }

    /// parsed index entries, for the compactor's accounting
    pub fn index(&self, key: &str) -> Result<Arc<Bundle>> {
        self.load_index(key)
    }

    /// drop a cached index, e.g. after the compactor deletes the bundle
    pub fn invalidate(&self, key: &str) {
        self.cache.lock().unwrap().remove(key);
    }

    /// load a bundle index, deduplicating loads of the same key
    fn load_index(&self, key: &str) -> Result<Arc<Bundle>> {
        if let Some(bundle) = self.cache.lock().unwrap().get(key) {
            return Ok(bundle.clone());
        }

        // claim (or join) the in-flight load for this key; a second caller
        // blocks on the slot mutex until the first finishes
        let slot = {
            let mut pending = self.pending.lock().unwrap();
            pending.entry(key.to_string()).or_default().clone()
        };
        let mut guard = slot.lock().unwrap();
        if let Some(bundle) = &*guard {
            return Ok(bundle.clone());
        }

        let result = self.fetch_index(key);
        if let Ok(bundle) = &result {
            *guard = Some(bundle.clone());
            let cost = index_cost(bundle);
            self.cache.lock().unwrap().put(key, bundle.clone(), cost);
        }
        self.pending.lock().unwrap().remove(key);
        result
    }

    fn fetch_index(&self, key: &str) -> Result<Arc<Bundle>> {
        trace!(key, "loading bundle index");
        let header_bytes = self
            .bucket
            .get_range(key, 0, BUNDLE_HEADER_SIZE)?
            .ok_or_else(|| Error::BundleNotFound(key.to_string()))?;
        let header = BundleHeader::parse(&header_bytes)?;

        let index_size = header.entry_count as u64 * BUNDLE_INDEX_ENTRY_SIZE;
        let index_bytes = self
            .bucket
            .get_range(key, header.index_offset, index_size)?
            .ok_or_else(|| Error::BundleNotFound(key.to_string()))?;
        let entries = parse_index(&header, &index_bytes)?;

        Ok(Arc::new(Bundle { header, entries }))
    }

    fn read_payload(&self, key: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let bytes = self
            .bucket
            .get_range(key, offset, length)?
            .ok_or_else(|| Error::BundleNotFound(key.to_string()))?;
        if bytes.len() as u64 != length {
            return Err(Error::BundleCorrupted(format!(
                "short read from {key}: wanted {length} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }
}

fn index_cost(bundle: &Bundle) -> u64 {
    BUNDLE_HEADER_SIZE + bundle.entries.len() as u64 * BUNDLE_INDEX_ENTRY_SIZE
}
