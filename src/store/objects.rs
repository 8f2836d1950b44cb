use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::bundle::reader::BundleReader;
use crate::bundle::writer::BundleWriter;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::object::{self, Commit, Kind, Tag, Tree, TreeEntry};
use crate::oid::{hash_object, ObjectHasher, Oid, ShortOid};
use crate::store::bucket::ObjectBucket;
use crate::store::cache::LruCache;
use crate::store::row::{decode_row, encode_row, RowStore, Table};
use crate::store::wal::{unix_now, ObjectOp, Wal, WalRecord};

/// storage tier of an object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// payload lives in the row store
    Hot,
    /// payload lives in a bundle in the remote bucket
    Warm,
    /// payload lives in an archived bundle; read path is the warm path
    Cold,
}

/// hot-tier payload row, keyed by raw oid
#[derive(Serialize, Deserialize)]
struct ObjectRow {
    kind: Kind,
    size: u64,
    data: Vec<u8>,
    created_at: i64,
}

/// tier metadata row for every object, keyed by oid hex
#[derive(Serialize, Deserialize)]
struct IndexRow {
    kind: Kind,
    tier: Tier,
    size: u64,
    bundle_key: Option<String>,
}

/// counters exposed by [`ObjectStore::metrics`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub puts: u64,
    pub gets: u64,
    pub deletes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub bytes_written: u64,
    pub bundle_rotations: u64,
}

#[derive(Default)]
struct Metrics {
    puts: AtomicU64,
    gets: AtomicU64,
    deletes: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    bytes_written: AtomicU64,
    bundle_rotations: Arc<AtomicU64>,
}

type CachedObject = Arc<(Kind, Vec<u8>)>;

/// content-addressed object store with hot/warm tiering
///
/// small payloads live in the row store; payloads above `hot_max_size` go
/// through the bundle writer into the remote bucket. every mutation lands
/// in the WAL. an LRU cache fronts both tiers.
pub struct ObjectStore {
    rows: Arc<dyn RowStore>,
    wal: Arc<Wal>,
    cache: Mutex<LruCache<CachedObject>>,
    writer: Mutex<BundleWriter>,
    reader: Arc<BundleReader>,
    hot_max_size: u64,
    metrics: Metrics,
}

impl ObjectStore {
    pub fn new(
        rows: Arc<dyn RowStore>,
        bucket: Arc<dyn ObjectBucket>,
        wal: Arc<Wal>,
        config: &Config,
    ) -> Self {
        let ttl = config.cache_ttl_secs.map(Duration::from_secs);
        let cache = LruCache::new(config.cache_max_count, config.cache_max_bytes, ttl);
        let mut writer =
            BundleWriter::new(bucket.clone(), config.key_prefix.clone(), config.max_bundle_size);
        let reader = Arc::new(BundleReader::new(
            bucket,
            config.cache_max_count,
            config.cache_max_bytes,
        ));

        let metrics = Metrics::default();
        let rotations = metrics.bundle_rotations.clone();
        writer.on_rotate(move |_| {
            rotations.fetch_add(1, Ordering::Relaxed);
        });

        Self {
            rows,
            wal,
            cache: Mutex::new(cache),
            writer: Mutex::new(writer),
            reader,
            hot_max_size: config.hot_max_size,
            metrics,
        }
    }

    /// the bundle reader, shared with the compactor
    pub fn bundle_reader(&self) -> Arc<BundleReader> {
        self.reader.clone()
    }

    /// store an object, returning its oid; idempotent on duplicates
    pub fn put(&self, kind: Kind, payload: &[u8]) -> Result<Oid> {
        object::validate(kind, payload)?;
        let oid = hash_object(kind, payload);

        if self.index_row(&oid)?.is_some() {
            // equal content, equal oid: nothing to write
            self.cache_insert(&oid, kind, payload.to_vec());
            return Ok(oid);
        }

        let size = payload.len() as u64;
        let tier = if size > self.hot_max_size {
            Tier::Warm
        } else {
            Tier::Hot
        };

        let bundle_key = match tier {
            Tier::Hot => {
                let row = ObjectRow {
                    kind,
                    size,
                    data: payload.to_vec(),
                    created_at: unix_now(),
                };
                self.rows
                    .put(Table::Objects, oid.as_bytes(), &encode_row(&row)?)?;
                None
            }
            Tier::Warm | Tier::Cold => {
                let mut writer = self.writer.lock().unwrap();
                writer.add(oid, kind, payload.to_vec())?;
                Some(writer.current_key().to_string())
            }
        };

        self.put_index_row(
            &oid,
            &IndexRow {
                kind,
                tier,
                size,
                bundle_key,
            },
        )?;
        self.cache_insert(&oid, kind, payload.to_vec());
        self.wal.append(WalRecord::Object {
            op: ObjectOp::Put,
            oid,
            kind,
        })?;

        self.metrics.puts.fetch_add(1, Ordering::Relaxed);
        self.metrics.bytes_written.fetch_add(size, Ordering::Relaxed);
        trace!(%oid, %kind, size, ?tier, "stored object");
        Ok(oid)
    }

    /// store a large blob from a chunk stream
    ///
    /// `size` must be declared up front (it is part of the hashed frame);
    /// a stream that yields a different total is rejected.
    pub fn put_blob_streaming<I>(&self, size: u64, chunks: I) -> Result<Oid>
    where
        I: IntoIterator<Item = Result<Vec<u8>>>,
    {
        let mut hasher = ObjectHasher::new(Kind::Blob, size);
        let mut payload = Vec::new();
        let mut seen = 0u64;
        for chunk in chunks {
            let chunk = chunk?;
            seen += chunk.len() as u64;
            if seen > size {
                return Err(Error::InvalidObject(format!(
                    "blob stream exceeded declared size {size}"
                )));
            }
            hasher.update(&chunk);
            payload.extend_from_slice(&chunk);
        }
        if seen != size {
            return Err(Error::InvalidObject(format!(
                "blob stream yielded {seen} bytes, declared {size}"
            )));
        }

        let oid = hasher.finalize();
        if self.index_row(&oid)?.is_some() {
            return Ok(oid);
        }

        let tier = if size > self.hot_max_size {
            Tier::Warm
        } else {
            Tier::Hot
        };
        let bundle_key = match tier {
            Tier::Hot => {
                let row = ObjectRow {
                    kind: Kind::Blob,
                    size,
                    data: payload,
                    created_at: unix_now(),
                };
                self.rows
                    .put(Table::Objects, oid.as_bytes(), &encode_row(&row)?)?;
                None
            }
            Tier::Warm | Tier::Cold => {
                let mut writer = self.writer.lock().unwrap();
                writer.add(oid, Kind::Blob, payload)?;
                Some(writer.current_key().to_string())
            }
        };
        self.put_index_row(
            &oid,
            &IndexRow {
                kind: Kind::Blob,
                tier,
                size,
                bundle_key,
            },
        )?;
        self.wal.append(WalRecord::Object {
            op: ObjectOp::Put,
            oid,
            kind: Kind::Blob,
        })?;
        self.metrics.puts.fetch_add(1, Ordering::Relaxed);
        self.metrics.bytes_written.fetch_add(size, Ordering::Relaxed);
        Ok(oid)
    }

    /// fetch an object; None on miss
    pub fn get(&self, oid: &Oid) -> Result<Option<(Kind, Vec<u8>)>> {
        self.metrics.gets.fetch_add(1, Ordering::Relaxed);

        if let Some(cached) = self.cache.lock().unwrap().get(&oid.to_hex()) {
            self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some((cached.0, cached.1.clone())));
        }
        self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);

        let Some(index) = self.index_row(oid)? else {
            return Ok(None);
        };
        let Some((kind, payload)) = self.fetch_tiered(oid, &index)? else {
            return Ok(None);
        };
        self.cache_insert(oid, kind, payload.clone());
        Ok(Some((kind, payload)))
    }

    /// stream a blob's payload in chunks
    pub fn get_blob_streaming(&self, oid: &Oid) -> Result<Option<(u64, BlobChunks)>> {
        let Some(index) = self.index_row(oid)? else {
            return Ok(None);
        };
        let source = match index.tier {
            Tier::Hot => {
                let Some((_, payload)) = self.fetch_tiered(oid, &index)? else {
                    return Ok(None);
                };
                ChunkSource::Memory(payload)
            }
            Tier::Warm | Tier::Cold => match &index.bundle_key {
                Some(key) => {
                    // objects still waiting in the open bundle stream from memory
                    let pending = self.writer.lock().unwrap().pending_get(oid);
                    match pending {
                        Some((_, payload)) => ChunkSource::Memory(payload),
                        None => ChunkSource::Bundle {
                            reader: self.reader.clone(),
                            key: key.clone(),
                            oid: *oid,
                        },
                    }
                }
                None => return Err(Error::BundleCorrupted(format!("warm object {oid} has no bundle key"))),
            },
        };
        Ok(Some((
            index.size,
            BlobChunks {
                source,
                size: index.size,
                pos: 0,
            },
        )))
    }

    /// is the object present in any tier
    pub fn has(&self, oid: &Oid) -> Result<bool> {
        Ok(self.index_row(oid)?.is_some())
    }

    /// drop an object from the row store; bundle copies die at compaction
    pub fn delete(&self, oid: &Oid) -> Result<bool> {
        let Some(index) = self.index_row(oid)? else {
            return Ok(false);
        };
        self.rows.delete(Table::Objects, oid.as_bytes())?;
        self.rows
            .delete(Table::ObjectIndex, oid.to_hex().as_bytes())?;
        self.cache.lock().unwrap().remove(&oid.to_hex());
        self.wal.append(WalRecord::Object {
            op: ObjectOp::Delete,
            oid: *oid,
            kind: index.kind,
        })?;
        self.metrics.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// recompute the oid from stored bytes and compare
    pub fn verify(&self, oid: &Oid) -> Result<bool> {
        let Some((kind, payload)) = self.get(oid)? else {
            return Err(Error::ObjectNotFound(*oid));
        };
        Ok(hash_object(kind, &payload) == *oid)
    }

    /// re-hash every stored object, returning the corrupt ones
    pub fn verify_all(&self, cancel: &CancelToken) -> Result<Vec<Oid>> {
        let mut corrupted = Vec::new();
        for (key, _) in self.rows.scan_prefix(Table::ObjectIndex, &[], None)? {
            cancel.check()?;
            let hex = std::str::from_utf8(&key)
                .map_err(|_| Error::RowDecode("non-utf8 index key".to_string()))?;
            let oid = Oid::from_hex(hex)?;
            if !self.verify(&oid)? {
                corrupted.push(oid);
            }
        }
        Ok(corrupted)
    }

    /// resolve a full or short oid string
    ///
    /// short prefixes resolve by index range scan; more than one match is
    /// an error, none is `None`.
    pub fn resolve_oid(&self, s: &str) -> Result<Option<Oid>> {
        if s.len() == 40 {
            let oid = Oid::from_hex(s)?;
            return Ok(self.has(&oid)?.then_some(oid));
        }
        let short = ShortOid::new(s)?;
        let matches =
            self.rows
                .scan_prefix(Table::ObjectIndex, short.as_str().as_bytes(), Some(2))?;
        match matches.len() {
            0 => Ok(None),
            1 => {
                let hex = std::str::from_utf8(&matches[0].0)
                    .map_err(|_| Error::RowDecode("non-utf8 index key".to_string()))?;
                Ok(Some(Oid::from_hex(hex)?))
            }
            _ => Err(Error::AmbiguousOid {
                prefix: short.as_str().to_string(),
                count: matches.len(),
            }),
        }
    }

    /// fetch by full oid or short prefix string
    pub fn get_by_prefix(&self, s: &str) -> Result<Option<(Kind, Vec<u8>)>> {
        match self.resolve_oid(s)? {
            Some(oid) => self.get(&oid),
            None => Ok(None),
        }
    }

    /// fetch many objects, preserving input order
    ///
    /// cache first; the remaining misses go to the backend in one batched
    /// round-trip per table, grouped per bundle for warm objects.
    pub fn get_batch(&self, oids: &[Oid]) -> Result<Vec<Option<(Kind, Vec<u8>)>>> {
        let mut out: Vec<Option<(Kind, Vec<u8>)>> = vec![None; oids.len()];
        let mut misses: Vec<(usize, Oid)> = Vec::new();

        {
            let mut cache = self.cache.lock().unwrap();
            for (i, oid) in oids.iter().enumerate() {
                if let Some(cached) = cache.get(&oid.to_hex()) {
                    out[i] = Some((cached.0, cached.1.clone()));
                } else {
                    misses.push((i, *oid));
                }
            }
        }
        if misses.is_empty() {
            return Ok(out);
        }

        let index_keys: Vec<Vec<u8>> = misses
            .iter()
            .map(|(_, oid)| oid.to_hex().into_bytes())
            .collect();
        let key_refs: Vec<&[u8]> = index_keys.iter().map(|k| k.as_slice()).collect();
        let index_rows = self.rows.get_many(Table::ObjectIndex, &key_refs)?;

        // group warm misses per bundle so each bundle serves one batch
        let mut per_bundle: HashMap<String, Vec<(usize, Oid)>> = HashMap::new();
        for ((i, oid), row) in misses.iter().zip(index_rows) {
            let Some(row) = row else { continue };
            let index: IndexRow = decode_row(&row)?;
            match index.tier {
                Tier::Hot => {
                    if let Some(bytes) = self.rows.get(Table::Objects, oid.as_bytes())? {
                        let object: ObjectRow = decode_row(&bytes)?;
                        self.cache_insert(oid, object.kind, object.data.clone());
                        out[*i] = Some((object.kind, object.data));
                    }
                }
                Tier::Warm | Tier::Cold => {
                    if let Some(key) = index.bundle_key {
                        per_bundle.entry(key).or_default().push((*i, *oid));
                    }
                }
            }
        }

        for (key, slots) in per_bundle {
            let pending: Vec<Option<(Kind, Vec<u8>)>> = {
                let writer = self.writer.lock().unwrap();
                if writer.current_key() == key {
                    slots.iter().map(|(_, oid)| writer.pending_get(oid)).collect()
                } else {
                    vec![None; slots.len()]
                }
            };
            let mut remaining = Vec::new();
            for ((i, oid), found) in slots.iter().zip(pending) {
                match found {
                    Some((kind, payload)) => {
                        self.cache_insert(oid, kind, payload.clone());
                        out[*i] = Some((kind, payload));
                    }
                    None => remaining.push((*i, *oid)),
                }
            }
            if remaining.is_empty() {
                continue;
            }
            let batch_oids: Vec<Oid> = remaining.iter().map(|(_, oid)| *oid).collect();
            let results = self.reader.get_batch(&key, &batch_oids)?;
            for ((i, oid), result) in remaining.iter().zip(results) {
                if let Some((kind, payload)) = result {
                    self.cache_insert(oid, kind, payload.clone());
                    out[*i] = Some((kind, payload));
                }
            }
        }

        Ok(out)
    }

    /// list objects of one kind, up to `limit`
    pub fn list_by_kind(&self, kind: Kind, limit: usize) -> Result<Vec<(Oid, Vec<u8>)>> {
        let mut found = Vec::new();
        for (key, value) in self.rows.scan_prefix(Table::ObjectIndex, &[], None)? {
            if found.len() >= limit {
                break;
            }
            let index: IndexRow = decode_row(&value)?;
            if index.kind != kind {
                continue;
            }
            let hex = std::str::from_utf8(&key)
                .map_err(|_| Error::RowDecode("non-utf8 index key".to_string()))?;
            let oid = Oid::from_hex(hex)?;
            if let Some((_, payload)) = self.get(&oid)? {
                found.push((oid, payload));
            }
        }
        Ok(found)
    }

    /// move a warm object's payload into the row store
    ///
    /// the hot copy is written first, then the index row flips; the
    /// bundle copy is left for compaction to reclaim.
    pub fn promote(&self, oid: &Oid) -> Result<()> {
        let Some(mut index) = self.index_row(oid)? else {
            return Err(Error::ObjectNotFound(*oid));
        };
        if index.tier == Tier::Hot {
            return Ok(());
        }
        let Some((kind, payload)) = self.fetch_tiered(oid, &index)? else {
            return Err(Error::ObjectNotFound(*oid));
        };
        let row = ObjectRow {
            kind,
            size: payload.len() as u64,
            data: payload,
            created_at: unix_now(),
        };
        self.rows
            .put(Table::Objects, oid.as_bytes(), &encode_row(&row)?)?;
        index.tier = Tier::Hot;
        index.bundle_key = None;
        self.put_index_row(oid, &index)?;
        self.wal.append(WalRecord::Object {
            op: ObjectOp::Promote,
            oid: *oid,
            kind,
        })?;
        debug!(%oid, "promoted object to hot tier");
        Ok(())
    }

    /// move a hot object's payload into the warm tier
    pub fn demote(&self, oid: &Oid) -> Result<()> {
        let Some(mut index) = self.index_row(oid)? else {
            return Err(Error::ObjectNotFound(*oid));
        };
        if index.tier != Tier::Hot {
            return Ok(());
        }
        let Some((kind, payload)) = self.fetch_tiered(oid, &index)? else {
            return Err(Error::ObjectNotFound(*oid));
        };

        // warm copy first, then the index flip, then the hot copy goes
        let bundle_key = {
            let mut writer = self.writer.lock().unwrap();
            writer.add(*oid, kind, payload)?;
            writer.current_key().to_string()
        };
        index.tier = Tier::Warm;
        index.bundle_key = Some(bundle_key);
        self.put_index_row(oid, &index)?;
        self.rows.delete(Table::Objects, oid.as_bytes())?;
        self.wal.append(WalRecord::Object {
            op: ObjectOp::Demote,
            oid: *oid,
            kind,
        })?;
        debug!(%oid, "demoted object to warm tier");
        Ok(())
    }

    // typed accessors

    pub fn put_blob(&self, payload: &[u8]) -> Result<Oid> {
        self.put(Kind::Blob, payload)
    }

    pub fn put_tree(&self, tree: &Tree) -> Result<Oid> {
        self.put(Kind::Tree, &tree.serialize())
    }

    pub fn put_commit(&self, commit: &Commit) -> Result<Oid> {
        self.put(Kind::Commit, &commit.serialize())
    }

    pub fn put_tag(&self, tag: &Tag) -> Result<Oid> {
        self.put(Kind::Tag, &tag.serialize())
    }

    pub fn get_blob(&self, oid: &Oid) -> Result<Vec<u8>> {
        let (kind, payload) = self.require(oid)?;
        self.expect_kind(oid, kind, Kind::Blob)?;
        Ok(payload)
    }

    pub fn get_tree(&self, oid: &Oid) -> Result<Tree> {
        let (kind, payload) = self.require(oid)?;
        self.expect_kind(oid, kind, Kind::Tree)?;
        Tree::parse(&payload)
    }

    pub fn get_commit(&self, oid: &Oid) -> Result<Commit> {
        let (kind, payload) = self.require(oid)?;
        self.expect_kind(oid, kind, Kind::Commit)?;
        Commit::parse(&payload)
    }

    pub fn get_tag(&self, oid: &Oid) -> Result<Tag> {
        let (kind, payload) = self.require(oid)?;
        self.expect_kind(oid, kind, Kind::Tag)?;
        Tag::parse(&payload)
    }

    /// depth-first walk of a tree, yielding `(path, entry)` pairs
    ///
    /// subtree entries themselves are only yielded when `include_subtrees`
    /// is set; their contents always are.
    pub fn walk_tree(
        &self,
        root: &Oid,
        include_subtrees: bool,
        cancel: &CancelToken,
    ) -> Result<Vec<(String, TreeEntry)>> {
        let mut out = Vec::new();
        self.walk_tree_into(root, "", include_subtrees, cancel, &mut out)?;
        Ok(out)
    }

    fn walk_tree_into(
        &self,
        tree_oid: &Oid,
        prefix: &str,
        include_subtrees: bool,
        cancel: &CancelToken,
        out: &mut Vec<(String, TreeEntry)>,
    ) -> Result<()> {
        cancel.check()?;
        let tree = self.get_tree(tree_oid)?;
        for entry in tree.entries() {
            let path = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{prefix}/{}", entry.name)
            };
            if entry.mode.is_subtree() {
                if include_subtrees {
                    out.push((path.clone(), entry.clone()));
                }
                self.walk_tree_into(&entry.oid, &path, include_subtrees, cancel, out)?;
            } else {
                out.push((path, entry.clone()));
            }
        }
        Ok(())
    }

    /// repoint warm index rows after compaction relocated their bundles
    pub fn rebind_bundle_keys(&self, relocated: &[(Oid, String)]) -> Result<()> {
        for (oid, key) in relocated {
            if let Some(mut index) = self.index_row(oid)? {
                if matches!(index.tier, Tier::Warm | Tier::Cold) {
                    index.bundle_key = Some(key.clone());
                    self.put_index_row(oid, &index)?;
                }
            }
        }
        Ok(())
    }

    /// seal the open bundle, if any
    pub fn flush_bundles(&self) -> Result<()> {
        self.writer.lock().unwrap().flush()?;
        Ok(())
    }

    /// close the bundle writer; further warm puts fail
    pub fn close(&self) -> Result<()> {
        self.writer.lock().unwrap().close()?;
        Ok(())
    }

    /// periodic upkeep: flush WAL marks, drop flushed entries, sweep the
    /// cache for expired entries
    pub fn maintenance(&self) -> Result<()> {
        let entries = self.wal.entries()?;
        if let Some(last) = entries.last() {
            self.wal.mark_flushed(last.seq)?;
        }
        self.wal.truncate()?;
        self.cache.lock().unwrap().purge_expired();
        Ok(())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            puts: self.metrics.puts.load(Ordering::Relaxed),
            gets: self.metrics.gets.load(Ordering::Relaxed),
            deletes: self.metrics.deletes.load(Ordering::Relaxed),
            cache_hits: self.metrics.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.metrics.cache_misses.load(Ordering::Relaxed),
            bytes_written: self.metrics.bytes_written.load(Ordering::Relaxed),
            bundle_rotations: self.metrics.bundle_rotations.load(Ordering::Relaxed),
        }
    }

    /// tier of an object, if stored
    pub fn tier_of(&self, oid: &Oid) -> Result<Option<Tier>> {
        Ok(self.index_row(oid)?.map(|r| r.tier))
    }

    /// oids of every stored object, with their bundle key if warm
    pub fn all_index_entries(&self) -> Result<Vec<(Oid, Option<String>)>> {
        let mut out = Vec::new();
        for (key, value) in self.rows.scan_prefix(Table::ObjectIndex, &[], None)? {
            let hex = std::str::from_utf8(&key)
                .map_err(|_| Error::RowDecode("non-utf8 index key".to_string()))?;
            let index: IndexRow = decode_row(&value)?;
            out.push((Oid::from_hex(hex)?, index.bundle_key));
        }
        Ok(out)
    }

    fn require(&self, oid: &Oid) -> Result<(Kind, Vec<u8>)> {
        self.get(oid)?.ok_or(Error::ObjectNotFound(*oid))
    }

    fn expect_kind(&self, oid: &Oid, actual: Kind, expected: Kind) -> Result<()> {
        if actual != expected {
            return Err(Error::InvalidObject(format!(
                "{oid} is a {actual}, expected {expected}"
            )));
        }
        Ok(())
    }

    fn fetch_tiered(&self, oid: &Oid, index: &IndexRow) -> Result<Option<(Kind, Vec<u8>)>> {
        match index.tier {
            Tier::Hot => match self.rows.get(Table::Objects, oid.as_bytes())? {
                Some(bytes) => {
                    let row: ObjectRow = decode_row(&bytes)?;
                    Ok(Some((row.kind, row.data)))
                }
                None => Ok(None),
            },
            Tier::Warm | Tier::Cold => {
                let Some(key) = &index.bundle_key else {
                    return Err(Error::BundleCorrupted(format!(
                        "warm object {oid} has no bundle key"
                    )));
                };
                // the open bundle is not in the bucket yet
                {
                    let writer = self.writer.lock().unwrap();
                    if writer.current_key() == key.as_str() {
                        if let Some(found) = writer.pending_get(oid) {
                            return Ok(Some(found));
                        }
                    }
                }
                self.reader.get(key, oid)
            }
        }
    }

    fn index_row(&self, oid: &Oid) -> Result<Option<IndexRow>> {
        match self.rows.get(Table::ObjectIndex, oid.to_hex().as_bytes())? {
            Some(bytes) => Ok(Some(decode_row(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_index_row(&self, oid: &Oid, row: &IndexRow) -> Result<()> {
        self.rows
            .put(Table::ObjectIndex, oid.to_hex().as_bytes(), &encode_row(row)?)
    }

    fn cache_insert(&self, oid: &Oid, kind: Kind, payload: Vec<u8>) {
        let bytes = payload.len() as u64;
        self.cache
            .lock()
            .unwrap()
            .put(oid.to_hex(), Arc::new((kind, payload)), bytes);
    }
}

enum ChunkSource {
    Memory(Vec<u8>),
    Bundle {
        reader: Arc<BundleReader>,
        key: String,
        oid: Oid,
    },
}

/// chunked blob payload iterator, 64 KiB per chunk
pub struct BlobChunks {
    source: ChunkSource,
    size: u64,
    pos: u64,
}

const CHUNK_SIZE: u64 = 64 * 1024;

impl Iterator for BlobChunks {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.size {
            return None;
        }
        let len = CHUNK_SIZE.min(self.size - self.pos);
        let chunk = match &self.source {
            ChunkSource::Memory(payload) => {
                let start = self.pos as usize;
                Ok(payload[start..start + len as usize].to_vec())
            }
            ChunkSource::Bundle { reader, key, oid } => {
                match reader.get_range(key, oid, self.pos, len) {
                    Ok(Some(bytes)) => Ok(bytes),
                    Ok(None) => Err(Error::ObjectNotFound(*oid)),
                    Err(e) => Err(e),
                }
            }
        };
        self.pos += len;
        Some(chunk)
    }
}
