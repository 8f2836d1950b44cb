use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bundle::format::{create_bundle, parse_bundle};
use crate::bundle::reader::BundleReader;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::object::Kind;
use crate::oid::Oid;
use crate::store::bucket::ObjectBucket;

/// thresholds steering a compaction run
#[derive(Clone, Debug)]
pub struct CompactionOptions {
    /// bundles smaller than this are candidates
    pub small_bundle_threshold: u64,
    /// dead/total ratio above which a bundle is a candidate
    pub dead_object_threshold: f64,
    /// fewer candidates than this and the run is a no-op
    pub min_bundles_for_compaction: usize,
    /// payload size limit for the new bundles
    pub max_bundle_size: u64,
    /// bucket key prefix for both listing and the new bundles
    pub key_prefix: String,
}

/// outcome of one compaction run
#[derive(Clone, Debug, Default)]
pub struct CompactionReport {
    pub source_bundles: Vec<String>,
    pub target_bundles: Vec<String>,
    pub objects_moved: usize,
    pub bytes_saved: u64,
    /// new bundle key per moved object, for the owner to rebind its rows
    pub relocated: Vec<(Oid, String)>,
}

/// liveness oracle; `None` means everything is live
pub type IsLive<'a> = Option<&'a dyn Fn(&Oid) -> bool>;

/// fold small or fragmented bundles into fresh live-only ones
///
/// all new bundles are written before any source is deleted, so a crash in
/// between leaves every object present (some twice). `rebind` runs between
/// the two phases so the owner can repoint its rows at the new bundles;
/// the compactor itself never writes rows.
pub fn compact(
    bucket: &Arc<dyn ObjectBucket>,
    reader: &BundleReader,
    is_live: IsLive<'_>,
    options: &CompactionOptions,
    cancel: &CancelToken,
    rebind: &mut dyn FnMut(&[(Oid, String)]) -> Result<()>,
) -> Result<CompactionReport> {
    let mut keys = bucket.list(&options.key_prefix)?;
    keys.sort();

    // phase 1: pick candidates
    let mut candidates = Vec::new();
    let mut source_bytes = 0u64;
    for key in &keys {
        cancel.check()?;
        let bundle = match reader.index(key) {
            Ok(bundle) => bundle,
            Err(Error::BundleNotFound(_)) => continue,
            Err(e) => return Err(e),
        };
        let total = bundle.entries.len();
        let dead = match is_live {
            Some(live) => bundle.entries.iter().filter(|e| !live(&e.oid)).count(),
            None => 0,
        };
        let dead_ratio = if total == 0 {
            1.0
        } else {
            dead as f64 / total as f64
        };
        let small = bundle.header.total_size < options.small_bundle_threshold;
        let fragmented = dead_ratio > options.dead_object_threshold;
        if small || fragmented {
            debug!(key, total, dead, small, fragmented, "compaction candidate");
            source_bytes += bundle.header.total_size;
            candidates.push(key.clone());
        }
    }

    if candidates.len() < options.min_bundles_for_compaction {
        debug!(
            candidates = candidates.len(),
            needed = options.min_bundles_for_compaction,
            "not enough candidates, skipping compaction"
        );
        return Ok(CompactionReport::default());
    }

    // phase 2: collect live objects, first occurrence wins
    let mut live_objects: BTreeMap<Oid, (Kind, Vec<u8>)> = BTreeMap::new();
    for key in &candidates {
        cancel.check()?;
        let bytes = bucket
            .get(key)?
            .ok_or_else(|| Error::BundleNotFound(key.clone()))?;
        let bundle = parse_bundle(&bytes)?;
        for entry in &bundle.entries {
            if let Some(live) = is_live {
                if !live(&entry.oid) {
                    continue;
                }
            }
            if live_objects.contains_key(&entry.oid) {
                continue;
            }
            let start = entry.offset as usize;
            let payload = bytes[start..start + entry.size as usize].to_vec();
            live_objects.insert(entry.oid, (entry.kind, payload));
        }
    }

    // phase 3: repartition into new bundles under the size limit
    let mut partitions: Vec<BTreeMap<Oid, (Kind, Vec<u8>)>> = Vec::new();
    let mut current: BTreeMap<Oid, (Kind, Vec<u8>)> = BTreeMap::new();
    let mut current_bytes = 0u64;
    for (oid, (kind, payload)) in live_objects {
        let len = payload.len() as u64;
        if !current.is_empty() && current_bytes + len > options.max_bundle_size {
            partitions.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += len;
        current.insert(oid, (kind, payload));
    }
    if !current.is_empty() {
        partitions.push(current);
    }

    // phase 4: write every new bundle; on failure remove partial output
    // and leave the sources alone
    let mut targets: Vec<String> = Vec::new();
    let mut relocated = Vec::new();
    let mut target_bytes = 0u64;
    let mut objects_moved = 0usize;
    for partition in &partitions {
        cancel.check()?;
        let key = format!("{}{}.bundle", options.key_prefix, uuid::Uuid::new_v4());
        let result = create_bundle(partition).and_then(|bytes| {
            target_bytes += bytes.len() as u64;
            bucket.put(&key, &bytes)
        });
        if let Err(e) = result {
            warn!(error = %e, "compaction write failed, rolling back new bundles");
            for written in &targets {
                let _ = bucket.delete(written);
            }
            return Err(e);
        }
        objects_moved += partition.len();
        relocated.extend(partition.keys().map(|oid| (*oid, key.clone())));
        targets.push(key);
    }

    // phase 5: repoint rows, then drop the sources
    rebind(&relocated)?;
    for key in &candidates {
        bucket.delete(key)?;
        reader.invalidate(key);
    }

    let report = CompactionReport {
        source_bundles: candidates,
        target_bundles: targets,
        objects_moved,
        bytes_saved: source_bytes.saturating_sub(target_bytes),
        relocated,
    };
    info!(
        sources = report.source_bundles.len(),
        targets = report.target_bundles.len(),
        objects = report.objects_moved,
        bytes_saved = report.bytes_saved,
        "compaction complete"
    );
    Ok(report)
}
