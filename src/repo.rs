use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::bundle::compactor::{compact, CompactionOptions, CompactionReport};
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::object::{Commit, Signature};
use crate::oid::Oid;
use crate::ops::merge::merge_state;
use crate::ops::mirror::collect_reachable;
use crate::refs::branch::resolve_start_point;
use crate::refs::{RefStore, RefTarget, HEAD};
use crate::store::bucket::{MemoryBucket, ObjectBucket};
use crate::store::objects::{MetricsSnapshot, ObjectStore};
use crate::store::row::{MemoryRowStore, RowStore};
use crate::store::wal::{unix_now, Wal};

/// one repository inside one isolate
///
/// owns the host capabilities and the stores built over them; higher
/// operations live in [`crate::ops`] and take the stores this hands out.
pub struct Repository {
    config: Config,
    bucket: Arc<dyn ObjectBucket>,
    wal: Arc<Wal>,
    objects: ObjectStore,
    refs: RefStore,
}

impl Repository {
    /// open a repository over host capabilities
    ///
    /// first use seeds HEAD as a symbolic ref to the default branch; an
    /// existing repository is picked up as-is.
    pub fn open(
        rows: Arc<dyn RowStore>,
        bucket: Arc<dyn ObjectBucket>,
        config: Config,
    ) -> Result<Self> {
        let wal = Arc::new(Wal::open(rows.clone())?);
        let objects = ObjectStore::new(rows.clone(), bucket.clone(), wal.clone(), &config);
        let refs = RefStore::new(rows, wal.clone());

        if refs.get(HEAD)?.is_none() {
            refs.set_head_branch(&config.default_branch)?;
            info!(branch = %config.default_branch, "initialised repository head");
        }

        Ok(Self {
            config,
            bucket,
            wal,
            objects,
            refs,
        })
    }

    /// a repository over in-memory capabilities, for tests and tooling
    pub fn in_memory(config: Config) -> Result<Self> {
        Self::open(
            Arc::new(MemoryRowStore::new()),
            Arc::new(MemoryBucket::new()),
            config,
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }

    /// what HEAD currently resolves to
    pub fn head(&self) -> Result<Option<Oid>> {
        self.refs.resolve_head()
    }

    /// resolve a revision string: HEAD, oid, short oid, branch, or tag
    pub fn resolve_revision(&self, rev: &str) -> Result<Option<Oid>> {
        resolve_start_point(&self.objects, &self.refs, rev)
    }

    /// create a commit with the configured identity and advance HEAD
    pub fn commit_tree(
        &self,
        tree: &Oid,
        parents: Vec<Oid>,
        message: impl Into<String>,
    ) -> Result<Oid> {
        let identity = self.config.identity.as_ref().ok_or(Error::MissingIdentity)?;
        let signature = Signature::new(
            identity.name.clone(),
            identity.email.clone(),
            unix_now(),
            0,
        );
        let commit = Commit::new(*tree, parents, signature.clone(), signature, message);
        let oid = self.objects.put_commit(&commit)?;

        match self.refs.current_branch()? {
            Some(branch) => self
                .refs
                .set(&format!("refs/heads/{branch}"), &oid)?,
            None => self.refs.detach_head(&oid)?,
        }
        Ok(oid)
    }

    /// oids of every object reachable from any ref or the merge state
    pub fn live_objects(&self, cancel: &CancelToken) -> Result<HashSet<Oid>> {
        let mut tips = Vec::new();
        for r in self.refs.list_by_prefix("refs/")? {
            if let RefTarget::Direct(oid) = r.target {
                tips.push(oid);
            }
        }
        if let Some(oid) = self.refs.resolve_head()? {
            tips.push(oid);
        }
        if let Some(state) = merge_state(&self.refs)? {
            tips.push(state.merge_head);
            tips.push(state.orig_head);
            tips.extend(state.merged_entries.values().map(|(_, oid)| *oid));
            for conflict in &state.unresolved {
                tips.extend(
                    [conflict.base, conflict.ours, conflict.theirs, conflict.preview]
                        .into_iter()
                        .flatten(),
                );
            }
        }
        collect_reachable(&self.objects, &tips, cancel)
    }

    /// fold small or fragmented warm-tier bundles into fresh ones
    ///
    /// liveness comes from a reachability pass over refs and merge state;
    /// relocated objects get their index rows repointed before the old
    /// bundles are deleted.
    pub fn compact_bundles(&self, cancel: &CancelToken) -> Result<CompactionReport> {
        // seal the open bundle so it can participate
        self.objects.flush_bundles()?;

        let live = self.live_objects(cancel)?;
        let is_live = |oid: &Oid| live.contains(oid);
        let options = CompactionOptions {
            small_bundle_threshold: self.config.small_bundle_threshold,
            dead_object_threshold: self.config.dead_object_threshold,
            min_bundles_for_compaction: self.config.min_bundles_for_compaction,
            max_bundle_size: self.config.max_bundle_size,
            key_prefix: self.config.key_prefix.clone(),
        };
        compact(
            &self.bucket,
            &self.objects.bundle_reader(),
            Some(&is_live),
            &options,
            cancel,
            &mut |relocated| self.objects.rebind_bundle_keys(relocated),
        )
    }

    /// periodic upkeep: WAL flush marks and truncation, cache TTL sweep,
    /// and optionally a compaction run
    pub fn maintenance(&self, with_compaction: bool, cancel: &CancelToken) -> Result<()> {
        self.objects.maintenance()?;
        if with_compaction {
            self.compact_bundles(cancel)?;
        }
        Ok(())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.objects.metrics()
    }
}
