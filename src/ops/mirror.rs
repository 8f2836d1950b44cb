use std::collections::HashSet;

use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::object::Kind;
use crate::oid::Oid;
use crate::ops::walk::is_ancestor;
use crate::pack::{emit_pack, parse_pack};
use crate::refs::{RefStore, RefTarget};
use crate::store::objects::ObjectStore;

/// sync direction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncDirection {
    Pull,
    Push,
    /// pull, then push
    Bidirectional,
}

/// what to do when local and remote diverged
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MirrorConflictStrategy {
    /// take the remote side
    ForceRemote,
    /// keep the local side
    ForceLocal,
    /// leave the ref alone
    #[default]
    Skip,
    /// fail the sync
    Error,
}

/// options for [`mirror_sync`]
#[derive(Clone, Debug)]
pub struct MirrorOptions {
    pub direction: SyncDirection,
    pub conflict_strategy: MirrorConflictStrategy,
    /// glob include list on ref names; empty means `refs/heads/*` and
    /// `refs/tags/*`
    pub ref_patterns: Vec<String>,
    /// glob exclude list on ref names
    pub exclude_patterns: Vec<String>,
    pub cancel: CancelToken,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            direction: SyncDirection::Pull,
            conflict_strategy: MirrorConflictStrategy::default(),
            ref_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            cancel: CancelToken::new(),
        }
    }
}

/// per-ref outcome of one sync
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncReport {
    pub ref_name: String,
    pub previous: Option<Oid>,
    pub new: Option<Oid>,
    pub updated: bool,
    pub fast_forward: bool,
    pub conflict: bool,
    /// how a divergence was settled
    pub resolution: Option<&'static str>,
}

/// the far side of a sync, wire protocol abstracted away
///
/// the pack codec is the exchange format; a transport implements listing
/// and pack transfer however it reaches the other repository.
pub trait Remote {
    fn list_refs(&self) -> Result<Vec<(String, Oid)>>;

    /// a pack holding everything reachable from `wants` minus everything
    /// reachable from `haves`
    fn fetch_pack(&self, wants: &[Oid], haves: &[Oid]) -> Result<Vec<u8>>;

    /// ingest a pack and apply ref updates `(name, expected_old, new)`
    fn push_pack(&self, pack: &[u8], updates: &[(String, Option<Oid>, Oid)]) -> Result<()>;
}

/// progress callback, called with coarse stage descriptions
pub type Progress<'a> = &'a mut dyn FnMut(&str);

/// synchronise refs and objects with a remote
pub fn mirror_sync(
    objects: &ObjectStore,
    refs: &RefStore,
    remote: &dyn Remote,
    options: &MirrorOptions,
    mut progress: Option<Progress<'_>>,
) -> Result<Vec<SyncReport>> {
    let mut reports = Vec::new();
    if matches!(options.direction, SyncDirection::Pull | SyncDirection::Bidirectional) {
        reports.extend(pull(objects, refs, remote, options, &mut progress)?);
    }
    if matches!(options.direction, SyncDirection::Push | SyncDirection::Bidirectional) {
        reports.extend(push(objects, refs, remote, options, &mut progress)?);
    }
    info!(refs = reports.len(), "mirror sync finished");
    Ok(reports)
}

fn pull(
    objects: &ObjectStore,
    refs: &RefStore,
    remote: &dyn Remote,
    options: &MirrorOptions,
    progress: &mut Option<Progress<'_>>,
) -> Result<Vec<SyncReport>> {
    report_stage(progress, "listing remote refs");
    let filter = RefPatternFilter::new(options)?;
    let remote_refs: Vec<(String, Oid)> = remote
        .list_refs()?
        .into_iter()
        .filter(|(name, _)| filter.matches(name))
        .collect();

    // fetch before deciding: divergence is only judgeable once the remote
    // tips are local
    let mut wants = Vec::new();
    for (_, remote_oid) in &remote_refs {
        options.cancel.check()?;
        if !objects.has(remote_oid)? {
            wants.push(*remote_oid);
        }
    }
    if !wants.is_empty() {
        report_stage(progress, "fetching objects");
        let haves = local_tips(refs)?;
        let pack = remote.fetch_pack(&wants, &haves)?;
        ingest_pack(objects, &pack, &options.cancel)?;
    }

    report_stage(progress, "applying ref updates");
    let mut reports = Vec::new();
    for (name, remote_oid) in remote_refs {
        options.cancel.check()?;
        let previous = refs.resolve(&name)?;
        let plan = plan_update(objects, previous, &remote_oid, options.conflict_strategy)?;
        if let Plan::Fail = plan {
            return Err(Error::RefConflict(format!(
                "{name} diverged from the remote"
            )));
        }
        let report = match plan {
            Plan::Noop => SyncReport {
                ref_name: name,
                previous,
                new: Some(remote_oid),
                updated: false,
                fast_forward: false,
                conflict: false,
                resolution: None,
            },
            Plan::Skipped => SyncReport {
                ref_name: name,
                previous,
                new: previous,
                updated: false,
                fast_forward: false,
                conflict: true,
                resolution: Some("skip"),
            },
            Plan::Update {
                fast_forward,
                resolution,
            } => {
                refs.set(&name, &remote_oid)?;
                debug!(ref_name = %name, %remote_oid, "pulled ref");
                SyncReport {
                    ref_name: name,
                    previous,
                    new: Some(remote_oid),
                    updated: true,
                    fast_forward,
                    conflict: resolution.is_some(),
                    resolution,
                }
            }
            Plan::Fail => unreachable!("failures surfaced above"),
        };
        reports.push(report);
    }
    Ok(reports)
}

fn push(
    objects: &ObjectStore,
    refs: &RefStore,
    remote: &dyn Remote,
    options: &MirrorOptions,
    progress: &mut Option<Progress<'_>>,
) -> Result<Vec<SyncReport>> {
    report_stage(progress, "comparing refs for push");
    let filter = RefPatternFilter::new(options)?;
    let remote_refs: Vec<(String, Oid)> = remote.list_refs()?;
    let remote_by_name: std::collections::HashMap<&str, &Oid> = remote_refs
        .iter()
        .map(|(name, oid)| (name.as_str(), oid))
        .collect();

    let mut reports = Vec::new();
    let mut updates = Vec::new();
    let mut wants = Vec::new();
    for r in refs.list_by_prefix("refs/")? {
        options.cancel.check()?;
        let RefTarget::Direct(local_oid) = r.target else {
            continue;
        };
        if !filter.matches(&r.name) {
            continue;
        }
        let remote_oid = remote_by_name.get(r.name.as_str()).copied().copied();

        // the remote plays "ours" when pushing: force-local overwrites it
        let plan = match remote_oid {
            None => Plan::Update {
                fast_forward: true,
                resolution: None,
            },
            Some(remote_oid) if remote_oid == local_oid => Plan::Noop,
            Some(remote_oid) => {
                if is_ancestor(objects, &remote_oid, &local_oid)? {
                    Plan::Update {
                        fast_forward: true,
                        resolution: None,
                    }
                } else {
                    match options.conflict_strategy {
                        MirrorConflictStrategy::ForceLocal => Plan::Update {
                            fast_forward: false,
                            resolution: Some("force-local"),
                        },
                        MirrorConflictStrategy::ForceRemote | MirrorConflictStrategy::Skip => {
                            Plan::Skipped
                        }
                        MirrorConflictStrategy::Error => {
                            return Err(Error::RefConflict(format!(
                                "{} diverged from the remote",
                                r.name
                            )))
                        }
                    }
                }
            }
        };

        match plan {
            Plan::Noop => reports.push(SyncReport {
                ref_name: r.name,
                previous: remote_oid,
                new: Some(local_oid),
                updated: false,
                fast_forward: false,
                conflict: false,
                resolution: None,
            }),
            Plan::Skipped => reports.push(SyncReport {
                ref_name: r.name,
                previous: remote_oid,
                new: remote_oid,
                updated: false,
                fast_forward: false,
                conflict: true,
                resolution: Some("skip"),
            }),
            Plan::Update {
                fast_forward,
                resolution,
            } => {
                wants.push(local_oid);
                updates.push((r.name.clone(), remote_oid, local_oid));
                reports.push(SyncReport {
                    ref_name: r.name,
                    previous: remote_oid,
                    new: Some(local_oid),
                    updated: true,
                    fast_forward,
                    conflict: resolution.is_some(),
                    resolution,
                });
            }
            Plan::Fail => unreachable!(),
        }
    }

    if !updates.is_empty() {
        report_stage(progress, "sending pack");
        let haves: Vec<Oid> = remote_refs.iter().map(|(_, oid)| *oid).collect();
        let pack = build_pack(objects, &wants, &haves, &options.cancel)?;
        remote.push_pack(&pack, &updates)?;
        debug!(updates = updates.len(), "pushed refs");
    }
    Ok(reports)
}

enum Plan {
    Noop,
    Skipped,
    Update {
        fast_forward: bool,
        resolution: Option<&'static str>,
    },
    Fail,
}

/// decide what a pulled ref should do; fast-forward is always accepted
fn plan_update(
    objects: &ObjectStore,
    local: Option<Oid>,
    remote: &Oid,
    strategy: MirrorConflictStrategy,
) -> Result<Plan> {
    Ok(match local {
        None => Plan::Update {
            fast_forward: true,
            resolution: None,
        },
        Some(local) if local == *remote => Plan::Noop,
        Some(local) => {
            if is_ancestor(objects, remote, &local)? {
                // remote is behind us: nothing to pull
                Plan::Noop
            } else if is_ancestor(objects, &local, remote)? {
                Plan::Update {
                    fast_forward: true,
                    resolution: None,
                }
            } else {
                match strategy {
                    MirrorConflictStrategy::ForceRemote => Plan::Update {
                        fast_forward: false,
                        resolution: Some("force-remote"),
                    },
                    MirrorConflictStrategy::ForceLocal | MirrorConflictStrategy::Skip => {
                        Plan::Skipped
                    }
                    MirrorConflictStrategy::Error => Plan::Fail,
                }
            }
        }
    })
}

struct RefPatternFilter {
    includes: Vec<glob::Pattern>,
    excludes: Vec<glob::Pattern>,
}

impl RefPatternFilter {
    fn new(options: &MirrorOptions) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<glob::Pattern>> {
            patterns
                .iter()
                .map(|p| glob::Pattern::new(p).map_err(|e| Error::GlobPattern(e.to_string())))
                .collect()
        };
        let includes = if options.ref_patterns.is_empty() {
            vec![
                glob::Pattern::new("refs/heads/*").unwrap(),
                glob::Pattern::new("refs/tags/*").unwrap(),
            ]
        } else {
            compile(&options.ref_patterns)?
        };
        Ok(Self {
            includes,
            excludes: compile(&options.exclude_patterns)?,
        })
    }

    fn matches(&self, name: &str) -> bool {
        if self.excludes.iter().any(|p| p.matches(name)) {
            return false;
        }
        self.includes.iter().any(|p| p.matches(name))
    }
}

fn report_stage(progress: &mut Option<Progress<'_>>, stage: &str) {
    if let Some(callback) = progress {
        callback(stage);
    }
}

fn local_tips(refs: &RefStore) -> Result<Vec<Oid>> {
    Ok(refs
        .list_by_prefix("refs/")?
        .into_iter()
        .filter_map(|r| match r.target {
            RefTarget::Direct(oid) => Some(oid),
            RefTarget::Symbolic(_) => None,
        })
        .collect())
}

/// every object reachable from `tips` that exists locally
pub(crate) fn collect_reachable(
    objects: &ObjectStore,
    tips: &[Oid],
    cancel: &CancelToken,
) -> Result<HashSet<Oid>> {
    let mut seen = HashSet::new();
    let mut queue: Vec<Oid> = tips.to_vec();
    while let Some(oid) = queue.pop() {
        cancel.check()?;
        if !seen.insert(oid) {
            continue;
        }
        match objects.get(&oid)? {
            None => {
                seen.remove(&oid);
            }
            Some((Kind::Commit, payload)) => {
                let commit = crate::object::Commit::parse(&payload)?;
                queue.push(commit.tree);
                queue.extend(commit.parents);
            }
            Some((Kind::Tree, payload)) => {
                let tree = crate::object::Tree::parse(&payload)?;
                queue.extend(tree.entries().iter().map(|e| e.oid));
            }
            Some((Kind::Tag, payload)) => {
                let tag = crate::object::Tag::parse(&payload)?;
                queue.push(tag.target);
            }
            Some((Kind::Blob, _)) => {}
        }
    }
    Ok(seen)
}

/// pack of everything reachable from `wants` and absent from `haves`
pub(crate) fn build_pack(
    objects: &ObjectStore,
    wants: &[Oid],
    haves: &[Oid],
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    let want_set = collect_reachable(objects, wants, cancel)?;
    let have_set = collect_reachable(objects, haves, cancel)?;
    let mut missing: Vec<Oid> = want_set.difference(&have_set).copied().collect();
    missing.sort();

    let mut payload = Vec::with_capacity(missing.len());
    for oid in missing {
        let (kind, bytes) = objects.get(&oid)?.ok_or(Error::ObjectNotFound(oid))?;
        payload.push((kind, bytes));
    }
    let (pack, _) = emit_pack(&payload)?;
    Ok(pack)
}

/// parse a pack and store every object
pub(crate) fn ingest_pack(objects: &ObjectStore, pack: &[u8], cancel: &CancelToken) -> Result<usize> {
    let parsed = parse_pack(pack)?;
    let count = parsed.len();
    for object in parsed {
        cancel.check()?;
        objects.put(object.kind, &object.payload)?;
    }
    Ok(count)
}

/// a [`Remote`] over another engine instance in the same process; the
/// reference transport and the test double for the wire layer
pub struct LoopbackRemote<'a> {
    objects: &'a ObjectStore,
    refs: &'a RefStore,
}

impl<'a> LoopbackRemote<'a> {
    pub fn new(objects: &'a ObjectStore, refs: &'a RefStore) -> Self {
        Self { objects, refs }
    }
}

impl Remote for LoopbackRemote<'_> {
    fn list_refs(&self) -> Result<Vec<(String, Oid)>> {
        Ok(self
            .refs
            .list_by_prefix("refs/")?
            .into_iter()
            .filter_map(|r| match r.target {
                RefTarget::Direct(oid) => Some((r.name, oid)),
                RefTarget::Symbolic(_) => None,
            })
            .collect())
    }

    fn fetch_pack(&self, wants: &[Oid], haves: &[Oid]) -> Result<Vec<u8>> {
        // ignore haves we do not hold
        let mut known_haves = Vec::new();
        for oid in haves {
            if self.objects.has(oid)? {
                known_haves.push(*oid);
            }
        }
        build_pack(self.objects, wants, &known_haves, &CancelToken::new())
    }

    fn push_pack(&self, pack: &[u8], updates: &[(String, Option<Oid>, Oid)]) -> Result<()> {
        ingest_pack(self.objects, pack, &CancelToken::new())?;
        for (name, expected_old, new) in updates {
            self.refs.update(name, expected_old.as_ref(), Some(new))?;
        }
        Ok(())
    }
}
