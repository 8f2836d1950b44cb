use tracing::debug;

use crate::error::{Error, Result};
use crate::object::{Kind, Signature, Tag};
use crate::oid::Oid;
use crate::refs::{validate_ref_name, RefStore, RefTarget, TAGS_PREFIX};
use crate::store::objects::ObjectStore;

/// options for [`create_tag`]
#[derive(Clone, Debug, Default)]
pub struct TagOptions {
    /// annotation message; presence makes the tag annotated
    pub message: Option<String>,
    /// tagger identity for annotated tags
    pub tagger: Option<Signature>,
    /// replace an existing tag
    pub force: bool,
}

/// a listed tag
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagInfo {
    pub name: String,
    /// what the ref points at: the tag object for annotated tags, the
    /// target itself for lightweight ones
    pub oid: Oid,
    /// peeled commit
    pub target: Oid,
    pub annotated: bool,
}

/// create a lightweight or annotated tag on a target object
pub fn create_tag(
    objects: &ObjectStore,
    refs: &RefStore,
    name: &str,
    target: &Oid,
    options: &TagOptions,
) -> Result<Oid> {
    validate_ref_name(name)?;
    let ref_name = format!("{TAGS_PREFIX}{name}");
    if refs.get(&ref_name)?.is_some() && !options.force {
        return Err(Error::RefConflict(format!("tag {name} already exists")));
    }

    let Some((target_kind, _)) = objects.get(target)? else {
        return Err(Error::ObjectNotFound(*target));
    };

    let ref_target = match &options.message {
        Some(message) => {
            let tagger = options
                .tagger
                .clone()
                .ok_or(Error::MissingIdentity)?;
            let tag = Tag::new(*target, target_kind, name, tagger, message.clone());
            objects.put_tag(&tag)?
        }
        None => *target,
    };

    refs.set(&ref_name, &ref_target)?;
    debug!(tag = name, annotated = options.message.is_some(), "created tag");
    Ok(ref_target)
}

/// delete a tag ref (the tag object, if any, stays until gc)
pub fn delete_tag(refs: &RefStore, name: &str) -> Result<()> {
    let ref_name = format!("{TAGS_PREFIX}{name}");
    if !refs.delete(&ref_name)? {
        return Err(Error::RefNotFound(name.to_string()));
    }
    Ok(())
}

/// list tags, optionally filtered by a glob on the short name
pub fn list_tags(
    objects: &ObjectStore,
    refs: &RefStore,
    pattern: Option<&str>,
) -> Result<Vec<TagInfo>> {
    let pattern = pattern
        .map(glob::Pattern::new)
        .transpose()
        .map_err(|e| Error::GlobPattern(e.to_string()))?;

    let mut tags = Vec::new();
    for r in refs.list_by_prefix(TAGS_PREFIX)? {
        let RefTarget::Direct(oid) = r.target else {
            continue;
        };
        let name = r.name[TAGS_PREFIX.len()..].to_string();
        if let Some(pattern) = &pattern {
            if !pattern.matches(&name) {
                continue;
            }
        }
        let annotated = matches!(objects.get(&oid)?, Some((Kind::Tag, _)));
        let target = resolve_tag_to_commit(objects, &oid)?;
        tags.push(TagInfo {
            name,
            oid,
            target,
            annotated,
        });
    }
    Ok(tags)
}

/// peel annotated-tag chains until a commit is reached
pub fn resolve_tag_to_commit(objects: &ObjectStore, oid: &Oid) -> Result<Oid> {
    let mut current = *oid;
    // chains terminate because each tag object must already exist when
    // the next is created
    loop {
        match objects.get(&current)? {
            Some((Kind::Tag, payload)) => {
                current = Tag::parse(&payload)?.target;
            }
            Some((Kind::Commit, _)) => return Ok(current),
            Some((kind, _)) => {
                return Err(Error::InvalidObject(format!(
                    "tag chain from {oid} ends at a {kind}, not a commit"
                )))
            }
            None => return Err(Error::ObjectNotFound(current)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Commit, Tree};
    use crate::store::bucket::MemoryBucket;
    use crate::store::row::{MemoryRowStore, RowStore};
    use crate::store::wal::Wal;
    use std::sync::Arc;

    fn harness() -> (ObjectStore, RefStore, Oid) {
        let rows: Arc<dyn RowStore> = Arc::new(MemoryRowStore::new());
        let wal = Arc::new(Wal::open(rows.clone()).unwrap());
        let objects = ObjectStore::new(
            rows.clone(),
            Arc::new(MemoryBucket::new()),
            wal.clone(),
            &crate::config::Config::default(),
        );
        let refs = RefStore::new(rows, wal);

        let tree = objects.put_tree(&Tree::empty()).unwrap();
        let sig = Signature::new("t", "t@example.com", 100, 0);
        let commit = objects
            .put_commit(&Commit::new(tree, vec![], sig.clone(), sig, "c\n"))
            .unwrap();
        (objects, refs, commit)
    }

    fn tagger() -> Signature {
        Signature::new("T Agger", "t@example.com", 200, 0)
    }

    #[test]
    fn test_lightweight_tag() {
        let (objects, refs, commit) = harness();
        let oid = create_tag(&objects, &refs, "v1", &commit, &Default::default()).unwrap();

        // lightweight: the ref points straight at the commit
        assert_eq!(oid, commit);
        assert_eq!(refs.resolve("refs/tags/v1").unwrap(), Some(commit));

        let tags = list_tags(&objects, &refs, None).unwrap();
        assert_eq!(tags.len(), 1);
        assert!(!tags[0].annotated);
        assert_eq!(tags[0].target, commit);
    }

    #[test]
    fn test_annotated_tag() {
        let (objects, refs, commit) = harness();
        let oid = create_tag(
            &objects,
            &refs,
            "v2",
            &commit,
            &TagOptions {
                message: Some("release\n".to_string()),
                tagger: Some(tagger()),
                force: false,
            },
        )
        .unwrap();

        // annotated: the ref points at a tag object
        assert_ne!(oid, commit);
        let tag = objects.get_tag(&oid).unwrap();
        assert_eq!(tag.target, commit);
        assert_eq!(tag.name, "v2");

        assert_eq!(resolve_tag_to_commit(&objects, &oid).unwrap(), commit);

        let tags = list_tags(&objects, &refs, None).unwrap();
        assert!(tags[0].annotated);
        assert_eq!(tags[0].target, commit);
    }

    #[test]
    fn test_annotated_requires_tagger() {
        let (objects, refs, commit) = harness();
        let result = create_tag(
            &objects,
            &refs,
            "v3",
            &commit,
            &TagOptions {
                message: Some("m\n".to_string()),
                tagger: None,
                force: false,
            },
        );
        assert!(matches!(result, Err(Error::MissingIdentity)));
    }

    #[test]
    fn test_nested_tag_peels() {
        let (objects, refs, commit) = harness();
        let inner = create_tag(
            &objects,
            &refs,
            "inner",
            &commit,
            &TagOptions {
                message: Some("inner\n".to_string()),
                tagger: Some(tagger()),
                force: false,
            },
        )
        .unwrap();
        let outer = create_tag(
            &objects,
            &refs,
            "outer",
            &inner,
            &TagOptions {
                message: Some("outer\n".to_string()),
                tagger: Some(tagger()),
                force: false,
            },
        )
        .unwrap();

        assert_eq!(resolve_tag_to_commit(&objects, &outer).unwrap(), commit);
    }

    #[test]
    fn test_duplicate_and_force() {
        let (objects, refs, commit) = harness();
        create_tag(&objects, &refs, "v1", &commit, &Default::default()).unwrap();
        assert!(matches!(
            create_tag(&objects, &refs, "v1", &commit, &Default::default()),
            Err(Error::RefConflict(_))
        ));
        create_tag(
            &objects,
            &refs,
            "v1",
            &commit,
            &TagOptions {
                force: true,
                ..Default::default()
            },
        )
        .unwrap();
    }

    #[test]
    fn test_delete_tag() {
        let (objects, refs, commit) = harness();
        create_tag(&objects, &refs, "gone", &commit, &Default::default()).unwrap();
        delete_tag(&refs, "gone").unwrap();
        assert!(matches!(delete_tag(&refs, "gone"), Err(Error::RefNotFound(_))));
    }

    #[test]
    fn test_tag_missing_target_rejected() {
        let (objects, refs, _) = harness();
        let ghost = Oid::from_bytes([9; 20]);
        assert!(matches!(
            create_tag(&objects, &refs, "ghost", &ghost, &Default::default()),
            Err(Error::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_list_tags_pattern() {
        let (objects, refs, commit) = harness();
        for name in ["v1.0", "v1.1", "v2.0"] {
            create_tag(&objects, &refs, name, &commit, &Default::default()).unwrap();
        }
        let v1 = list_tags(&objects, &refs, Some("v1.*")).unwrap();
        assert_eq!(v1.len(), 2);
    }
}
