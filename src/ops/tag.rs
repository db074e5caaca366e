//! Tags: lightweight ref files and annotated tag objects.

use crate::{
    config,
    errors::WitError,
    hash::ObjectHash,
    internal::object::{
        ObjectTrait,
        signature::{Signature, SignatureType},
        tag::Tag,
        types::ObjectType,
    },
    ops::with_journal,
    refs,
    repo::Repo,
};

/// Options for [`Repo::tag_create`].
#[derive(Debug, Default, Clone)]
pub struct TagOptions {
    /// Revision to tag; defaults to HEAD.
    pub at: Option<String>,
    /// Create an annotated tag object carrying this message. `None` makes
    /// a lightweight tag (a bare ref file).
    pub message: Option<String>,
}

impl Repo {
    /// Create a tag. Lightweight tags point straight at the commit;
    /// annotated tags store a tag object and the ref points at it.
    pub fn tag_create(&self, name: &str, opts: TagOptions) -> Result<ObjectHash, WitError> {
        let _lock = self.lock()?;
        with_journal(self, "tag_create", &[name.to_string()], opts.message.clone(), || {
            refs::validate_ref_name(name)?;
            if refs::read_tag(self, name)?.is_some() {
                return Err(WitError::InvalidRef(format!("tag `{name}` already exists")));
            }
            let target = match opts.at.as_deref() {
                Some(rev) => refs::resolve_commit(self, rev)?,
                None => refs::head_commit(self)?
                    .ok_or_else(|| WitError::NotFound("HEAD (no commits yet)".to_string()))?,
            };

            let ref_target = match &opts.message {
                None => target,
                Some(message) => {
                    let (user, email) = config::resolve_author(self.config());
                    let tagger = Signature::now(SignatureType::Tagger, user, email);
                    let tag = Tag::new(
                        self.kind(),
                        target,
                        ObjectType::Commit,
                        name.to_string(),
                        tagger,
                        message,
                    )?;
                    self.store().put_raw(ObjectType::Tag, &tag.to_data()?)?
                }
            };
            refs::write_tag(self, name, &ref_target)?;
            Ok(ref_target)
        })
    }

    pub fn tag_delete(&self, name: &str) -> Result<(), WitError> {
        let _lock = self.lock()?;
        with_journal(self, "tag_delete", &[name.to_string()], None, || {
            refs::delete_tag(self, name)
        })
    }

    /// Sorted tag names.
    pub fn tag_list(&self) -> Result<Vec<String>, WitError> {
        refs::list_tags(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashKind;
    use crate::internal::object::Object;
    use std::fs;

    fn repo_with_commit() -> (tempfile::TempDir, Repo, ObjectHash) {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = Repo::init(dir.path(), HashKind::Sha256).unwrap();
        fs::write(repo.workdir().join("a.txt"), "a").unwrap();
        repo.add("a.txt").unwrap();
        let id = repo
            .commit("first", Some(("t".to_string(), "t@e".to_string())))
            .unwrap();
        (dir, repo, id)
    }

    /// A lightweight tag is a bare ref at the commit.
    #[test]
    fn test_lightweight_tag() {
        let (_dir, repo, tip) = repo_with_commit();
        let target = repo.tag_create("v0.1.0", TagOptions::default()).unwrap();
        assert_eq!(target, tip);
        assert_eq!(refs::read_tag(&repo, "v0.1.0").unwrap(), Some(tip));
        assert_eq!(refs::resolve_commit(&repo, "v0.1.0").unwrap(), tip);
    }

    /// An annotated tag stores a tag object that peels to the commit.
    #[test]
    fn test_annotated_tag() {
        let (_dir, repo, tip) = repo_with_commit();
        let tag_id = repo
            .tag_create(
                "v1.0.0",
                TagOptions {
                    at: None,
                    message: Some("release one\n".to_string()),
                },
            )
            .unwrap();
        assert_ne!(tag_id, tip);

        match repo.store().get(&tag_id).unwrap() {
            Object::Tag(tag) => {
                assert_eq!(tag.object_hash, tip);
                assert_eq!(tag.tag_name, "v1.0.0");
                assert_eq!(tag.message, "release one\n");
            }
            other => panic!("expected tag object, got {}", other.object_type()),
        }
        // Resolution peels to the commit.
        assert_eq!(refs::resolve_commit(&repo, "v1.0.0").unwrap(), tip);
    }

    /// Delete removes the ref; duplicates are refused while present.
    #[test]
    fn test_tag_delete_and_duplicates() {
        let (_dir, repo, _) = repo_with_commit();
        repo.tag_create("once", TagOptions::default()).unwrap();
        assert!(matches!(
            repo.tag_create("once", TagOptions::default()),
            Err(WitError::InvalidRef(_))
        ));
        repo.tag_delete("once").unwrap();
        assert!(repo.tag_list().unwrap().is_empty());
        assert!(matches!(
            repo.tag_delete("once"),
            Err(WitError::NotFound(_))
        ));
    }
}
