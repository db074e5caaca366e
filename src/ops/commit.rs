//! Commit creation: `commit`, `amend`, `fixup`.

use tracing::info;

use crate::{
    config,
    errors::WitError,
    hash::ObjectHash,
    internal::object::{
        ObjectTrait,
        commit::Commit,
        signature::{Signature, SignatureType},
        types::ObjectType,
    },
    ops::with_journal,
    refs,
    repo::Repo,
};

/// Options for [`Repo::amend`].
#[derive(Debug, Default, Clone)]
pub struct AmendOptions {
    /// Replacement message; `None` keeps the original.
    pub message: Option<String>,
    /// Stage the whole worktree before re-committing.
    pub add_all: bool,
}

/// Options for [`Repo::fixup`].
#[derive(Debug, Default, Clone)]
pub struct FixupOptions {
    /// Commit the fix targets; defaults to `HEAD`.
    pub target: Option<String>,
    /// Use the `amend!` prefix instead of `fixup!`.
    pub amend: bool,
    /// Stage the whole worktree first.
    pub all: bool,
}

impl Repo {
    /// Record the staged tree as a new commit and advance HEAD. The first
    /// commit on an unborn branch creates the branch ref.
    pub fn commit(
        &self,
        message: &str,
        author: Option<(String, String)>,
    ) -> Result<ObjectHash, WitError> {
        let _lock = self.lock()?;
        self.commit_locked(message, author)
    }

    /// Commit without taking the lock, for operations (merge, cherry-pick)
    /// that already hold it.
    pub(crate) fn commit_locked(
        &self,
        message: &str,
        author: Option<(String, String)>,
    ) -> Result<ObjectHash, WitError> {
        with_journal(
            self,
            "commit",
            &[],
            Some(message.to_string()),
            || {
                let index = self.load_index()?;
                if index.is_empty() {
                    return Err(WitError::NothingToCommit);
                }
                let parents = match refs::head_commit(self)? {
                    Some(head) => vec![head],
                    None => vec![],
                };
                self.write_commit(message, author, parents)
            },
        )
    }

    /// Build and store a commit from the current index with the given
    /// parents, then advance HEAD's branch (or the detached pointer).
    pub(crate) fn write_commit(
        &self,
        message: &str,
        author: Option<(String, String)>,
        parents: Vec<ObjectHash>,
    ) -> Result<ObjectHash, WitError> {
        let index = self.load_index()?;
        let store = self.store();
        let tree_id = index.commit_tree(&store)?;

        let (name, email) = author.unwrap_or_else(|| config::resolve_author(self.config()));
        let author_sig = Signature::now(SignatureType::Author, name.clone(), email.clone());
        let committer_sig = Signature::now(SignatureType::Committer, name, email);

        let commit = Commit::new(
            self.kind(),
            author_sig,
            committer_sig,
            tree_id,
            parents,
            message,
        )?;
        // Publish-after-write: the object lands before any ref names it.
        store.put_raw(ObjectType::Commit, &commit.to_data()?)?;
        self.advance_head(&commit.id)?;
        info!(target: "wit::ops", id = %commit.id, "commit created");
        Ok(commit.id)
    }

    fn advance_head(&self, commit_id: &ObjectHash) -> Result<(), WitError> {
        match refs::read_head(self)? {
            refs::Head::Symbolic(branch) => refs::write_branch(self, &branch, commit_id),
            refs::Head::Detached(_) => refs::set_head_detached(self, commit_id),
        }
    }

    /// Re-commit HEAD with the current index tree and optionally a new
    /// message, keeping HEAD's original parents. An amend that changes
    /// neither tree nor message is a permitted no-op returning HEAD.
    pub fn amend(&self, opts: AmendOptions) -> Result<ObjectHash, WitError> {
        if opts.add_all {
            self.add_all()?;
        }
        let _lock = self.lock()?;
        with_journal(
            self,
            "amend",
            &[],
            opts.message.clone(),
            || {
                let head_id = refs::head_commit(self)?
                    .ok_or(WitError::NothingToCommit)?;
                let head = self.store().get(&head_id)?.into_commit()?;

                let index = self.load_index()?;
                let tree_id = index.commit_tree(&self.store())?;
                if tree_id == head.tree_id && opts.message.is_none() {
                    return Ok(head_id);
                }
                let message = opts.message.as_deref().unwrap_or(&head.message);
                self.write_commit(message, None, head.parent_commit_ids.clone())
            },
        )
    }

    /// Create a `fixup! <subject>` (or `amend! <subject>`) commit against
    /// the target's subject line. No history rewriting happens here: the
    /// commit stays an ordinary commit on HEAD until an interactive-rebase
    /// consumer squashes it.
    pub fn fixup(&self, opts: FixupOptions) -> Result<ObjectHash, WitError> {
        if opts.all {
            self.add_all()?;
        }
        let _lock = self.lock()?;
        let target = opts.target.as_deref().unwrap_or("HEAD");
        let target_id = refs::resolve_commit(self, target)?;
        let target_commit = self.store().get(&target_id)?.into_commit()?;
        let prefix = if opts.amend { "amend!" } else { "fixup!" };
        let message = format!("{prefix} {}", target_commit.subject());
        with_journal(
            self,
            "fixup",
            &[target.to_string()],
            Some(message.clone()),
            || {
                let index = self.load_index()?;
                if index.is_empty() {
                    return Err(WitError::NothingToCommit);
                }
                let parents = match refs::head_commit(self)? {
                    Some(head) => vec![head],
                    None => vec![],
                };
                self.write_commit(&message, None, parents)
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashKind;
    use std::fs;

    fn repo() -> (tempfile::TempDir, Repo) {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = Repo::init(dir.path(), HashKind::Sha256).unwrap();
        (dir, repo)
    }

    fn write_and_commit(repo: &Repo, path: &str, content: &str, message: &str) -> ObjectHash {
        fs::write(repo.workdir().join(path), content).unwrap();
        repo.add(path).unwrap();
        repo.commit(message, Some(("t".to_string(), "t@e".to_string())))
            .unwrap()
    }

    /// The first commit creates the branch; the second chains onto it.
    #[test]
    fn test_commit_chain() {
        let (_dir, repo) = repo();
        let first = write_and_commit(&repo, "a.txt", "1", "first");
        assert_eq!(refs::read_branch(&repo, "main").unwrap(), Some(first));

        let second = write_and_commit(&repo, "a.txt", "2", "second");
        let commit = repo.store().get(&second).unwrap().into_commit().unwrap();
        assert_eq!(commit.parent_commit_ids, vec![first]);
        assert_eq!(commit.message, "second");
    }

    /// An empty index cannot be committed.
    #[test]
    fn test_commit_empty_index() {
        let (_dir, repo) = repo();
        assert!(matches!(
            repo.commit("nothing", None),
            Err(WitError::NothingToCommit)
        ));
    }

    /// amend keeps the original parents and replaces the tip.
    #[test]
    fn test_amend_replaces_tip() {
        let (_dir, repo) = repo();
        let root = write_and_commit(&repo, "a.txt", "1", "first");
        let tip = write_and_commit(&repo, "b.txt", "2", "second");

        fs::write(repo.workdir().join("b.txt"), "2 fixed").unwrap();
        repo.add("b.txt").unwrap();
        let amended = repo
            .amend(AmendOptions {
                message: Some("second, fixed".to_string()),
                add_all: false,
            })
            .unwrap();
        assert_ne!(amended, tip);
        let commit = repo.store().get(&amended).unwrap().into_commit().unwrap();
        assert_eq!(commit.parent_commit_ids, vec![root]);
        assert_eq!(commit.message, "second, fixed");
        assert_eq!(refs::head_commit(&repo).unwrap(), Some(amended));
    }

    /// amend with no tree change and no message is a no-op on HEAD.
    #[test]
    fn test_amend_noop() {
        let (_dir, repo) = repo();
        let tip = write_and_commit(&repo, "a.txt", "1", "only");
        let result = repo.amend(AmendOptions::default()).unwrap();
        assert_eq!(result, tip);
        assert_eq!(refs::head_commit(&repo).unwrap(), Some(tip));
    }

    /// fixup commits carry the convention prefix and target subject.
    #[test]
    fn test_fixup_message() {
        let (_dir, repo) = repo();
        write_and_commit(&repo, "a.txt", "1", "feature: add thing\n\nbody");
        fs::write(repo.workdir().join("a.txt"), "1 fix").unwrap();
        repo.add("a.txt").unwrap();

        let fix = repo.fixup(FixupOptions::default()).unwrap();
        let commit = repo.store().get(&fix).unwrap().into_commit().unwrap();
        assert_eq!(commit.message, "fixup! feature: add thing");

        fs::write(repo.workdir().join("a.txt"), "1 fix 2").unwrap();
        repo.add("a.txt").unwrap();
        let amend_fix = repo
            .fixup(FixupOptions {
                amend: true,
                ..Default::default()
            })
            .unwrap();
        let commit = repo.store().get(&amend_fix).unwrap().into_commit().unwrap();
        assert!(commit.message.starts_with("amend! "));
    }
}
