//! Checkout: moving HEAD between branches and commits, materializing the
//! target tree, and the branch auto-stash that parks uncommitted work when
//! `[wit] autoStashOnSwitch` is enabled.

use std::{
    collections::BTreeMap,
    fs,
    path::PathBuf,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    errors::WitError,
    hash::ObjectHash,
    ops::with_journal,
    refs,
    repo::Repo,
    worktree,
};

/// Options for [`Repo::checkout`].
#[derive(Debug, Default, Clone)]
pub struct CheckoutOptions {
    /// Create the named branch at the current HEAD before switching.
    pub create: bool,
}

/// Auto-stash record: worktree overrides keyed by path (`None` marks a
/// tracked file that was deleted), stored beside a verbatim copy of the
/// index file.
#[derive(Debug, Serialize, Deserialize)]
struct StashRecord {
    branch: String,
    overrides: BTreeMap<String, Option<ObjectHash>>,
}

fn stash_dir_for(repo: &Repo, branch: &str) -> PathBuf {
    // Branch names may nest; flatten the separator for a single dir name.
    repo.stash_dir().join(branch.replace('/', "%2f"))
}

impl Repo {
    /// Switch to a branch or commit. A branch name keeps HEAD symbolic; a
    /// raw commit (or tag peeling to one) detaches. `HEAD` itself
    /// re-materializes the current position without moving anything.
    pub fn checkout(&self, target: &str, opts: CheckoutOptions) -> Result<(), WitError> {
        let _lock = self.lock()?;
        with_journal(self, "checkout", &[target.to_string()], None, || {
            if opts.create {
                refs::validate_ref_name(target)?;
                if refs::read_branch(self, target)?.is_some() {
                    return Err(WitError::InvalidRef(format!(
                        "branch `{target}` already exists"
                    )));
                }
                if let Some(head) = refs::head_commit(self)? {
                    refs::write_branch(self, target, &head)?;
                }
                // Same tree either way; only HEAD moves and uncommitted
                // work carries over, so nothing is stashed.
                refs::set_head_branch(self, target)?;
                return Ok(());
            }

            if target == "HEAD" {
                if let Some(head) = refs::head_commit(self)? {
                    self.materialize_commit(&head)?;
                }
                return Ok(());
            }

            if refs::validate_ref_name(target).is_ok() {
                if let Some(tip) = refs::read_branch(self, target)? {
                    self.maybe_stash_current()?;
                    self.materialize_commit(&tip)?;
                    refs::set_head_branch(self, target)?;
                    self.maybe_restore_stash(target)?;
                    info!(target: "wit::ops", branch = target, "checked out branch");
                    return Ok(());
                }
            }

            // Not a branch: resolve to a commit and detach.
            let commit_id = refs::resolve_commit(self, target)?;
            self.maybe_stash_current()?;
            self.materialize_commit(&commit_id)?;
            refs::set_head_detached(self, &commit_id)?;
            info!(target: "wit::ops", commit = %commit_id, "detached HEAD");
            Ok(())
        })
    }

    /// Materialize a commit's tree over the worktree and rebuild the index
    /// from it.
    pub(crate) fn materialize_commit(&self, commit_id: &ObjectHash) -> Result<(), WitError> {
        let commit = self.store().get(commit_id)?.into_commit()?;
        let index = self.load_index()?;
        let tracked: Vec<String> = index.staged().map(|e| e.path.clone()).collect();
        worktree::checkout_tree(self, &commit.tree_id, &tracked)?;

        let mut index = self.load_index()?;
        index.read_tree(&self.store(), &commit.tree_id)?;
        index.refresh_stat(self.workdir());
        self.save_index(&index)?;
        Ok(())
    }

    /// When auto-stash is on and HEAD sits on a branch with dirty tracked
    /// state, park the index file and the modified worktree contents under
    /// `stash/<branch>`.
    fn maybe_stash_current(&self) -> Result<(), WitError> {
        if !self.config().auto_stash_on_switch() {
            return Ok(());
        }
        let Some(branch) = refs::head_branch(self)? else {
            return Ok(());
        };

        let index = self.load_index()?;
        let mut overrides: BTreeMap<String, Option<ObjectHash>> = BTreeMap::new();
        for entry in index.staged() {
            let abs = self.workdir().join(&entry.path);
            if fs::symlink_metadata(&abs).is_err() {
                overrides.insert(entry.path.clone(), None);
                continue;
            }
            let on_disk = self.hash_file_as_stored(&abs)?;
            if on_disk != entry.hash {
                let (id, _, _) = self.write_file_to_store(&abs)?;
                overrides.insert(entry.path.clone(), Some(id));
            }
        }
        if overrides.is_empty() {
            return Ok(());
        }

        let dir = stash_dir_for(self, &branch);
        fs::create_dir_all(&dir)?;
        fs::copy(self.index_path(), dir.join("index")).ok();
        let record = StashRecord {
            branch: branch.clone(),
            overrides,
        };
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| WitError::MalformedObject(format!("stash record: {e}")))?;
        fs::write(dir.join("state.json"), json)?;
        debug!(target: "wit::ops", branch = %branch, "auto-stash saved");
        Ok(())
    }

    /// Re-apply and drop the stash parked for a branch, if any.
    fn maybe_restore_stash(&self, branch: &str) -> Result<(), WitError> {
        if !self.config().auto_stash_on_switch() {
            return Ok(());
        }
        let dir = stash_dir_for(self, branch);
        let state_path = dir.join("state.json");
        if !state_path.is_file() {
            return Ok(());
        }
        let record: StashRecord = serde_json::from_slice(&fs::read(&state_path)?)
            .map_err(|e| WitError::MalformedObject(format!("stash record: {e}")))?;

        let index = self.load_index()?;
        for (path, value) in &record.overrides {
            let abs = self.workdir().join(path);
            match value {
                Some(id) => {
                    let mode = index
                        .get(path)
                        .map(|e| e.mode)
                        .unwrap_or(crate::internal::object::tree::TreeItemMode::Blob);
                    worktree::materialize_file(self, path, mode, id)?;
                }
                None => {
                    if fs::symlink_metadata(&abs).is_ok() {
                        fs::remove_file(&abs)?;
                    }
                }
            }
        }
        let index_copy = dir.join("index");
        if index_copy.is_file() {
            fs::copy(&index_copy, self.index_path())?;
        }
        fs::remove_dir_all(&dir)?;
        debug!(target: "wit::ops", branch, "auto-stash restored");
        Ok(())
    }
}

/// Object ids an unpopped stash keeps alive: override blobs plus every
/// entry of the parked index copies. GC treats these as roots.
pub(crate) fn stash_roots(repo: &Repo) -> Result<Vec<ObjectHash>, WitError> {
    let mut roots = Vec::new();
    let stash_root = repo.stash_dir();
    let entries = match fs::read_dir(&stash_root) {
        Ok(entries) => entries,
        Err(_) => return Ok(roots),
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let dir = entry.path();
        let state_path = dir.join("state.json");
        if let Ok(bytes) = fs::read(&state_path) {
            if let Ok(record) = serde_json::from_slice::<StashRecord>(&bytes) {
                roots.extend(record.overrides.values().flatten().copied());
            }
        }
        let index_copy = dir.join("index");
        if index_copy.is_file() {
            if let Ok(index) = crate::internal::index::Index::load(&index_copy, repo.kind()) {
                roots.extend(index.entries().map(|e| e.hash));
            }
        }
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashKind;

    fn repo() -> (tempfile::TempDir, Repo) {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = Repo::init(dir.path(), HashKind::Sha256).unwrap();
        (dir, repo)
    }

    fn commit_file(repo: &Repo, path: &str, content: &str, message: &str) -> ObjectHash {
        fs::write(repo.workdir().join(path), content).unwrap();
        repo.add(path).unwrap();
        repo.commit(message, Some(("t".to_string(), "t@e".to_string())))
            .unwrap()
    }

    /// checkout HEAD restores a deleted worktree file.
    #[test]
    fn test_checkout_head_restores_file() {
        let (_dir, repo) = repo();
        commit_file(&repo, "hello.txt", "hello world\n", "first");
        fs::remove_file(repo.workdir().join("hello.txt")).unwrap();

        repo.checkout("HEAD", CheckoutOptions::default()).unwrap();
        assert_eq!(
            fs::read(repo.workdir().join("hello.txt")).unwrap(),
            b"hello world\n"
        );
        assert_eq!(refs::head_branch(&repo).unwrap().as_deref(), Some("main"));
    }

    /// Branch switching swaps worktree contents and keeps HEAD symbolic;
    /// checking out a raw commit detaches.
    #[test]
    fn test_branch_switch_and_detach() {
        let (_dir, repo) = repo();
        let first = commit_file(&repo, "a.txt", "main", "on main");
        repo.checkout(
            "feature",
            CheckoutOptions { create: true },
        )
        .unwrap();
        commit_file(&repo, "a.txt", "feature", "on feature");

        repo.checkout("main", CheckoutOptions::default()).unwrap();
        assert_eq!(fs::read(repo.workdir().join("a.txt")).unwrap(), b"main");
        assert_eq!(refs::head_branch(&repo).unwrap().as_deref(), Some("main"));

        repo.checkout(&first.to_string(), CheckoutOptions::default())
            .unwrap();
        assert_eq!(refs::head_branch(&repo).unwrap(), None);
        assert_eq!(refs::head_commit(&repo).unwrap(), Some(first));
    }

    /// With autoStashOnSwitch, dirty work parks on switch and returns on
    /// the way back.
    #[test]
    fn test_auto_stash_round_trip() {
        let (_dir, repo) = repo();
        let mut config = repo.config().clone();
        config.set("wit", "autoStashOnSwitch", "true");
        let mut repo = repo;
        repo.set_config(config).unwrap();

        commit_file(&repo, "a.txt", "committed", "base");
        repo.checkout("feature", CheckoutOptions { create: true })
            .unwrap();
        repo.checkout("main", CheckoutOptions::default()).unwrap();

        // Dirty main, then switch away.
        fs::write(repo.workdir().join("a.txt"), "dirty edit").unwrap();
        repo.checkout("feature", CheckoutOptions::default()).unwrap();
        assert_eq!(
            fs::read(repo.workdir().join("a.txt")).unwrap(),
            b"committed",
            "feature sees the clean tree"
        );

        // Switching back restores the parked edit.
        repo.checkout("main", CheckoutOptions::default()).unwrap();
        assert_eq!(
            fs::read(repo.workdir().join("a.txt")).unwrap(),
            b"dirty edit"
        );
        assert!(stash_roots(&repo).unwrap().is_empty(), "stash consumed");
    }
}
