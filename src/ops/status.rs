//! Worktree status: the four disjoint sets computed from the
//! (HEAD tree) x (index) x (work-tree) triple, optional rename pairing,
//! and surfacing of in-progress merge/cherry-pick state.

use std::collections::{BTreeMap, HashSet};
use std::fs;

use crate::{
    errors::WitError,
    hash::ObjectHash,
    internal::object::tree::TreeItemMode,
    refs,
    repo::Repo,
    worktree,
};

/// Options for [`Repo::status`].
#[derive(Debug, Clone)]
pub struct StatusOptions {
    pub find_renames: bool,
    /// Minimum line-based Dice similarity for a delete/add pair to count
    /// as a rename.
    pub rename_threshold: f64,
}

impl Default for StatusOptions {
    fn default() -> Self {
        StatusOptions {
            find_renames: false,
            rename_threshold: 0.5,
        }
    }
}

/// How a staged path differs from HEAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagedKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedChange {
    pub path: String,
    pub kind: StagedKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rename {
    pub from: String,
    pub to: String,
    pub similarity: f64,
}

/// Which multi-step operation is parked on disk, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Idle,
    Merge,
    CherryPick,
}

/// The full status report.
#[derive(Debug)]
pub struct StatusReport {
    /// Branch name when HEAD is symbolic.
    pub branch: Option<String>,
    /// Index vs HEAD.
    pub staged: Vec<StagedChange>,
    /// Work-tree vs index: tracked, present, content differs.
    pub modified: Vec<String>,
    /// In the index, missing from the work-tree.
    pub deleted: Vec<String>,
    /// In the work-tree, not ignored, not in the index.
    pub untracked: Vec<String>,
    /// Staged delete/add pairs promoted to renames.
    pub renames: Vec<Rename>,
    /// Paths holding unresolved conflict stages.
    pub conflicted: Vec<String>,
    pub activity: Activity,
}

impl StatusReport {
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.untracked.is_empty()
            && self.renames.is_empty()
            && self.conflicted.is_empty()
            && self.activity == Activity::Idle
    }
}

impl Repo {
    pub fn status(&self, opts: StatusOptions) -> Result<StatusReport, WitError> {
        let store = self.store();
        let head_flat: BTreeMap<String, (TreeItemMode, ObjectHash)> =
            match refs::head_commit(self)? {
                Some(commit_id) => {
                    let commit = store.get(&commit_id)?.into_commit()?;
                    worktree::flatten_tree(&store, &commit.tree_id)?
                }
                None => BTreeMap::new(),
            };

        let index = self.load_index()?;
        let ignore = worktree::load_ignore(self);
        let walked: Vec<String> = worktree::walk(self, &ignore)?;

        // Staged: index vs HEAD.
        let mut staged = Vec::new();
        for entry in index.staged() {
            match head_flat.get(&entry.path) {
                None => staged.push(StagedChange {
                    path: entry.path.clone(),
                    kind: StagedKind::Added,
                }),
                Some((mode, hash)) if *hash != entry.hash || *mode != entry.mode => {
                    staged.push(StagedChange {
                        path: entry.path.clone(),
                        kind: StagedKind::Modified,
                    });
                }
                Some(_) => {}
            }
        }
        for path in head_flat.keys() {
            if index.get(path).is_none() {
                staged.push(StagedChange {
                    path: path.clone(),
                    kind: StagedKind::Deleted,
                });
            }
        }

        // Work-tree vs index.
        let mut modified = Vec::new();
        let mut deleted = Vec::new();
        for entry in index.staged() {
            let abs = self.workdir().join(&entry.path);
            let meta = match fs::symlink_metadata(&abs) {
                Ok(meta) => meta,
                Err(_) => {
                    deleted.push(entry.path.clone());
                    continue;
                }
            };
            let mtime = crate::ops::add::file_mtime(&abs);
            if entry.stat_matches(meta.len(), mtime) {
                continue;
            }
            // Stat disagreement is only a hint; the content hash decides.
            if self.hash_file_as_stored(&abs)? != entry.hash {
                modified.push(entry.path.clone());
            }
        }

        // Untracked: walked, not staged.
        let untracked: Vec<String> = walked
            .iter()
            .filter(|path| index.get(path).is_none())
            .cloned()
            .collect();

        let mut report = StatusReport {
            branch: refs::head_branch(self)?,
            staged,
            modified,
            deleted,
            untracked,
            renames: Vec::new(),
            conflicted: index.conflicted_paths(),
            activity: if self.merge_state_path().is_file() {
                Activity::Merge
            } else if self.cherry_pick_state_path().is_file() {
                Activity::CherryPick
            } else {
                Activity::Idle
            },
        };

        if opts.find_renames {
            self.pair_renames(&mut report, &head_flat, opts.rename_threshold)?;
        }
        Ok(report)
    }

    /// Pair staged deletions with staged additions whose contents are
    /// similar enough, and move them out of the disjoint sets.
    fn pair_renames(
        &self,
        report: &mut StatusReport,
        head_flat: &BTreeMap<String, (TreeItemMode, ObjectHash)>,
        threshold: f64,
    ) -> Result<(), WitError> {
        let index = self.load_index()?;
        let added: Vec<String> = report
            .staged
            .iter()
            .filter(|c| c.kind == StagedKind::Added)
            .map(|c| c.path.clone())
            .collect();
        let removed: Vec<String> = report
            .staged
            .iter()
            .filter(|c| c.kind == StagedKind::Deleted)
            .map(|c| c.path.clone())
            .collect();
        if added.is_empty() || removed.is_empty() {
            return Ok(());
        }

        let mut consumed_added: HashSet<String> = HashSet::new();
        let mut renames = Vec::new();
        for from in &removed {
            let Some((_, old_hash)) = head_flat.get(from) else {
                continue;
            };
            let old_content = self.read_blob(old_hash)?;
            let mut best: Option<(String, f64)> = None;
            for to in &added {
                if consumed_added.contains(to) {
                    continue;
                }
                let Some(entry) = index.get(to) else { continue };
                let new_content = self.read_blob(&entry.hash)?;
                let similarity = dice_similarity(&old_content, &new_content);
                if similarity >= threshold
                    && best.as_ref().is_none_or(|(_, s)| similarity > *s)
                {
                    best = Some((to.clone(), similarity));
                }
            }
            if let Some((to, similarity)) = best {
                consumed_added.insert(to.clone());
                renames.push(Rename {
                    from: from.clone(),
                    to,
                    similarity,
                });
            }
        }

        let renamed_from: HashSet<&str> = renames.iter().map(|r| r.from.as_str()).collect();
        let renamed_to: HashSet<&str> = renames.iter().map(|r| r.to.as_str()).collect();
        report.staged.retain(|change| match change.kind {
            StagedKind::Added => !renamed_to.contains(change.path.as_str()),
            StagedKind::Deleted => !renamed_from.contains(change.path.as_str()),
            StagedKind::Modified => true,
        });
        report.renames = renames;
        Ok(())
    }
}

/// Line-based Dice coefficient over the two contents: `2|A∩B| / (|A|+|B|)`
/// with line sets. Identical non-empty contents score 1.0; nothing shared
/// scores 0.0.
fn dice_similarity(a: &[u8], b: &[u8]) -> f64 {
    let lines_a: HashSet<&[u8]> = a.split(|&b| b == b'\n').collect();
    let lines_b: HashSet<&[u8]> = b.split(|&b| b == b'\n').collect();
    let total = lines_a.len() + lines_b.len();
    if total == 0 {
        return 1.0;
    }
    let shared = lines_a.intersection(&lines_b).count();
    (2.0 * shared as f64) / total as f64
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

    fn commit_file(repo: &Repo, path: &str, content: &str) {
        fs::write(repo.workdir().join(path), content).unwrap();
        repo.add(path).unwrap();
        repo.commit("c", Some(("t".to_string(), "t@e".to_string())))
            .unwrap();
    }

    /// A fresh repo with one untracked file reports exactly that.
    #[test]
    fn test_untracked_only() {
        let (_dir, repo) = repo();
        fs::write(repo.workdir().join("new.txt"), "n").unwrap();
        let report = repo.status(StatusOptions::default()).unwrap();
        assert_eq!(report.untracked, vec!["new.txt".to_string()]);
        assert!(report.staged.is_empty());
        assert!(!report.is_clean());
    }

    /// The four sets are disjoint and each captures its own change.
    #[test]
    fn test_disjoint_sets() {
        let (_dir, repo) = repo();
        commit_file(&repo, "committed.txt", "base\n");
        commit_file(&repo, "gone.txt", "bye\n");

        // staged addition
        fs::write(repo.workdir().join("added.txt"), "a\n").unwrap();
        repo.add("added.txt").unwrap();
        // worktree modification, not staged
        fs::write(repo.workdir().join("committed.txt"), "changed\n").unwrap();
        // worktree deletion, not staged
        fs::remove_file(repo.workdir().join("gone.txt")).unwrap();
        // untracked
        fs::write(repo.workdir().join("loose.txt"), "l\n").unwrap();

        let report = repo.status(StatusOptions::default()).unwrap();
        assert_eq!(
            report.staged,
            vec![StagedChange {
                path: "added.txt".to_string(),
                kind: StagedKind::Added
            }]
        );
        assert_eq!(report.modified, vec!["committed.txt".to_string()]);
        assert_eq!(report.deleted, vec!["gone.txt".to_string()]);
        assert_eq!(report.untracked, vec!["loose.txt".to_string()]);
        assert_eq!(report.activity, Activity::Idle);
    }

    /// After commit + clean checkout the report is clean.
    #[test]
    fn test_clean_after_commit() {
        let (_dir, repo) = repo();
        commit_file(&repo, "a.txt", "a\n");
        let report = repo.status(StatusOptions::default()).unwrap();
        assert!(report.is_clean(), "unexpected status: {report:?}");
        assert_eq!(report.branch.as_deref(), Some("main"));
    }

    /// A similar delete/add pair is reported as a rename and removed from
    /// the staged sets.
    #[test]
    fn test_rename_detection() {
        let (_dir, repo) = repo();
        let content = "line one\nline two\nline three\nline four\n";
        commit_file(&repo, "old_name.txt", content);

        fs::remove_file(repo.workdir().join("old_name.txt")).unwrap();
        fs::write(repo.workdir().join("new_name.txt"), content).unwrap();
        repo.add_all().unwrap();

        let report = repo
            .status(StatusOptions {
                find_renames: true,
                rename_threshold: 0.5,
            })
            .unwrap();
        assert_eq!(report.renames.len(), 1);
        let rename = &report.renames[0];
        assert_eq!(rename.from, "old_name.txt");
        assert_eq!(rename.to, "new_name.txt");
        assert!(rename.similarity > 0.99);
        assert!(report.staged.is_empty());

        // Below the threshold the pair stays a delete plus an add.
        fs::remove_file(repo.workdir().join("new_name.txt")).unwrap();
        fs::write(repo.workdir().join("unrelated.txt"), "entirely\ndifferent\n").unwrap();
        repo.add_all().unwrap();
        let report = repo
            .status(StatusOptions {
                find_renames: true,
                rename_threshold: 0.5,
            })
            .unwrap();
        assert!(report.renames.is_empty());
        assert_eq!(report.staged.len(), 2);
    }
}
