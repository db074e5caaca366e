//! `clean`: remove untracked files from the worktree, guarded so it never
//! runs destructively by accident.

use std::fs;

use tracing::info;

use crate::{
    errors::WitError,
    ops::with_journal,
    repo::Repo,
    worktree::{self, ignore::IgnoreList},
};

/// Options for [`Repo::clean`].
#[derive(Debug, Default, Clone)]
pub struct CleanOptions {
    /// Actually delete. Without this (or `dry_run`) clean refuses to run.
    pub force: bool,
    /// Report what would be removed without deleting.
    pub dry_run: bool,
    /// Also remove directories emptied by the deletions.
    pub directories: bool,
    /// Restrict removal to paths under these prefixes.
    pub paths: Vec<String>,
    /// Extra ignore pattern whose matches are kept.
    pub exclude_pattern: Option<String>,
}

impl Repo {
    /// Remove (or list) untracked, non-ignored files. Returns the affected
    /// repo-relative paths.
    pub fn clean(&self, opts: CleanOptions) -> Result<Vec<String>, WitError> {
        if !opts.force && !opts.dry_run {
            return Err(WitError::SafetyAbort("clean untracked files".to_string()));
        }
        let _lock = self.lock()?;
        with_journal(self, "clean", &opts.paths, None, || {
            let mut ignore = worktree::load_ignore(self);
            if let Some(pattern) = &opts.exclude_pattern {
                ignore.extend_from(IgnoreList::from_lines([pattern.as_str()]));
            }

            let index = self.load_index()?;
            let mut targets: Vec<String> = worktree::walk(self, &ignore)?
                .into_iter()
                .filter(|path| index.get(path).is_none())
                .filter(|path| {
                    opts.paths.is_empty()
                        || opts.paths.iter().any(|prefix| {
                            path == prefix || path.starts_with(&format!("{prefix}/"))
                        })
                })
                .collect();
            targets.sort();

            if !opts.dry_run {
                for path in &targets {
                    fs::remove_file(self.workdir().join(path))?;
                }
                if opts.directories {
                    worktree::remove_empty_dirs(self.workdir())?;
                }
                info!(target: "wit::ops", removed = targets.len(), "clean");
            }
            Ok(targets)
        })
    }
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

    /// Without force or dry_run, clean aborts before touching anything.
    #[test]
    fn test_safety_abort() {
        let (_dir, repo) = repo();
        fs::write(repo.workdir().join("loose.txt"), "l").unwrap();
        assert!(matches!(
            repo.clean(CleanOptions::default()),
            Err(WitError::SafetyAbort(_))
        ));
        assert!(repo.workdir().join("loose.txt").exists());
    }

    /// dry_run lists candidates without removing them; force removes.
    #[test]
    fn test_dry_run_then_force() {
        let (_dir, repo) = repo();
        fs::write(repo.workdir().join("tracked.txt"), "t").unwrap();
        repo.add("tracked.txt").unwrap();
        fs::write(repo.workdir().join("loose.txt"), "l").unwrap();

        let listed = repo
            .clean(CleanOptions {
                dry_run: true,
                ..CleanOptions::default()
            })
            .unwrap();
        assert_eq!(listed, vec!["loose.txt".to_string()]);
        assert!(repo.workdir().join("loose.txt").exists());

        let removed = repo
            .clean(CleanOptions {
                force: true,
                ..CleanOptions::default()
            })
            .unwrap();
        assert_eq!(removed, vec!["loose.txt".to_string()]);
        assert!(!repo.workdir().join("loose.txt").exists());
        assert!(repo.workdir().join("tracked.txt").exists());
    }

    /// Path prefixes and the exclude pattern narrow the sweep; directories
    /// flag prunes emptied dirs.
    #[test]
    fn test_paths_exclude_and_directories() {
        let (_dir, repo) = repo();
        fs::create_dir_all(repo.workdir().join("junk/deep")).unwrap();
        fs::write(repo.workdir().join("junk/deep/a.tmp"), "a").unwrap();
        fs::write(repo.workdir().join("junk/keep.me"), "k").unwrap();
        fs::write(repo.workdir().join("outside.txt"), "o").unwrap();

        let removed = repo
            .clean(CleanOptions {
                force: true,
                directories: true,
                paths: vec!["junk".to_string()],
                exclude_pattern: Some("*.me".to_string()),
                ..CleanOptions::default()
            })
            .unwrap();
        assert_eq!(removed, vec!["junk/deep/a.tmp".to_string()]);
        assert!(repo.workdir().join("junk/keep.me").exists());
        assert!(repo.workdir().join("outside.txt").exists());
        assert!(!repo.workdir().join("junk/deep").exists());
    }
}
