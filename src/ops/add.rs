//! Staging operations: `add`, `add_all`, `remove`.

use std::fs;

use tracing::debug;

use crate::{
    errors::WitError,
    internal::index::IndexEntry,
    ops::{normalize_path, with_journal},
    repo::Repo,
    worktree,
};

impl Repo {
    /// Stage one file: hash its contents into a blob (chunked past the
    /// large-file threshold) and insert or update the index entry.
    pub fn add(&self, path: &str) -> Result<(), WitError> {
        let _lock = self.lock()?;
        let rel = normalize_path(self, path)?;
        with_journal(self, "add", &[rel.clone()], None, || {
            let abs = self.workdir().join(&rel);
            if fs::symlink_metadata(&abs).is_err() {
                return Err(WitError::NotFound(format!("path `{rel}`")));
            }
            let mut index = self.load_index()?;
            let (id, mode, size) = self.write_file_to_store(&abs)?;
            let mtime = file_mtime(&abs);
            index.add_entry(IndexEntry::new(rel.clone(), mode, id, size, mtime));
            self.save_index(&index)?;

            // Staging a conflicted path resolves it; keep the parked merge
            // state truthful.
            if let Ok(mut state) = self.load_merge_state() {
                if state.conflicts.contains(&rel) && !state.resolved.contains(&rel) {
                    state.resolved.push(rel.clone());
                    self.save_merge_state(&state)?;
                }
            }
            debug!(target: "wit::ops", path = %rel, %id, "staged");
            Ok(())
        })
    }

    /// Stage every non-ignored worktree file and drop entries whose files
    /// are gone, so the index mirrors the worktree.
    pub fn add_all(&self) -> Result<usize, WitError> {
        let _lock = self.lock()?;
        with_journal(self, "add_all", &[], None, || {
            let ignore = worktree::load_ignore(self);
            let files = worktree::walk(self, &ignore)?;
            let mut index = self.load_index()?;

            let stale: Vec<String> = index
                .staged()
                .map(|e| e.path.clone())
                .filter(|p| fs::symlink_metadata(self.workdir().join(p)).is_err())
                .collect();
            for path in &stale {
                index.remove(path);
            }

            let mut staged = 0usize;
            for rel in &files {
                let abs = self.workdir().join(rel);
                let mtime = file_mtime(&abs);
                // Unchanged stat data means the entry is already current.
                if let Some(entry) = index.get(rel) {
                    if let Ok(meta) = fs::symlink_metadata(&abs) {
                        if entry.stat_matches(meta.len(), mtime) {
                            continue;
                        }
                    }
                }
                let (id, mode, size) = self.write_file_to_store(&abs)?;
                index.add_entry(IndexEntry::new(rel.clone(), mode, id, size, mtime));
                staged += 1;
            }
            self.save_index(&index)?;
            debug!(target: "wit::ops", staged, removed = stale.len(), "add_all");
            Ok(staged)
        })
    }

    /// Unstage a path (every conflict stage included). The worktree file is
    /// left in place.
    pub fn remove(&self, path: &str) -> Result<(), WitError> {
        let _lock = self.lock()?;
        let rel = normalize_path(self, path)?;
        with_journal(self, "remove", &[rel.clone()], None, || {
            let mut index = self.load_index()?;
            if !index.remove(&rel) {
                return Err(WitError::NotFound(format!("path `{rel}` is not staged")));
            }
            self.save_index(&index)?;
            Ok(())
        })
    }
}

pub(crate) fn file_mtime(path: &std::path::Path) -> i64 {
    fs::symlink_metadata(path)
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
