//! History walking: `log` and `show`.

use std::collections::{HashSet, VecDeque};

use crate::{
    errors::WitError,
    hash::ObjectHash,
    internal::object::commit::Commit,
    refs,
    repo::Repo,
};

/// What `show` produced: commit metadata, or file bytes at a revision.
#[derive(Debug)]
pub enum ShowResult {
    Commit(Commit),
    Blob(Vec<u8>),
}

impl Repo {
    /// Commits reachable from `rev`, newest first by committer timestamp
    /// (ids tie-break so the order is total), at most `limit` entries.
    pub fn log(&self, rev: &str, limit: usize) -> Result<Vec<Commit>, WitError> {
        let start = refs::resolve_commit(self, rev)?;
        let store = self.store();

        let mut visited: HashSet<ObjectHash> = HashSet::from([start]);
        let mut queue: VecDeque<ObjectHash> = VecDeque::from([start]);
        let mut commits: Vec<Commit> = Vec::new();
        while let Some(id) = queue.pop_front() {
            let commit = store.get(&id)?.into_commit()?;
            for parent in &commit.parent_commit_ids {
                if visited.insert(*parent) {
                    queue.push_back(*parent);
                }
            }
            commits.push(commit);
        }

        commits.sort_by(|a, b| {
            b.committer
                .timestamp
                .cmp(&a.committer.timestamp)
                .then_with(|| b.id.to_string().cmp(&a.id.to_string()))
        });
        commits.truncate(limit);
        Ok(commits)
    }

    /// Resolve `rev` (optionally `rev:path`) and return either the commit
    /// metadata or the file bytes at that revision.
    pub fn show(&self, rev: &str, path: Option<&str>) -> Result<ShowResult, WitError> {
        match path {
            Some(path) => {
                let id = refs::resolve(self, &format!("{rev}:{path}"))?;
                Ok(ShowResult::Blob(self.read_blob(&id)?))
            }
            None => {
                let id = refs::resolve_commit(self, rev)?;
                Ok(ShowResult::Commit(
                    self.store().get(&id)?.into_commit()?,
                ))
            }
        }
    }
}
