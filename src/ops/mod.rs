//! Public repository operations. Each submodule extends [`Repo`] with the
//! methods named in the external interface: staging, commits, checkout,
//! status, merge, cherry-pick, history, refs CRUD, GC and clean.

pub mod add;
pub mod branch;
pub mod checkout;
pub mod cherry_pick;
pub mod clean;
pub mod commit;
pub mod gc;
pub mod log;
pub mod merge;
pub mod status;
pub mod tag;

use crate::{
    errors::WitError,
    journal::{Journal, Snapshot},
    repo::Repo,
};

/// Run a mutation with journal discipline: capture `before` first, run the
/// closure, capture `after`, and append an entry whether the closure
/// succeeded or failed partway. Failures propagate after the entry lands so
/// `undo` can always see the attempt.
pub(crate) fn with_journal<T>(
    repo: &Repo,
    operation: &str,
    args: &[String],
    message: Option<String>,
    mutate: impl FnOnce() -> Result<T, WitError>,
) -> Result<T, WitError> {
    let before = Snapshot::capture(repo)?;
    let result = mutate();
    let after = Snapshot::capture(repo).unwrap_or_else(|_| before.clone());
    let recorded = Journal::new(repo).record(operation, args, message, before, after);
    match (result, recorded) {
        (Ok(value), Ok(_)) => Ok(value),
        (Ok(_), Err(journal_err)) => Err(journal_err),
        // The operation's own failure outranks a journaling failure.
        (Err(op_err), _) => Err(op_err),
    }
}

/// Normalize a user-supplied path to the repo-relative POSIX form index
/// keys use. Absolute paths are re-rooted at the workdir when possible.
pub(crate) fn normalize_path(repo: &Repo, path: &str) -> Result<String, WitError> {
    let raw = std::path::Path::new(path);
    let rel = if raw.is_absolute() {
        raw.strip_prefix(repo.workdir())
            .map_err(|_| WitError::NotFound(format!("path `{path}` is outside the worktree")))?
            .to_path_buf()
    } else {
        raw.to_path_buf()
    };
    let mut parts = Vec::new();
    for comp in rel.components() {
        match comp {
            std::path::Component::Normal(seg) => {
                parts.push(seg.to_string_lossy().into_owned());
            }
            std::path::Component::CurDir => {}
            _ => {
                return Err(WitError::NotFound(format!(
                    "path `{path}` escapes the worktree"
                )));
            }
        }
    }
    if parts.is_empty() {
        return Err(WitError::NotFound(format!("path `{path}` is empty")));
    }
    Ok(parts.join("/"))
}
