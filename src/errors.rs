//! Error types for the wit-core crate.
//!
//! This module defines a unified error enumeration used across object
//! decoding, the staging index, reference handling, merge/cherry-pick state
//! machines, and the Git migration. It integrates with `thiserror` to
//! provide rich `Display` implementations and error source chaining.
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - Every failure that crosses the repository boundary maps to exactly one
//!   of these kinds.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the wit-core library.
///
/// - Used across object parsing, staging, refs, worktree and migration.
/// - Implements `std::error::Error` via `thiserror`.
pub enum WitError {
    /// No repository metadata directory found walking up from the start path.
    #[error("not a wit repository (or any parent up to the filesystem root): {0}")]
    NotARepository(PathBuf),

    /// Init called on a directory that already hosts a repository.
    #[error("repository already initialized at `{0}`")]
    AlreadyInitialized(PathBuf),

    /// Object, ref, or path missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Decoding, framing, or header inconsistency in a stored object.
    #[error("malformed object: {0}")]
    MalformedObject(String),

    /// Recomputed hash disagrees with the id an object is stored under.
    #[error("hash mismatch for object `{id}`: computed `{computed}`")]
    HashMismatch { id: String, computed: String },

    /// Merge or cherry-pick produced unresolved paths.
    #[error("conflict in {0} path(s); resolve and continue, or abort")]
    Conflict(usize),

    /// A merge or cherry-pick is already in progress.
    #[error("operation in progress: {0}")]
    OperationInProgress(String),

    /// Empty index, or amend with no content change and no new message.
    #[error("nothing to commit")]
    NothingToCommit,

    /// Malformed ref name or unknown reference.
    #[error("invalid ref: {0}")]
    InvalidRef(String),

    /// Repository lock held by another process.
    #[error("repository is locked by another process (lock file `{0}`)")]
    Locked(PathBuf),

    /// I/O error from the underlying filesystem.
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),

    /// Destructive operation refused without `force` or `dry_run`.
    #[error("refusing to {0} without --force or --dry-run")]
    SafetyAbort(String),
}

impl WitError {
    /// Shorthand for a `NotFound` carrying an object id.
    pub fn object_not_found(id: impl std::fmt::Display) -> Self {
        WitError::NotFound(format!("object `{id}`"))
    }

    /// Shorthand for a `NotFound` carrying a ref name.
    pub fn ref_not_found(name: &str) -> Self {
        WitError::NotFound(format!("ref `{name}`"))
    }
}
