//! Cherry-pick: re-apply commits onto HEAD as three-way merges against each
//! commit's first parent, with resumable state at `cherry-pick-state`.

use std::fs;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    errors::WitError,
    hash::ObjectHash,
    ops::with_journal,
    refs,
    repo::Repo,
};

/// Options for [`Repo::cherry_pick`].
#[derive(Debug, Default, Clone)]
pub struct CherryPickOptions {
    /// Apply to the worktree and index without creating commits.
    pub no_commit: bool,
}

/// Resume state parked while a pick sits in conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CherryPickState {
    /// HEAD before the sequence started; `--abort` returns here.
    pub original_head: ObjectHash,
    /// The commits being picked, in order.
    pub sequence: Vec<ObjectHash>,
    /// Position of the commit whose conflicts are pending.
    pub cursor: usize,
    pub conflicts: Vec<String>,
    pub no_commit: bool,
}

impl Repo {
    /// Pick the given revisions onto HEAD in order. Returns the ids of the
    /// commits created (empty under `no_commit`). On conflict the state is
    /// persisted and `Conflict` is returned; resolve and
    /// [`Repo::cherry_pick_continue`], or [`Repo::cherry_pick_abort`].
    pub fn cherry_pick(
        &self,
        revs: &[&str],
        opts: CherryPickOptions,
    ) -> Result<Vec<ObjectHash>, WitError> {
        let _lock = self.lock()?;
        if self.cherry_pick_state_path().is_file() {
            return Err(WitError::OperationInProgress("cherry-pick".to_string()));
        }
        if self.merge_state_path().is_file() {
            return Err(WitError::OperationInProgress("merge".to_string()));
        }

        let args: Vec<String> = revs.iter().map(|r| r.to_string()).collect();
        with_journal(self, "cherry_pick", &args, None, || {
            let original_head = refs::head_commit(self)?
                .ok_or_else(|| WitError::NotFound("HEAD (no commits yet)".to_string()))?;
            let sequence = revs
                .iter()
                .map(|rev| refs::resolve_commit(self, rev))
                .collect::<Result<Vec<ObjectHash>, WitError>>()?;
            let state = CherryPickState {
                original_head,
                sequence,
                cursor: 0,
                conflicts: Vec::new(),
                no_commit: opts.no_commit,
            };
            self.run_pick_sequence(state)
        })
    }

    /// Drive the sequence from its cursor; parks state and fails on the
    /// first conflicted pick.
    fn run_pick_sequence(
        &self,
        mut state: CherryPickState,
    ) -> Result<Vec<ObjectHash>, WitError> {
        let mut created = Vec::new();
        while state.cursor < state.sequence.len() {
            let pick_id = state.sequence[state.cursor];
            let pick = self.store().get(&pick_id)?.into_commit()?;
            let head = refs::head_commit(self)?
                .ok_or_else(|| WitError::NotFound("HEAD (no commits yet)".to_string()))?;

            let base = pick.parent_commit_ids.first().copied();
            let label = pick_id.to_string();
            let conflicts =
                self.apply_three_way(base.as_ref(), &head, &pick_id, &label[..12])?;
            if !conflicts.is_empty() {
                state.conflicts = conflicts.clone();
                self.save_cherry_pick_state(&state)?;
                info!(target: "wit::ops", pick = %pick_id, conflicts = conflicts.len(), "cherry-pick parked");
                return Err(WitError::Conflict(conflicts.len()));
            }

            if !state.no_commit {
                let author = (pick.author.name.clone(), pick.author.email.clone());
                let new_id = self.write_commit(&pick.message, Some(author), vec![head])?;
                created.push(new_id);
                info!(target: "wit::ops", original = %pick_id, new = %new_id, "cherry-picked");
            }
            state.cursor += 1;
        }
        Ok(created)
    }

    /// Resume after resolving conflicts: commits the pending pick from the
    /// current index, then continues the remaining sequence.
    pub fn cherry_pick_continue(&self) -> Result<Vec<ObjectHash>, WitError> {
        let _lock = self.lock()?;
        let mut state = self.load_cherry_pick_state()?;
        with_journal(self, "cherry_pick_continue", &[], None, || {
            let index = self.load_index()?;
            if index.has_conflicts() {
                return Err(WitError::Conflict(index.conflicted_paths().len()));
            }

            let mut created = Vec::new();
            if !state.no_commit {
                let pending = self
                    .store()
                    .get(&state.sequence[state.cursor])?
                    .into_commit()?;
                let head = refs::head_commit(self)?
                    .ok_or_else(|| WitError::NotFound("HEAD".to_string()))?;
                let author = (pending.author.name.clone(), pending.author.email.clone());
                let new_id =
                    self.write_commit(&pending.message, Some(author), vec![head])?;
                created.push(new_id);
            }
            state.cursor += 1;
            state.conflicts.clear();
            fs::remove_file(self.cherry_pick_state_path())?;

            let mut rest = self.run_pick_sequence(state)?;
            created.append(&mut rest);
            Ok(created)
        })
    }

    /// Abandon the sequence and restore the saved HEAD.
    pub fn cherry_pick_abort(&self) -> Result<(), WitError> {
        let _lock = self.lock()?;
        let state = self.load_cherry_pick_state()?;
        with_journal(self, "cherry_pick_abort", &[], None, || {
            match refs::read_head(self)? {
                refs::Head::Symbolic(branch) => {
                    refs::write_branch(self, &branch, &state.original_head)?;
                }
                refs::Head::Detached(_) => {
                    refs::set_head_detached(self, &state.original_head)?;
                }
            }
            self.materialize_commit(&state.original_head)?;
            fs::remove_file(self.cherry_pick_state_path())?;
            info!(target: "wit::ops", head = %state.original_head, "cherry-pick aborted");
            Ok(())
        })
    }

    fn save_cherry_pick_state(&self, state: &CherryPickState) -> Result<(), WitError> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| WitError::MalformedObject(format!("cherry-pick state: {e}")))?;
        fs::write(self.cherry_pick_state_path(), json)?;
        Ok(())
    }

    fn load_cherry_pick_state(&self) -> Result<CherryPickState, WitError> {
        let bytes = fs::read(self.cherry_pick_state_path()).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WitError::NotFound("no cherry-pick in progress".to_string())
            } else {
                WitError::IOError(e)
            }
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| WitError::MalformedObject(format!("cherry-pick state: {e}")))
    }
}
