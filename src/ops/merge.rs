//! Three-way merge: ancestor discovery over the commit DAG, file-level
//! diff3 with conflict markers, index conflict stages, and the
//! in-progress/abort/continue state machine persisted at `merge-state`.

use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    fs,
};

use serde::{Deserialize, Serialize};
use similar::{Algorithm, DiffTag, TextDiff};
use tracing::{debug, info};

use crate::{
    errors::WitError,
    hash::ObjectHash,
    internal::{
        index::IndexEntry,
        object::{tree::TreeItemMode, types::ObjectType},
    },
    journal::Journal,
    ops::with_journal,
    refs,
    repo::Repo,
    worktree,
};

/// How a merge concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The other tip was already reachable from HEAD.
    AlreadyUpToDate,
    /// HEAD was an ancestor of the other tip; the ref moved forward.
    FastForward(ObjectHash),
    /// A merge commit with both parents was created.
    Merged(ObjectHash),
}

/// State parked on disk while conflicts await resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeState {
    /// Branch or revision being merged in.
    pub source: String,
    /// Where HEAD sat when the merge started.
    pub target: String,
    pub source_commit: ObjectHash,
    pub target_commit: ObjectHash,
    pub base_commit: Option<ObjectHash>,
    pub conflicts: Vec<String>,
    pub resolved: Vec<String>,
}

/// Lowest common ancestor of two commits, by parallel BFS with visited
/// sets. With multiple candidate bases (criss-cross histories) the first
/// one discovered wins; discovery order is deterministic because both
/// queues step in lockstep and parents are walked in stored order.
pub(crate) fn merge_base(
    repo: &Repo,
    a: &ObjectHash,
    b: &ObjectHash,
) -> Result<Option<ObjectHash>, WitError> {
    if a == b {
        return Ok(Some(*a));
    }
    let store = repo.store();
    let mut visited_a: HashSet<ObjectHash> = HashSet::from([*a]);
    let mut visited_b: HashSet<ObjectHash> = HashSet::from([*b]);
    let mut queue_a: VecDeque<ObjectHash> = VecDeque::from([*a]);
    let mut queue_b: VecDeque<ObjectHash> = VecDeque::from([*b]);

    while !queue_a.is_empty() || !queue_b.is_empty() {
        if let Some(current) = queue_a.pop_front() {
            if visited_b.contains(&current) {
                return Ok(Some(current));
            }
            let commit = store.get(&current)?.into_commit()?;
            for parent in commit.parent_commit_ids {
                if visited_a.insert(parent) {
                    if visited_b.contains(&parent) {
                        return Ok(Some(parent));
                    }
                    queue_a.push_back(parent);
                }
            }
        }
        if let Some(current) = queue_b.pop_front() {
            if visited_a.contains(&current) {
                return Ok(Some(current));
            }
            let commit = store.get(&current)?.into_commit()?;
            for parent in commit.parent_commit_ids {
                if visited_b.insert(parent) {
                    if visited_a.contains(&parent) {
                        return Ok(Some(parent));
                    }
                    queue_b.push_back(parent);
                }
            }
        }
    }
    Ok(None)
}

/// Whether `ancestor` is reachable from `descendant` through parent edges.
pub(crate) fn is_ancestor(
    repo: &Repo,
    ancestor: &ObjectHash,
    descendant: &ObjectHash,
) -> Result<bool, WitError> {
    if ancestor == descendant {
        return Ok(true);
    }
    let store = repo.store();
    let mut visited: HashSet<ObjectHash> = HashSet::new();
    let mut queue: VecDeque<ObjectHash> = VecDeque::from([*descendant]);
    while let Some(current) = queue.pop_front() {
        let commit = store.get(&current)?.into_commit()?;
        for parent in commit.parent_commit_ids {
            if parent == *ancestor {
                return Ok(true);
            }
            if visited.insert(parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(false)
}

/// Text heuristic: a NUL byte anywhere marks binary content.
fn is_binary(data: &[u8]) -> bool {
    memchr::memchr(0, data).is_some()
}

/// One side's change to a base line range.
#[derive(Debug, Clone)]
struct ChangeRegion {
    base_start: usize,
    base_end: usize,
    replacement: Vec<String>,
}

fn change_regions(base: &[&str], side: &[&str]) -> Vec<ChangeRegion> {
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_slices(base, side);
    let mut regions = Vec::new();
    for op in diff.ops() {
        if op.tag() == DiffTag::Equal {
            continue;
        }
        regions.push(ChangeRegion {
            base_start: op.old_range().start,
            base_end: op.old_range().end,
            replacement: side[op.new_range()].iter().map(|s| s.to_string()).collect(),
        });
    }
    regions
}

/// Replay one side's regions that fall inside `[start, end)` over the base
/// slice, yielding that side's text for the window.
fn splice(base: &[&str], regions: &[&ChangeRegion], start: usize, end: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut pos = start;
    for region in regions {
        out.extend(base[pos..region.base_start].iter().map(|s| s.to_string()));
        out.extend(region.replacement.iter().cloned());
        pos = region.base_end;
    }
    out.extend(base[pos..end].iter().map(|s| s.to_string()));
    out
}

/// Two regions collide when their base ranges overlap, or when both touch
/// the same point and at least one is a pure insertion (ordering would be
/// ambiguous).
fn regions_collide(a: &ChangeRegion, b: &ChangeRegion) -> bool {
    let strict = a.base_start < b.base_end && b.base_start < a.base_end;
    let same_point_insert = a.base_start == b.base_start
        && (a.base_start == a.base_end || b.base_start == b.base_end);
    strict || same_point_insert
}

/// Line-level three-way merge using the base as pivot. Returns the merged
/// bytes and whether conflict markers were emitted.
pub(crate) fn merge_text(
    base: &str,
    ours: &str,
    theirs: &str,
    ours_label: &str,
    theirs_label: &str,
) -> (Vec<u8>, bool) {
    let base_lines: Vec<&str> = base.split_inclusive('\n').collect();
    let ours_lines: Vec<&str> = ours.split_inclusive('\n').collect();
    let theirs_lines: Vec<&str> = theirs.split_inclusive('\n').collect();

    let ours_regions = change_regions(&base_lines, &ours_lines);
    let theirs_regions = change_regions(&base_lines, &theirs_lines);

    let mut out = String::new();
    let mut conflicted = false;
    let mut base_pos = 0usize;
    let mut i = 0usize;
    let mut j = 0usize;

    while i < ours_regions.len() || j < theirs_regions.len() {
        let take_ours = match (ours_regions.get(i), theirs_regions.get(j)) {
            (Some(a), Some(b)) => {
                if regions_collide(a, b) {
                    // Coalesce the colliding cluster from both sides.
                    let mut start = a.base_start.min(b.base_start);
                    let mut end = a.base_end.max(b.base_end);
                    let cluster_i = i;
                    let cluster_j = j;
                    loop {
                        let mut grown = false;
                        while let Some(next) = ours_regions.get(i) {
                            if next.base_start <= end && next.base_end >= start {
                                start = start.min(next.base_start);
                                end = end.max(next.base_end);
                                i += 1;
                                grown = true;
                            } else {
                                break;
                            }
                        }
                        while let Some(next) = theirs_regions.get(j) {
                            if next.base_start <= end && next.base_end >= start {
                                start = start.min(next.base_start);
                                end = end.max(next.base_end);
                                j += 1;
                                grown = true;
                            } else {
                                break;
                            }
                        }
                        if !grown {
                            break;
                        }
                    }

                    let ours_window: Vec<&ChangeRegion> =
                        ours_regions[cluster_i..i].iter().collect();
                    let theirs_window: Vec<&ChangeRegion> =
                        theirs_regions[cluster_j..j].iter().collect();
                    out.push_str(
                        &base_lines[base_pos..start]
                            .iter()
                            .copied()
                            .collect::<String>(),
                    );
                    let ours_text = splice(&base_lines, &ours_window, start, end).concat();
                    let theirs_text = splice(&base_lines, &theirs_window, start, end).concat();
                    if ours_text == theirs_text {
                        // Both sides changed identically.
                        out.push_str(&ours_text);
                    } else {
                        conflicted = true;
                        let base_text: String =
                            base_lines[start..end].iter().copied().collect();
                        push_line(&mut out, &format!("<<<<<<< {ours_label}"));
                        push_block(&mut out, &ours_text);
                        push_line(&mut out, "|||||||");
                        push_block(&mut out, &base_text);
                        push_line(&mut out, "=======");
                        push_block(&mut out, &theirs_text);
                        push_line(&mut out, &format!(">>>>>>> {theirs_label}"));
                    }
                    base_pos = end;
                    continue;
                }
                a.base_start <= b.base_start
            }
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };

        let region = if take_ours {
            let region = &ours_regions[i];
            i += 1;
            region
        } else {
            let region = &theirs_regions[j];
            j += 1;
            region
        };
        out.push_str(
            &base_lines[base_pos..region.base_start]
                .iter()
                .copied()
                .collect::<String>(),
        );
        for line in &region.replacement {
            out.push_str(line);
        }
        base_pos = region.base_end;
    }
    out.push_str(&base_lines[base_pos..].iter().copied().collect::<String>());
    (out.into_bytes(), conflicted)
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

/// Append a block, guaranteeing it ends with a newline so the next marker
/// starts a fresh line.
fn push_block(out: &mut String, block: &str) {
    out.push_str(block);
    if !block.is_empty() && !block.ends_with('\n') {
        out.push('\n');
    }
}

impl Repo {
    /// Merge another branch (or revision) into HEAD.
    pub fn merge(&self, source: &str) -> Result<MergeOutcome, WitError> {
        let _lock = self.lock()?;
        if self.merge_state_path().is_file() {
            return Err(WitError::OperationInProgress("merge".to_string()));
        }
        if self.cherry_pick_state_path().is_file() {
            return Err(WitError::OperationInProgress("cherry-pick".to_string()));
        }
        with_journal(
            self,
            "merge",
            &[source.to_string()],
            None,
            || self.merge_inner(source),
        )
    }

    fn merge_inner(&self, source: &str) -> Result<MergeOutcome, WitError> {
        let ours_id = refs::head_commit(self)?
            .ok_or_else(|| WitError::NotFound("HEAD (no commits yet)".to_string()))?;
        let theirs_id = refs::resolve_commit(self, source)?;

        if is_ancestor(self, &theirs_id, &ours_id)? {
            return Ok(MergeOutcome::AlreadyUpToDate);
        }
        if is_ancestor(self, &ours_id, &theirs_id)? {
            self.materialize_commit(&theirs_id)?;
            match refs::read_head(self)? {
                refs::Head::Symbolic(branch) => refs::write_branch(self, &branch, &theirs_id)?,
                refs::Head::Detached(_) => refs::set_head_detached(self, &theirs_id)?,
            }
            info!(target: "wit::ops", from = %ours_id, to = %theirs_id, "fast-forward");
            return Ok(MergeOutcome::FastForward(theirs_id));
        }

        let base_id = merge_base(self, &ours_id, &theirs_id)?;
        let conflicts =
            self.apply_three_way(base_id.as_ref(), &ours_id, &theirs_id, source)?;

        if conflicts.is_empty() {
            let message = format!("Merge branch '{source}'");
            let merge_commit =
                self.write_commit(&message, None, vec![ours_id, theirs_id])?;
            return Ok(MergeOutcome::Merged(merge_commit));
        }

        let state = MergeState {
            source: source.to_string(),
            target: refs::head_branch(self)?.unwrap_or_else(|| "HEAD".to_string()),
            source_commit: theirs_id,
            target_commit: ours_id,
            base_commit: base_id,
            conflicts: conflicts.clone(),
            resolved: Vec::new(),
        };
        self.save_merge_state(&state)?;
        Err(WitError::Conflict(conflicts.len()))
    }

    /// Reconcile each path in the union of the three trees, writing merged
    /// results into the worktree and index, and returning conflicted paths.
    /// Shared with cherry-pick, which merges each picked commit against its
    /// first parent.
    pub(crate) fn apply_three_way(
        &self,
        base_id: Option<&ObjectHash>,
        ours_id: &ObjectHash,
        theirs_id: &ObjectHash,
        theirs_label: &str,
    ) -> Result<Vec<String>, WitError> {
        let store = self.store();
        let empty = BTreeMap::new();
        let base_flat = match base_id {
            Some(id) => {
                let commit = store.get(id)?.into_commit()?;
                worktree::flatten_tree(&store, &commit.tree_id)?
            }
            None => empty,
        };
        let ours_commit = store.get(ours_id)?.into_commit()?;
        let ours_flat = worktree::flatten_tree(&store, &ours_commit.tree_id)?;
        let theirs_commit = store.get(theirs_id)?.into_commit()?;
        let theirs_flat = worktree::flatten_tree(&store, &theirs_commit.tree_id)?;

        let ours_label = refs::head_branch(self)?.unwrap_or_else(|| "HEAD".to_string());

        let mut paths: HashSet<&String> = HashSet::new();
        paths.extend(base_flat.keys());
        paths.extend(ours_flat.keys());
        paths.extend(theirs_flat.keys());
        let mut paths: Vec<&String> = paths.into_iter().collect();
        paths.sort();

        let mut index = self.load_index()?;
        let mut conflicts = Vec::new();

        for path in paths {
            let base = base_flat.get(path);
            let ours = ours_flat.get(path);
            let theirs = theirs_flat.get(path);

            // Identical on both sides (same change or same absence).
            if ours == theirs {
                continue;
            }
            // Unchanged on our side: take theirs wholesale.
            if base == ours {
                match theirs {
                    Some((mode, id)) => {
                        worktree::materialize_file(self, path, *mode, id)?;
                        let size = fs::metadata(self.workdir().join(path))
                            .map(|m| m.len())
                            .unwrap_or(0);
                        index.add_entry(IndexEntry::new(
                            path.clone(),
                            *mode,
                            *id,
                            size,
                            crate::ops::add::file_mtime(&self.workdir().join(path)),
                        ));
                    }
                    None => {
                        index.remove(path);
                        let abs = self.workdir().join(path);
                        if fs::symlink_metadata(&abs).is_ok() {
                            fs::remove_file(&abs)?;
                        }
                    }
                }
                continue;
            }
            // Unchanged on their side: ours stands.
            if base == theirs {
                continue;
            }

            // Both sides changed, differently.
            let entry_for = |side: Option<&(TreeItemMode, ObjectHash)>| {
                side.map(|(mode, id)| IndexEntry::new(path.clone(), *mode, *id, 0, 0))
            };
            let (ours_present, theirs_present) = (ours.is_some(), theirs.is_some());
            if !ours_present || !theirs_present {
                // Delete/modify: keep whichever side still exists in the
                // worktree and park the stages.
                if let Some((mode, id)) = theirs {
                    if !ours_present {
                        worktree::materialize_file(self, path, *mode, id)?;
                    }
                }
                index.set_conflict(path, entry_for(base), entry_for(ours), entry_for(theirs));
                conflicts.push(path.clone());
                continue;
            }

            let (Some(&(ours_mode, ours_hash)), Some(&(_, theirs_hash))) = (ours, theirs)
            else {
                continue;
            };
            let base_bytes = match base {
                Some((_, id)) => self.read_blob(id)?,
                None => Vec::new(),
            };
            let ours_bytes = self.read_blob(&ours_hash)?;
            let theirs_bytes = self.read_blob(&theirs_hash)?;

            if is_binary(&base_bytes) || is_binary(&ours_bytes) || is_binary(&theirs_bytes) {
                // Binary conflict: ours stays in the worktree.
                index.set_conflict(path, entry_for(base), entry_for(ours), entry_for(theirs));
                conflicts.push(path.clone());
                continue;
            }

            let (merged, conflicted) = merge_text(
                &String::from_utf8_lossy(&base_bytes),
                &String::from_utf8_lossy(&ours_bytes),
                &String::from_utf8_lossy(&theirs_bytes),
                &ours_label,
                theirs_label,
            );
            if conflicted {
                let blob_id = store.put_raw(ObjectType::Blob, &merged)?;
                worktree::materialize_file(self, path, ours_mode, &blob_id)?;
                index.set_conflict(path, entry_for(base), entry_for(ours), entry_for(theirs));
                conflicts.push(path.clone());
            } else {
                let blob_id = store.put_raw(ObjectType::Blob, &merged)?;
                worktree::materialize_file(self, path, ours_mode, &blob_id)?;
                let abs = self.workdir().join(path);
                index.add_entry(IndexEntry::new(
                    path.clone(),
                    ours_mode,
                    blob_id,
                    merged.len() as u64,
                    crate::ops::add::file_mtime(&abs),
                ));
            }
        }

        self.save_index(&index)?;
        debug!(target: "wit::ops", conflicts = conflicts.len(), "three-way reconciliation done");
        Ok(conflicts)
    }

    /// Abandon an in-progress merge: restore HEAD, branch and index from
    /// the journal's pre-merge snapshot and drop the state file.
    pub fn merge_abort(&self) -> Result<(), WitError> {
        let _lock = self.lock()?;
        if !self.merge_state_path().is_file() {
            return Err(WitError::NotFound("no merge in progress".to_string()));
        }
        with_journal(self, "merge_abort", &[], None, || {
            let journal = Journal::new(self);
            let entry = journal
                .entries()?
                .into_iter()
                .rev()
                .find(|e| e.operation == "merge")
                .ok_or_else(|| {
                    WitError::NotFound("journal entry for the merge".to_string())
                })?;
            crate::journal::restore_snapshot(self, &entry.before)?;
            if let Some(head) = entry.before.head {
                self.materialize_commit(&head)?;
            }
            fs::remove_file(self.merge_state_path())?;
            info!(target: "wit::ops", "merge aborted");
            Ok(())
        })
    }

    /// Conclude a resolved merge with a two-parent commit. Every conflict
    /// must be resolved (no conflict stages left in the index).
    pub fn merge_continue(&self) -> Result<ObjectHash, WitError> {
        let _lock = self.lock()?;
        let state = self.load_merge_state()?;
        with_journal(self, "merge_continue", &[], None, || {
            let index = self.load_index()?;
            if index.has_conflicts() {
                return Err(WitError::Conflict(index.conflicted_paths().len()));
            }
            let message = format!("Merge branch '{}'", state.source);
            let merge_commit = self.write_commit(
                &message,
                None,
                vec![state.target_commit, state.source_commit],
            )?;
            fs::remove_file(self.merge_state_path())?;
            info!(target: "wit::ops", id = %merge_commit, "merge concluded");
            Ok(merge_commit)
        })
    }

    pub(crate) fn save_merge_state(&self, state: &MergeState) -> Result<(), WitError> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| WitError::MalformedObject(format!("merge state: {e}")))?;
        fs::write(self.merge_state_path(), json)?;
        Ok(())
    }

    pub(crate) fn load_merge_state(&self) -> Result<MergeState, WitError> {
        let bytes = fs::read(self.merge_state_path()).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WitError::NotFound("no merge in progress".to_string())
            } else {
                WitError::IOError(e)
            }
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| WitError::MalformedObject(format!("merge state: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashKind;
    use crate::ops::checkout::CheckoutOptions;
    use crate::ops::status::{Activity, StatusOptions};

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

    /// Non-overlapping edits from both sides merge cleanly.
    #[test]
    fn test_merge_text_clean() {
        let base = "one\ntwo\nthree\nfour\nfive\n";
        let ours = "ONE\ntwo\nthree\nfour\nfive\n";
        let theirs = "one\ntwo\nthree\nfour\nFIVE\n";
        let (merged, conflicted) = merge_text(base, ours, theirs, "main", "f");
        assert!(!conflicted);
        assert_eq!(merged, b"ONE\ntwo\nthree\nfour\nFIVE\n");
    }

    /// The same edit on both sides is taken once.
    #[test]
    fn test_merge_text_identical_change() {
        let base = "a\nb\n";
        let both = "a\nB\n";
        let (merged, conflicted) = merge_text(base, both, both, "x", "y");
        assert!(!conflicted);
        assert_eq!(merged, b"a\nB\n");
    }

    /// Overlapping distinct edits produce all four marker lines.
    #[test]
    fn test_merge_text_conflict_markers() {
        let base = "x.txt holds base\n";
        let ours = "x.txt holds main\n";
        let theirs = "x.txt holds feat\n";
        let (merged, conflicted) = merge_text(base, ours, theirs, "main", "f");
        assert!(conflicted);
        let text = String::from_utf8(merged).unwrap();
        assert!(text.contains("<<<<<<< main\n"));
        assert!(text.contains("x.txt holds main\n"));
        assert!(text.contains("|||||||\n"));
        assert!(text.contains("x.txt holds base\n"));
        assert!(text.contains("=======\n"));
        assert!(text.contains("x.txt holds feat\n"));
        assert!(text.contains(">>>>>>> f\n"));
    }

    /// Fast-forward advances the branch without a merge commit.
    #[test]
    fn test_fast_forward() {
        let (_dir, repo) = repo();
        commit_file(&repo, "a.txt", "base\n", "base");
        repo.checkout("f", CheckoutOptions { create: true }).unwrap();
        let tip = commit_file(&repo, "a.txt", "feat\n", "feat");
        repo.checkout("main", CheckoutOptions::default()).unwrap();

        let outcome = repo.merge("f").unwrap();
        assert_eq!(outcome, MergeOutcome::FastForward(tip));
        assert_eq!(refs::read_branch(&repo, "main").unwrap(), Some(tip));
        assert_eq!(fs::read(repo.workdir().join("a.txt")).unwrap(), b"feat\n");

        // Merging again is a no-op.
        assert_eq!(repo.merge("f").unwrap(), MergeOutcome::AlreadyUpToDate);
    }

    /// Divergent compatible edits produce a two-parent merge commit.
    #[test]
    fn test_clean_merge_commit() {
        let (_dir, repo) = repo();
        let base = commit_file(&repo, "a.txt", "one\ntwo\nthree\n", "base");
        repo.checkout("f", CheckoutOptions { create: true }).unwrap();
        let theirs = commit_file(&repo, "a.txt", "one\ntwo\nTHREE\n", "feat");
        repo.checkout("main", CheckoutOptions::default()).unwrap();
        let ours = commit_file(&repo, "a.txt", "ONE\ntwo\nthree\n", "main edit");

        let outcome = repo.merge("f").unwrap();
        let MergeOutcome::Merged(merge_id) = outcome else {
            panic!("expected merge commit, got {outcome:?}");
        };
        let commit = repo.store().get(&merge_id).unwrap().into_commit().unwrap();
        assert_eq!(commit.parent_commit_ids, vec![ours, theirs]);
        assert_eq!(
            fs::read(repo.workdir().join("a.txt")).unwrap(),
            b"ONE\ntwo\nTHREE\n"
        );
        assert!(merge_base(&repo, &ours, &theirs).unwrap() == Some(base));
    }

    /// Conflicting edits park state; abort restores the pre-merge world.
    #[test]
    fn test_conflict_then_abort() {
        let (_dir, repo) = repo();
        commit_file(&repo, "x.txt", "base\n", "base");
        repo.checkout("f", CheckoutOptions { create: true }).unwrap();
        commit_file(&repo, "x.txt", "feat\n", "feat");
        repo.checkout("main", CheckoutOptions::default()).unwrap();
        let pre_merge = commit_file(&repo, "x.txt", "main\n", "main edit");

        let err = repo.merge("f").unwrap_err();
        assert!(matches!(err, WitError::Conflict(1)));
        let report = repo.status(StatusOptions::default()).unwrap();
        assert_eq!(report.activity, Activity::Merge);
        assert_eq!(report.conflicted, vec!["x.txt".to_string()]);
        let conflict_text =
            fs::read_to_string(repo.workdir().join("x.txt")).unwrap();
        assert!(conflict_text.contains("<<<<<<<"));
        assert!(conflict_text.contains(">>>>>>> f"));

        repo.merge_abort().unwrap();
        assert_eq!(refs::head_commit(&repo).unwrap(), Some(pre_merge));
        assert_eq!(fs::read(repo.workdir().join("x.txt")).unwrap(), b"main\n");
        let report = repo.status(StatusOptions::default()).unwrap();
        assert!(report.is_clean(), "status after abort: {report:?}");
    }

    /// Resolving and continuing creates the two-parent commit.
    #[test]
    fn test_conflict_resolve_continue() {
        let (_dir, repo) = repo();
        commit_file(&repo, "x.txt", "base\n", "base");
        repo.checkout("f", CheckoutOptions { create: true }).unwrap();
        let theirs = commit_file(&repo, "x.txt", "feat\n", "feat");
        repo.checkout("main", CheckoutOptions::default()).unwrap();
        let ours = commit_file(&repo, "x.txt", "main\n", "main edit");

        assert!(repo.merge("f").is_err());
        // Continue refuses while stages remain.
        assert!(matches!(
            repo.merge_continue(),
            Err(WitError::Conflict(_))
        ));

        fs::write(repo.workdir().join("x.txt"), "resolved\n").unwrap();
        repo.add("x.txt").unwrap();
        let merge_id = repo.merge_continue().unwrap();
        let commit = repo.store().get(&merge_id).unwrap().into_commit().unwrap();
        assert_eq!(commit.parent_commit_ids, vec![ours, theirs]);
        assert!(!repo.merge_state_path().exists());
    }

    /// Binary divergence conflicts without markers; ours stays on disk.
    #[test]
    fn test_binary_conflict_keeps_ours() {
        let (_dir, repo) = repo();
        fs::write(repo.workdir().join("bin.dat"), [0u8, 1, 2]).unwrap();
        repo.add("bin.dat").unwrap();
        repo.commit("base", Some(("t".to_string(), "t@e".to_string())))
            .unwrap();
        repo.checkout("f", CheckoutOptions { create: true }).unwrap();
        fs::write(repo.workdir().join("bin.dat"), [0u8, 9, 9]).unwrap();
        repo.add("bin.dat").unwrap();
        repo.commit("theirs", Some(("t".to_string(), "t@e".to_string())))
            .unwrap();
        repo.checkout("main", CheckoutOptions::default()).unwrap();
        fs::write(repo.workdir().join("bin.dat"), [0u8, 5, 5]).unwrap();
        repo.add("bin.dat").unwrap();
        repo.commit("ours", Some(("t".to_string(), "t@e".to_string())))
            .unwrap();

        assert!(repo.merge("f").is_err());
        assert_eq!(
            fs::read(repo.workdir().join("bin.dat")).unwrap(),
            vec![0u8, 5, 5]
        );
        let index = repo.load_index().unwrap();
        assert!(index.has_conflicts());
    }
}
