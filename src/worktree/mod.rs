//! Working-tree operations: walking files under ignore rules, materializing
//! stored trees onto disk, and cleaning up directories a checkout emptied.

pub mod ignore;

use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::Path,
};

use tracing::debug;

use crate::{
    errors::WitError,
    hash::ObjectHash,
    internal::{
        chunk,
        object::tree::{TreeItem, TreeItemMode},
        store::Store,
    },
    repo::{Repo, WIT_DIR},
    worktree::ignore::IgnoreList,
};

/// Directory names never touched by materialization or cleanup.
const PROTECTED_DIRS: &[&str] = &[WIT_DIR, ".git", "node_modules"];

/// Ignore file name at the worktree root.
pub const IGNORE_FILE: &str = ".witignore";

/// Load the effective ignore rules: `info/exclude` first, the root
/// ignore file second (so the worktree file wins on conflicts).
pub fn load_ignore(repo: &Repo) -> IgnoreList {
    let mut list = IgnoreList::default();
    for path in [
        repo.wit_dir().join("info/exclude"),
        repo.workdir().join(IGNORE_FILE),
    ] {
        if let Ok(text) = fs::read_to_string(&path) {
            list.extend_from(IgnoreList::from_lines(text.lines()));
        }
    }
    list
}

/// Walk the worktree, yielding repo-relative POSIX paths of files that are
/// not ignored. The metadata directory and protected siblings are always
/// skipped. Output is sorted.
pub fn walk(repo: &Repo, ignore: &IgnoreList) -> Result<Vec<String>, WitError> {
    fn recurse(
        ignore: &IgnoreList,
        dir: &Path,
        prefix: &str,
        out: &mut Vec<String>,
    ) -> Result<(), WitError> {
        let mut entries: Vec<_> = fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let rel = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if PROTECTED_DIRS.contains(&name.as_str()) {
                    continue;
                }
                if ignore.can_prune(&rel) {
                    continue;
                }
                recurse(ignore, &entry.path(), &rel, out)?;
            } else if !ignore.is_ignored(&rel, false) {
                out.push(rel);
            }
        }
        Ok(())
    }

    let mut out = Vec::new();
    recurse(ignore, repo.workdir(), "", &mut out)?;
    Ok(out)
}

/// Flatten a stored tree into `path -> (mode, id)`.
pub fn flatten_tree(
    store: &Store,
    tree_id: &ObjectHash,
) -> Result<BTreeMap<String, (TreeItemMode, ObjectHash)>, WitError> {
    let mut out = BTreeMap::new();
    let mut stack: Vec<(String, ObjectHash)> = vec![(String::new(), *tree_id)];
    while let Some((prefix, id)) = stack.pop() {
        let tree = store.get(&id)?.into_tree()?;
        for TreeItem { mode, id, name } in tree.tree_items {
            let path = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };
            if mode.is_tree() {
                stack.push((path, id));
            } else {
                out.insert(path, (mode, id));
            }
        }
    }
    Ok(out)
}

/// Write one stored blob to a worktree path with the right mode. Existing
/// files are replaced; parent directories are created.
pub fn materialize_file(
    repo: &Repo,
    rel_path: &str,
    mode: TreeItemMode,
    id: &ObjectHash,
) -> Result<(), WitError> {
    let abs = repo.workdir().join(rel_path);
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)?;
    }
    // Symlinks and mode changes need the old entry gone first.
    if fs::symlink_metadata(&abs).is_ok() {
        fs::remove_file(&abs)?;
    }

    if mode == TreeItemMode::Link {
        let target_bytes = repo.read_blob(id)?;
        let target = String::from_utf8_lossy(&target_bytes).into_owned();
        #[cfg(unix)]
        std::os::unix::fs::symlink(target, &abs)?;
        #[cfg(not(unix))]
        fs::write(&abs, target_bytes)?;
        return Ok(());
    }

    let mut file = fs::File::create(&abs)?;
    chunk::materialize_blob(&repo.store(), &repo.large_files(), id, &mut file)?;
    file.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let bits = if mode == TreeItemMode::BlobExecutable {
            0o755
        } else {
            0o644
        };
        fs::set_permissions(&abs, fs::Permissions::from_mode(bits))?;
    }
    Ok(())
}

/// Materialize `tree_id` over the worktree: write every entry of the new
/// tree, delete files tracked before but absent after, then drop emptied
/// directories. `previously_tracked` is the flattened path set the caller
/// considers tracked (usually the stage-0 index paths).
pub fn checkout_tree(
    repo: &Repo,
    tree_id: &ObjectHash,
    previously_tracked: &[String],
) -> Result<(), WitError> {
    let store = repo.store();
    let target = flatten_tree(&store, tree_id)?;

    for (path, (mode, id)) in &target {
        materialize_file(repo, path, *mode, id)?;
    }
    for path in previously_tracked {
        if !target.contains_key(path) {
            let abs = repo.workdir().join(path);
            if fs::symlink_metadata(&abs).is_ok() {
                fs::remove_file(&abs)?;
            }
        }
    }
    remove_empty_dirs(repo.workdir())?;
    debug!(target: "wit::worktree", tree = %tree_id, files = target.len(), "tree materialized");
    Ok(())
}

/// Remove directories left empty, bottom-up, skipping the metadata
/// directory and protected siblings. The worktree root itself stays.
pub fn remove_empty_dirs(root: &Path) -> Result<(), WitError> {
    fn sweep(dir: &Path, is_root: bool) -> Result<bool, WitError> {
        let mut empty = true;
        for entry in fs::read_dir(dir)?.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            if path.is_dir() {
                if PROTECTED_DIRS.contains(&name.as_str()) {
                    empty = false;
                    continue;
                }
                if sweep(&path, false)? {
                    fs::remove_dir(&path)?;
                } else {
                    empty = false;
                }
            } else {
                empty = false;
            }
        }
        Ok(empty && !is_root)
    }
    sweep(root, true)?;
    Ok(())
}
