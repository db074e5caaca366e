//! The reference namespace: `HEAD`, branches under `refs/heads/`, tags
//! under `refs/tags/`. Each ref file holds one hex hash and a trailing
//! newline; `HEAD` is either `ref: refs/heads/<name>` (symbolic) or a raw
//! hash (detached). Branch names may nest (`feature/foo/bar`). All updates
//! are atomic file replacements.

use std::{
    fs,
    io::Write,
    path::PathBuf,
    str::FromStr,
};

use tracing::debug;

use crate::{
    errors::WitError,
    hash::ObjectHash,
    internal::object::{Object, tree::TreeItem},
    repo::Repo,
};

/// Where `HEAD` points.
///
/// `Symbolic` covers the unborn case too: the named branch may not exist
/// yet (fresh repository before the first commit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    Symbolic(String),
    Detached(ObjectHash),
}

/// Reject names that would escape the ref namespace or collide with the
/// lock discipline.
pub fn validate_ref_name(name: &str) -> Result<(), WitError> {
    let bad = name.is_empty()
        || name.starts_with('/')
        || name.ends_with('/')
        || name.ends_with(".lock")
        || name.contains("//")
        || name.contains("..")
        || name.split('/').any(|seg| seg.is_empty() || seg == "." )
        || name
            .chars()
            .any(|c| c.is_ascii_control() || c == ' ' || c == '~' || c == '^' || c == ':');
    if bad {
        return Err(WitError::InvalidRef(name.to_string()));
    }
    Ok(())
}

fn write_ref_file(path: &PathBuf, content: &str) -> Result<(), WitError> {
    let dir = path
        .parent()
        .ok_or_else(|| WitError::InvalidRef(path.display().to_string()))?;
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path).map_err(|e| WitError::IOError(e.error))?;
    Ok(())
}

/// Parse `.wit/HEAD`.
pub fn read_head(repo: &Repo) -> Result<Head, WitError> {
    let text = fs::read_to_string(repo.wit_dir().join("HEAD"))?;
    let text = text.trim_end();
    if let Some(target) = text.strip_prefix("ref: ") {
        let branch = target
            .strip_prefix("refs/heads/")
            .ok_or_else(|| WitError::InvalidRef(target.to_string()))?;
        Ok(Head::Symbolic(branch.to_string()))
    } else {
        let hash = ObjectHash::from_str(text).map_err(|_| {
            WitError::InvalidRef(format!("HEAD content `{text}` is neither symbolic nor a hash"))
        })?;
        Ok(Head::Detached(hash))
    }
}

/// Point HEAD at a branch (which may not exist yet).
pub fn set_head_branch(repo: &Repo, branch: &str) -> Result<(), WitError> {
    validate_ref_name(branch)?;
    write_ref_file(
        &repo.wit_dir().join("HEAD"),
        &format!("ref: refs/heads/{branch}\n"),
    )
}

/// Detach HEAD at a commit.
pub fn set_head_detached(repo: &Repo, hash: &ObjectHash) -> Result<(), WitError> {
    write_ref_file(&repo.wit_dir().join("HEAD"), &format!("{hash}\n"))
}

/// The commit HEAD names, or `None` while the repository is unborn.
pub fn head_commit(repo: &Repo) -> Result<Option<ObjectHash>, WitError> {
    match read_head(repo)? {
        Head::Detached(hash) => Ok(Some(hash)),
        Head::Symbolic(branch) => read_branch(repo, &branch),
    }
}

/// The current branch name, when HEAD is symbolic.
pub fn head_branch(repo: &Repo) -> Result<Option<String>, WitError> {
    match read_head(repo)? {
        Head::Symbolic(branch) => Ok(Some(branch)),
        Head::Detached(_) => Ok(None),
    }
}

fn branch_path(repo: &Repo, name: &str) -> PathBuf {
    repo.wit_dir().join("refs/heads").join(name)
}

fn tag_path(repo: &Repo, name: &str) -> PathBuf {
    repo.wit_dir().join("refs/tags").join(name)
}

fn read_ref_file(path: &PathBuf) -> Result<Option<ObjectHash>, WitError> {
    match fs::read_to_string(path) {
        Ok(text) => {
            let text = text.trim_end();
            let hash = ObjectHash::from_str(text).map_err(|_| {
                WitError::InvalidRef(format!("ref file holds `{text}`"))
            })?;
            Ok(Some(hash))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(WitError::IOError(e)),
    }
}

pub fn read_branch(repo: &Repo, name: &str) -> Result<Option<ObjectHash>, WitError> {
    validate_ref_name(name)?;
    read_ref_file(&branch_path(repo, name))
}

pub fn write_branch(repo: &Repo, name: &str, hash: &ObjectHash) -> Result<(), WitError> {
    validate_ref_name(name)?;
    write_ref_file(&branch_path(repo, name), &format!("{hash}\n"))?;
    debug!(target: "wit::refs", branch = name, %hash, "branch updated");
    Ok(())
}

/// Delete a branch ref. The checked-out branch cannot be deleted; that
/// would leave HEAD dangling.
pub fn delete_branch(repo: &Repo, name: &str) -> Result<(), WitError> {
    validate_ref_name(name)?;
    if head_branch(repo)?.as_deref() == Some(name) {
        return Err(WitError::InvalidRef(format!(
            "cannot delete the checked-out branch `{name}`"
        )));
    }
    let path = branch_path(repo, name);
    if !path.is_file() {
        return Err(WitError::ref_not_found(name));
    }
    fs::remove_file(path)?;
    prune_empty_ref_dirs(repo, "refs/heads");
    Ok(())
}

pub fn read_tag(repo: &Repo, name: &str) -> Result<Option<ObjectHash>, WitError> {
    validate_ref_name(name)?;
    read_ref_file(&tag_path(repo, name))
}

pub fn write_tag(repo: &Repo, name: &str, hash: &ObjectHash) -> Result<(), WitError> {
    validate_ref_name(name)?;
    write_ref_file(&tag_path(repo, name), &format!("{hash}\n"))
}

pub fn delete_tag(repo: &Repo, name: &str) -> Result<(), WitError> {
    validate_ref_name(name)?;
    let path = tag_path(repo, name);
    if !path.is_file() {
        return Err(WitError::ref_not_found(name));
    }
    fs::remove_file(path)?;
    prune_empty_ref_dirs(repo, "refs/tags");
    Ok(())
}

/// Drop directories emptied by a nested-ref deletion. Walks bottom-up;
/// `remove_dir` refuses non-empty directories, which is the guard.
fn prune_empty_ref_dirs(repo: &Repo, namespace: &str) {
    fn sweep(dir: &PathBuf, root: &PathBuf) {
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                if path.is_dir() {
                    sweep(&path, root);
                }
            }
        }
        if dir != root {
            let _ = fs::remove_dir(dir);
        }
    }
    let root = repo.wit_dir().join(namespace);
    sweep(&root, &root);
}

fn collect_ref_names(root: &PathBuf) -> Result<Vec<String>, WitError> {
    fn walk(dir: &PathBuf, prefix: String, out: &mut Vec<String>) -> Result<(), WitError> {
        let mut entries: Vec<_> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let nested = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            let path = entry.path();
            if path.is_dir() {
                walk(&path, nested, out)?;
            } else {
                out.push(nested);
            }
        }
        Ok(())
    }
    let mut out = Vec::new();
    if root.is_dir() {
        walk(root, String::new(), &mut out)?;
    }
    Ok(out)
}

/// Branch names, nested paths included, sorted.
pub fn list_branches(repo: &Repo) -> Result<Vec<String>, WitError> {
    collect_ref_names(&repo.wit_dir().join("refs/heads"))
}

/// Tag names, nested paths included, sorted.
pub fn list_tags(repo: &Repo) -> Result<Vec<String>, WitError> {
    collect_ref_names(&repo.wit_dir().join("refs/tags"))
}

/// Resolve a revision expression to an object id.
///
/// Base forms: `HEAD`, a branch, a tag, or a raw hash whose hex length
/// matches the repository algorithm. Extensions: `<rev>~N` walks N
/// first-parent steps; `<rev>:<path>` names the entry at `path` inside the
/// revision's tree.
pub fn resolve(repo: &Repo, name: &str) -> Result<ObjectHash, WitError> {
    // `<rev>:<path>` — split at the first colon.
    if let Some((rev, path)) = name.split_once(':') {
        let commit_id = resolve_commit(repo, rev)?;
        let commit = repo.store().get(&commit_id)?.into_commit()?;
        let item = lookup_path(repo, &commit.tree_id, path)?
            .ok_or_else(|| WitError::NotFound(format!("path `{path}` in `{rev}`")))?;
        return Ok(item.id);
    }

    // `<rev>~N` — strip the suffix, then walk first parents.
    if let Some(tilde) = name.rfind('~') {
        let (rev, count) = name.split_at(tilde);
        let count: usize = count[1..]
            .parse()
            .map_err(|_| WitError::InvalidRef(name.to_string()))?;
        let mut cursor = resolve_commit(repo, rev)?;
        for _ in 0..count {
            let commit = repo.store().get(&cursor)?.into_commit()?;
            cursor = *commit
                .parent_commit_ids
                .first()
                .ok_or_else(|| WitError::NotFound(format!("`{name}` walks past the root")))?;
        }
        return Ok(cursor);
    }

    if name == "HEAD" {
        return head_commit(repo)?
            .ok_or_else(|| WitError::NotFound("HEAD (no commits yet)".to_string()));
    }
    if validate_ref_name(name).is_ok() {
        if let Some(hash) = read_branch(repo, name)? {
            return Ok(hash);
        }
        if let Some(hash) = read_tag(repo, name)? {
            return Ok(hash);
        }
    }
    if name.len() == repo.kind().hex_len() {
        if let Ok(hash) = ObjectHash::from_str(name) {
            return Ok(hash);
        }
    }
    Err(WitError::ref_not_found(name))
}

/// Resolve and peel annotated tags until a commit id remains.
pub fn resolve_commit(repo: &Repo, name: &str) -> Result<ObjectHash, WitError> {
    let mut id = resolve(repo, name)?;
    loop {
        match repo.store().get(&id)? {
            Object::Commit(_) => return Ok(id),
            Object::Tag(tag) => id = tag.object_hash,
            other => {
                return Err(WitError::InvalidRef(format!(
                    "`{name}` names a {} where a commit is required",
                    other.object_type()
                )));
            }
        }
    }
}

/// Walk a slash-separated path down from a tree, returning the entry found.
pub fn lookup_path(
    repo: &Repo,
    tree_id: &ObjectHash,
    path: &str,
) -> Result<Option<TreeItem>, WitError> {
    let store = repo.store();
    let mut current_tree = store.get(tree_id)?.into_tree()?;
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return Ok(None);
    }
    for (i, part) in parts.iter().enumerate() {
        let item = match current_tree.find(part) {
            Some(item) => item.clone(),
            None => return Ok(None),
        };
        if i + 1 == parts.len() {
            return Ok(Some(item));
        }
        if !item.mode.is_tree() {
            return Ok(None);
        }
        current_tree = store.get(&item.id)?.into_tree()?;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashKind;
    use crate::internal::object::types::ObjectType;

    fn repo() -> (tempfile::TempDir, Repo) {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = Repo::init(dir.path(), HashKind::Sha256).unwrap();
        (dir, repo)
    }

    /// A fresh repository has symbolic unborn HEAD on main.
    #[test]
    fn test_fresh_head() {
        let (_dir, repo) = repo();
        assert_eq!(
            read_head(&repo).unwrap(),
            Head::Symbolic("main".to_string())
        );
        assert_eq!(head_commit(&repo).unwrap(), None);
        assert!(matches!(
            resolve(&repo, "HEAD"),
            Err(WitError::NotFound(_))
        ));
    }

    /// Branch write/read round-trip, nested names included.
    #[test]
    fn test_nested_branches() {
        let (_dir, repo) = repo();
        let hash = repo
            .store()
            .put_raw(ObjectType::Blob, b"placeholder")
            .unwrap();
        write_branch(&repo, "feature/foo/bar", &hash).unwrap();
        write_branch(&repo, "main", &hash).unwrap();

        assert_eq!(read_branch(&repo, "feature/foo/bar").unwrap(), Some(hash));
        assert_eq!(
            list_branches(&repo).unwrap(),
            vec!["feature/foo/bar".to_string(), "main".to_string()]
        );

        delete_branch(&repo, "feature/foo/bar").unwrap();
        assert_eq!(list_branches(&repo).unwrap(), vec!["main".to_string()]);
        // Emptied nested dirs are pruned.
        assert!(!repo.wit_dir().join("refs/heads/feature").exists());
    }

    /// The checked-out branch cannot be deleted.
    #[test]
    fn test_delete_current_branch_forbidden() {
        let (_dir, repo) = repo();
        let hash = repo.store().put_raw(ObjectType::Blob, b"x").unwrap();
        write_branch(&repo, "main", &hash).unwrap();
        assert!(matches!(
            delete_branch(&repo, "main"),
            Err(WitError::InvalidRef(_))
        ));
    }

    /// Ref name validation refuses escapes and reserved shapes.
    #[test]
    fn test_ref_name_validation() {
        for bad in ["", "/abs", "trail/", "a//b", "a..b", "has space", "x.lock", "a:b"] {
            assert!(validate_ref_name(bad).is_err(), "`{bad}` should be invalid");
        }
        for good in ["main", "feature/foo/bar", "v1.0.0", "user-branch_2"] {
            assert!(validate_ref_name(good).is_ok(), "`{good}` should be valid");
        }
    }

    /// Raw hashes of the repository's hex length resolve to themselves.
    #[test]
    fn test_resolve_raw_hash() {
        let (_dir, repo) = repo();
        let hash = repo.store().put_raw(ObjectType::Blob, b"x").unwrap();
        assert_eq!(resolve(&repo, &hash.to_string()).unwrap(), hash);
        // Wrong length for the active algorithm is rejected.
        assert!(resolve(&repo, "8ab686eafeb1f44702738c8b0f24f2567c36da6d").is_err());
    }
}
