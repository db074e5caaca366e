//! Branch CRUD over the refs namespace.

use crate::{
    errors::WitError,
    hash::ObjectHash,
    ops::with_journal,
    refs,
    repo::Repo,
};

impl Repo {
    /// Create a branch at a revision (default: current HEAD).
    pub fn branch_create(
        &self,
        name: &str,
        at: Option<&str>,
    ) -> Result<ObjectHash, WitError> {
        let _lock = self.lock()?;
        with_journal(self, "branch_create", &[name.to_string()], None, || {
            refs::validate_ref_name(name)?;
            if refs::read_branch(self, name)?.is_some() {
                return Err(WitError::InvalidRef(format!(
                    "branch `{name}` already exists"
                )));
            }
            let target = match at {
                Some(rev) => refs::resolve_commit(self, rev)?,
                None => refs::head_commit(self)?
                    .ok_or_else(|| WitError::NotFound("HEAD (no commits yet)".to_string()))?,
            };
            refs::write_branch(self, name, &target)?;
            Ok(target)
        })
    }

    /// Delete a branch. The checked-out branch is refused.
    pub fn branch_delete(&self, name: &str) -> Result<(), WitError> {
        let _lock = self.lock()?;
        with_journal(self, "branch_delete", &[name.to_string()], None, || {
            refs::delete_branch(self, name)
        })
    }

    /// Sorted branch names, nested paths included.
    pub fn branch_list(&self) -> Result<Vec<String>, WitError> {
        refs::list_branches(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashKind;
    use std::fs;

    fn repo_with_commit() -> (tempfile::TempDir, Repo, ObjectHash) {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = Repo::init(dir.path(), HashKind::Sha256).unwrap();
        fs::write(repo.workdir().join("a.txt"), "a").unwrap();
        repo.add("a.txt").unwrap();
        let id = repo
            .commit("first", Some(("t".to_string(), "t@e".to_string())))
            .unwrap();
        (dir, repo, id)
    }

    /// Create, list, delete round-trip; duplicates are refused.
    #[test]
    fn test_branch_lifecycle() {
        let (_dir, repo, tip) = repo_with_commit();
        let at = repo.branch_create("feature/x", None).unwrap();
        assert_eq!(at, tip);
        assert_eq!(
            repo.branch_list().unwrap(),
            vec!["feature/x".to_string(), "main".to_string()]
        );
        assert!(matches!(
            repo.branch_create("feature/x", None),
            Err(WitError::InvalidRef(_))
        ));

        repo.branch_delete("feature/x").unwrap();
        assert_eq!(repo.branch_list().unwrap(), vec!["main".to_string()]);
    }

    /// A branch can start at any resolvable revision.
    #[test]
    fn test_branch_at_revision() {
        let (_dir, repo, first) = repo_with_commit();
        fs::write(repo.workdir().join("a.txt"), "b").unwrap();
        repo.add("a.txt").unwrap();
        repo.commit("second", Some(("t".to_string(), "t@e".to_string())))
            .unwrap();

        let at = repo.branch_create("from-root", Some("HEAD~1")).unwrap();
        assert_eq!(at, first);
    }
}
