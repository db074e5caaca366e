//! The Commit object records one version of the project: the root tree, the
//! parent commits, the author and committer signatures, and the message.
//!
//! Each commit contains:
//!
//! - A unique SHA-1/SHA-256 hash that identifies the commit.
//! - The tree id reflecting the complete state of the repository.
//! - Zero parents for a root commit, one for a normal commit, two or more
//!   for a merge.
//! - The author and committer (which may be different people), each with a
//!   timestamp and timezone.
//! - The commit message.

use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;

use crate::errors::WitError;
use crate::hash::{HashKind, ObjectHash};
use crate::internal::object::ObjectTrait;
use crate::internal::object::signature::Signature;
use crate::internal::object::types::ObjectType;

/// The `Commit` struct represents one commit object.
///
/// - `tree_id` points to the top-level tree for this commit.
/// - `parent_commit_ids` chains commits into the history DAG.
/// - `message` may carry a signature block; `subject()` skips past one.
#[derive(Eq, Debug, Clone)]
pub struct Commit {
    pub id: ObjectHash,
    pub tree_id: ObjectHash,
    pub parent_commit_ids: Vec<ObjectHash>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl PartialEq for Commit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "tree: {}", self.tree_id)?;
        for parent in self.parent_commit_ids.iter() {
            writeln!(f, "parent: {parent}")?;
        }
        writeln!(f, "author {}", self.author)?;
        writeln!(f, "committer {}", self.committer)?;
        writeln!(f, "{}", self.message)
    }
}

impl Commit {
    /// Build a commit and compute its id under the given kind. The id is
    /// deterministic in `(tree, parents, author, committer, message)`.
    pub fn new(
        kind: HashKind,
        author: Signature,
        committer: Signature,
        tree_id: ObjectHash,
        parent_commit_ids: Vec<ObjectHash>,
        message: &str,
    ) -> Result<Commit, WitError> {
        let mut commit = Commit {
            id: ObjectHash::zero(kind),
            tree_id,
            parent_commit_ids,
            author,
            committer,
            message: message.to_string(),
        };
        commit.id = ObjectHash::from_type_and_data(kind, ObjectType::Commit, &commit.to_data()?);
        Ok(commit)
    }

    /// First meaningful line of the message.
    ///
    /// If the message contains a PGP signature block, returns the first
    /// non-empty line after it; otherwise the first non-empty line overall.
    pub fn subject(&self) -> String {
        if let Some(pos) = self
            .message
            .lines()
            .position(|line| line.contains("-----END PGP SIGNATURE-----"))
        {
            return self
                .message
                .lines()
                .skip(pos + 1)
                .find(|line| !line.trim().is_empty())
                .map(|line| line.to_owned())
                .unwrap_or_else(|| self.message.clone());
        }

        self.message
            .lines()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.to_owned())
            .unwrap_or_else(|| self.message.clone())
    }
}

impl ObjectTrait for Commit {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, WitError> {
        let malformed = |what: &str| WitError::MalformedObject(format!("commit: {what}"));

        let mut commit = data;
        // First line: `tree <hex>`.
        let tree_end = commit
            .find_byte(0x0a)
            .ok_or_else(|| malformed("missing tree line"))?;
        if !commit.starts_with(b"tree ") {
            return Err(malformed("missing tree header"));
        }
        let tree_hex = commit[5..tree_end]
            .to_str()
            .map_err(|_| malformed("tree id is not utf-8"))?;
        let tree_id =
            ObjectHash::from_str(tree_hex).map_err(|_| malformed("invalid tree id"))?;
        let binding = commit[tree_end + 1..].to_vec();
        commit = &binding;

        // Zero or more `parent <hex>` lines run until the author line.
        let author_begin = commit
            .find("author")
            .ok_or_else(|| malformed("missing author line"))?;
        let parent_commit_ids = commit[..author_begin]
            .find_iter("parent")
            .map(|parent| {
                let parent_end = commit[parent..]
                    .find_byte(0x0a)
                    .ok_or_else(|| malformed("unterminated parent line"))?;
                let hex = commit[parent + 7..parent + parent_end]
                    .to_str()
                    .map_err(|_| malformed("parent id is not utf-8"))?;
                ObjectHash::from_str(hex).map_err(|_| malformed("invalid parent id"))
            })
            .collect::<Result<Vec<ObjectHash>, WitError>>()?;
        let binding = commit[author_begin..].to_vec();
        commit = &binding;

        // Author and committer occupy the next two lines.
        let author_end = commit
            .find_byte(0x0a)
            .ok_or_else(|| malformed("unterminated author line"))?;
        let author = Signature::from_data(commit[..author_end].to_vec())?;
        let binding = commit[author_end + 1..].to_vec();
        commit = &binding;

        let committer_end = commit
            .find_byte(0x0a)
            .ok_or_else(|| malformed("unterminated committer line"))?;
        let committer = Signature::from_data(commit[..committer_end].to_vec())?;

        // The rest (including the separating blank line) is the message.
        let message = commit[committer_end + 1..].to_str_lossy().into_owned();

        Ok(Commit {
            id: hash,
            tree_id,
            parent_commit_ids,
            author,
            committer,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Commit
    }

    fn get_size(&self) -> usize {
        0
    }

    /// [Git-Internals-Git-Objects](https://git-scm.com/book/en/v2/Git-Internals-Git-Objects)
    fn to_data(&self) -> Result<Vec<u8>, WitError> {
        let mut data = Vec::new();

        data.extend(b"tree ");
        data.extend(self.tree_id.to_string().as_bytes());
        data.extend(&[0x0a]);

        for parent_commit_id in &self.parent_commit_ids {
            data.extend(b"parent ");
            data.extend(parent_commit_id.to_string().as_bytes());
            data.extend(&[0x0a]);
        }

        data.extend(self.author.to_data()?);
        data.extend(&[0x0a]);
        data.extend(self.committer.to_data()?);
        data.extend(&[0x0a]);
        data.extend(self.message.as_bytes());

        Ok(data)
    }
}
