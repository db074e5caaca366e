//! Object type enumeration shared by the store, codec and migration layers.

use std::fmt::Display;

use crate::errors::WitError;

/// The four storable object kinds.
///
/// * `Blob`: stores the content of a file (or a chunk manifest).
/// * `Tree`: represents a directory snapshot.
/// * `Commit`: a snapshot root with parents, author, committer and message.
/// * `Tag`: an annotated tag pointing at another object.
///
/// The on-disk type tokens (`blob`, `tree`, `commit`, `tag`) are identical
/// to Git's, so loose objects stay interoperable at the byte level.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum ObjectType {
    Commit,
    Tree,
    Blob,
    Tag,
}

const COMMIT_OBJECT_TYPE: &[u8] = b"commit";
const TREE_OBJECT_TYPE: &[u8] = b"tree";
const BLOB_OBJECT_TYPE: &[u8] = b"blob";
const TAG_OBJECT_TYPE: &[u8] = b"tag";

impl Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ObjectType::Blob => write!(f, "blob"),
            ObjectType::Tree => write!(f, "tree"),
            ObjectType::Commit => write!(f, "commit"),
            ObjectType::Tag => write!(f, "tag"),
        }
    }
}

impl ObjectType {
    /// The ASCII token written into the loose-object header.
    pub fn to_bytes(self) -> &'static [u8] {
        match self {
            ObjectType::Commit => COMMIT_OBJECT_TYPE,
            ObjectType::Tree => TREE_OBJECT_TYPE,
            ObjectType::Blob => BLOB_OBJECT_TYPE,
            ObjectType::Tag => TAG_OBJECT_TYPE,
        }
    }

    /// Parses a string representation of an object type.
    pub fn from_string(s: &str) -> Result<ObjectType, WitError> {
        match s {
            "blob" => Ok(ObjectType::Blob),
            "tree" => Ok(ObjectType::Tree),
            "commit" => Ok(ObjectType::Commit),
            "tag" => Ok(ObjectType::Tag),
            _ => Err(WitError::MalformedObject(format!(
                "`{s}` is not a valid object type"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Type tokens round-trip through bytes and strings.
    #[test]
    fn test_type_tokens() {
        assert_eq!(ObjectType::Blob.to_bytes(), b"blob");
        assert_eq!(ObjectType::Tree.to_bytes(), b"tree");
        assert_eq!(ObjectType::Commit.to_bytes(), b"commit");
        assert_eq!(ObjectType::Tag.to_bytes(), b"tag");

        assert_eq!(ObjectType::from_string("blob").unwrap(), ObjectType::Blob);
        assert_eq!(ObjectType::from_string("tree").unwrap(), ObjectType::Tree);
        assert_eq!(
            ObjectType::from_string("commit").unwrap(),
            ObjectType::Commit
        );
        assert_eq!(ObjectType::from_string("tag").unwrap(), ObjectType::Tag);
        assert!(ObjectType::from_string("snapshot").is_err());
    }
}
