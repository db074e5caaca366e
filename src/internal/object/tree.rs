//! The Tree object represents one directory snapshot: an ordered sequence of
//! `(mode, name, child-hash)` entries. On disk each entry is the ASCII mode,
//! a space, the name, a NUL, then the raw hash bytes of the child, and the
//! sequence is sorted the way Git sorts it (directories compare as `name/`).

use std::cmp::Ordering;
use std::fmt::Display;

use bstr::ByteSlice;

use crate::errors::WitError;
use crate::hash::{HashKind, ObjectHash};
use crate::internal::object::ObjectTrait;
use crate::internal::object::types::ObjectType;

/// File mode of one tree entry.
///
/// Only the four modes a snapshot can carry are representable: regular file,
/// executable file, symlink, and subdirectory. Git writes directory modes as
/// `40000` (no leading zero) and that byte form is preserved here.
#[derive(PartialEq, Eq, Hash, Ord, PartialOrd, Debug, Clone, Copy)]
pub enum TreeItemMode {
    Blob,
    BlobExecutable,
    Link,
    Tree,
}

impl Display for TreeItemMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match *self {
            TreeItemMode::Blob => "100644",
            TreeItemMode::BlobExecutable => "100755",
            TreeItemMode::Link => "120000",
            TreeItemMode::Tree => "040000",
        };
        write!(f, "{mode}")
    }
}

impl TreeItemMode {
    /// The ASCII form written into the tree body.
    pub fn to_bytes(self) -> &'static [u8] {
        match self {
            TreeItemMode::Blob => b"100644",
            TreeItemMode::BlobExecutable => b"100755",
            TreeItemMode::Link => b"120000",
            TreeItemMode::Tree => b"40000",
        }
    }

    pub fn tree_item_type_from_bytes(mode: &[u8]) -> Result<TreeItemMode, WitError> {
        Ok(match mode {
            b"40000" | b"040000" => TreeItemMode::Tree,
            b"100644" | b"100664" => TreeItemMode::Blob,
            b"100755" => TreeItemMode::BlobExecutable,
            b"120000" => TreeItemMode::Link,
            _ => {
                return Err(WitError::MalformedObject(format!(
                    "`{}` is not a valid tree item mode",
                    String::from_utf8_lossy(mode)
                )));
            }
        })
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, TreeItemMode::Tree)
    }
}

/// One entry of a tree: mode, child id and name.
#[derive(Eq, PartialEq, Hash, Ord, PartialOrd, Debug, Clone)]
pub struct TreeItem {
    pub mode: TreeItemMode,
    pub id: ObjectHash,
    pub name: String,
}

impl TreeItem {
    pub fn new(mode: TreeItemMode, id: ObjectHash, name: String) -> TreeItem {
        TreeItem { mode, id, name }
    }

    /// Serialize: `<mode> <name>\0<raw hash bytes>`.
    pub fn to_data(&self) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(self.mode.to_bytes());
        data.extend_from_slice(b" ");
        data.extend_from_slice(self.name.as_bytes());
        data.extend_from_slice(b"\0");
        data.extend_from_slice(self.id.as_ref());
        data
    }

    /// The byte sequence Git compares entries by: directories sort as if
    /// their name had a trailing slash.
    fn sort_key(&self) -> Vec<u8> {
        let mut key = self.name.as_bytes().to_vec();
        if self.mode.is_tree() {
            key.push(b'/');
        }
        key
    }
}

/// Git's tree entry order.
pub fn tree_item_cmp(a: &TreeItem, b: &TreeItem) -> Ordering {
    a.sort_key().cmp(&b.sort_key())
}

/// A directory snapshot: the id plus its ordered entries.
#[derive(Eq, Debug, Clone)]
pub struct Tree {
    pub id: ObjectHash,
    pub tree_items: Vec<TreeItem>,
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "Type: Tree: {}", self.id)?;
        for item in &self.tree_items {
            writeln!(f, "{} {} {}", item.mode, item.id, item.name)?;
        }
        Ok(())
    }
}

impl Tree {
    /// Build a tree from entries: sorts them into Git order, rejects
    /// duplicate names, computes the id under the given kind. The empty
    /// entry list is allowed; the empty tree is addressable.
    pub fn from_tree_items(kind: HashKind, mut items: Vec<TreeItem>) -> Result<Tree, WitError> {
        items.sort_by(tree_item_cmp);
        for pair in items.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(WitError::MalformedObject(format!(
                    "duplicate tree entry `{}`",
                    pair[0].name
                )));
            }
        }
        let mut tree = Tree {
            id: ObjectHash::zero(kind),
            tree_items: items,
        };
        tree.id = ObjectHash::from_type_and_data(kind, ObjectType::Tree, &tree.to_data()?);
        Ok(tree)
    }

    /// Look up an entry by name.
    pub fn find(&self, name: &str) -> Option<&TreeItem> {
        self.tree_items.iter().find(|item| item.name == name)
    }
}

impl ObjectTrait for Tree {
    /// Parse a tree body. The child hash width is taken from the kind of the
    /// tree's own id; a repository never mixes hash algorithms. Entry order
    /// and name uniqueness are validated so a malformed tree cannot enter
    /// the in-memory model.
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, WitError> {
        let hash_len = hash.kind().size();
        let mut tree_items = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let mode_end = rest.find_byte(0x20).ok_or_else(|| {
                WitError::MalformedObject("tree entry missing mode separator".to_string())
            })?;
            let mode = TreeItemMode::tree_item_type_from_bytes(&rest[..mode_end])?;
            rest = &rest[mode_end + 1..];

            let name_end = rest.find_byte(0x00).ok_or_else(|| {
                WitError::MalformedObject("tree entry missing name terminator".to_string())
            })?;
            let name = rest[..name_end].to_str_lossy().into_owned();
            rest = &rest[name_end + 1..];

            if rest.len() < hash_len {
                return Err(WitError::MalformedObject(format!(
                    "tree entry `{name}` truncated before hash"
                )));
            }
            let id = ObjectHash::from_bytes(hash.kind(), &rest[..hash_len])
                .map_err(WitError::MalformedObject)?;
            rest = &rest[hash_len..];

            tree_items.push(TreeItem { mode, id, name });
        }

        for pair in tree_items.windows(2) {
            match tree_item_cmp(&pair[0], &pair[1]) {
                Ordering::Less => {}
                Ordering::Equal => {
                    return Err(WitError::MalformedObject(format!(
                        "duplicate tree entry `{}`",
                        pair[1].name
                    )));
                }
                Ordering::Greater => {
                    return Err(WitError::MalformedObject(format!(
                        "tree entries out of order at `{}`",
                        pair[1].name
                    )));
                }
            }
        }

        Ok(Tree {
            id: hash,
            tree_items,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn get_size(&self) -> usize {
        self.tree_items.len()
    }

    fn to_data(&self) -> Result<Vec<u8>, WitError> {
        let mut data = Vec::new();
        for item in &self.tree_items {
            data.extend_from_slice(&item.to_data());
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::object::blob::Blob;

    fn blob_item(kind: HashKind, name: &str, content: &[u8]) -> TreeItem {
        let blob = Blob::from_content_bytes(kind, content.to_vec());
        TreeItem::new(TreeItemMode::Blob, blob.id, name.to_string())
    }

    /// A single-entry tree matches the id Git computes for the same bytes.
    #[test]
    fn test_tree_known_id() {
        // git mktree <<< "100644 blob 3b18e512dba79e4c8300dd08aeb37f8e728b8dad\thello.txt"
        let item = blob_item(HashKind::Sha1, "hello.txt", b"hello world\n");
        let tree = Tree::from_tree_items(HashKind::Sha1, vec![item]).unwrap();
        assert_eq!(
            tree.id.to_string(),
            "68aba62e560c0ebc3396e8ae9335232cd93a3f60"
        );
    }

    /// Entries are sorted with directories ordered as `name/`.
    #[test]
    fn test_tree_directory_sort_order() {
        let kind = HashKind::Sha256;
        let sub = Tree::from_tree_items(kind, vec![]).unwrap();
        let items = vec![
            blob_item(kind, "foo.txt", b"x"),
            TreeItem::new(TreeItemMode::Tree, sub.id, "foo".to_string()),
            blob_item(kind, "foo-bar", b"y"),
        ];
        let tree = Tree::from_tree_items(kind, items).unwrap();
        let names: Vec<&str> = tree.tree_items.iter().map(|i| i.name.as_str()).collect();
        // "foo-bar" < "foo." < "foo/" in byte order
        assert_eq!(names, vec!["foo-bar", "foo.txt", "foo"]);
    }

    /// Round-trip through bytes preserves entries and id.
    #[test]
    fn test_tree_round_trip() {
        let kind = HashKind::Sha256;
        let items = vec![
            blob_item(kind, "a.txt", b"a"),
            blob_item(kind, "b.txt", b"b"),
        ];
        let tree = Tree::from_tree_items(kind, items).unwrap();
        let data = tree.to_data().unwrap();
        let parsed = Tree::from_bytes(&data, tree.id).unwrap();
        assert_eq!(parsed.tree_items, tree.tree_items);
        assert_eq!(parsed.object_hash(kind).unwrap(), tree.id);
    }

    /// Duplicate names are rejected both on build and on parse.
    #[test]
    fn test_tree_duplicate_names() {
        let kind = HashKind::Sha1;
        let items = vec![blob_item(kind, "same", b"1"), blob_item(kind, "same", b"2")];
        assert!(Tree::from_tree_items(kind, items).is_err());
    }

    /// Unsorted bytes on disk are malformed.
    #[test]
    fn test_tree_rejects_unsorted_bytes() {
        let kind = HashKind::Sha1;
        let a = blob_item(kind, "a", b"1");
        let z = blob_item(kind, "z", b"2");
        let mut data = Vec::new();
        data.extend_from_slice(&z.to_data());
        data.extend_from_slice(&a.to_data());
        let fake_id = ObjectHash::from_type_and_data(kind, ObjectType::Tree, &data);
        assert!(Tree::from_bytes(&data, fake_id).is_err());
    }

    /// The empty tree is representable and has Git's well-known SHA-1 id.
    #[test]
    fn test_empty_tree() {
        let tree = Tree::from_tree_items(HashKind::Sha1, vec![]).unwrap();
        assert_eq!(
            tree.id.to_string(),
            "4b825dc642cb6eb9a060e54bf8d69288fbee4904"
        );
    }

    /// Executable and symlink modes survive the byte round-trip.
    #[test]
    fn test_mode_round_trip() {
        let kind = HashKind::Sha256;
        let blob = Blob::from_content_bytes(kind, b"#!/bin/sh\n".to_vec());
        let link = Blob::from_content_bytes(kind, b"target".to_vec());
        let items = vec![
            TreeItem::new(TreeItemMode::BlobExecutable, blob.id, "run.sh".to_string()),
            TreeItem::new(TreeItemMode::Link, link.id, "alias".to_string()),
        ];
        let tree = Tree::from_tree_items(kind, items).unwrap();
        let parsed = Tree::from_bytes(&tree.to_data().unwrap(), tree.id).unwrap();
        assert_eq!(parsed.find("run.sh").unwrap().mode, TreeItemMode::BlobExecutable);
        assert_eq!(parsed.find("alias").unwrap().mode, TreeItemMode::Link);
    }
}
