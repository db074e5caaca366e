//! Object model definitions for blobs, trees, commits and tags, and the
//! trait that lets the store and zlib layers create strongly typed values
//! from raw bytes.

pub mod blob;
pub mod commit;
pub mod signature;
pub mod tag;
pub mod tree;
pub mod types;

use std::{
    fmt::Display,
    io::{BufRead, Read},
};

use crate::{
    errors::WitError,
    hash::{HashKind, ObjectHash},
    internal::{
        object::{blob::Blob, commit::Commit, tag::Tag, tree::Tree, types::ObjectType},
        zlib::stream::inflate::ReadBoxed,
    },
};

/// **The Object Trait**
/// Defines the common interface for all object types: blobs, trees, commits
/// and tags.
pub trait ObjectTrait: Send + Sync + Display {
    /// Creates a new object from a byte slice.
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, WitError>
    where
        Self: Sized;

    /// Generate a new object from an inflating reader. The size is only used
    /// to pre-allocate the body buffer; the id comes from the digest the
    /// reader accumulated over header and body.
    fn from_buf_read<R: BufRead>(read: &mut ReadBoxed<R>, size: usize) -> Result<Self, WitError>
    where
        Self: Sized,
    {
        let mut content: Vec<u8> = Vec::with_capacity(size);
        read.read_to_end(&mut content)?;
        let kind = read.hash.kind();
        let digest = read.hash.clone().finalize();
        let hash = ObjectHash::from_bytes(kind, &digest)
            .map_err(WitError::MalformedObject)?;
        Self::from_bytes(&content, hash)
    }

    /// Returns the type of the object.
    fn get_type(&self) -> ObjectType;

    fn get_size(&self) -> usize;

    fn to_data(&self) -> Result<Vec<u8>, WitError>;

    /// Computes the object hash from serialized data under the given kind.
    fn object_hash(&self, kind: HashKind) -> Result<ObjectHash, WitError> {
        let data = self.to_data()?;
        Ok(ObjectHash::from_type_and_data(kind, self.get_type(), &data))
    }
}

/// Tagged union produced at the decoder boundary. Consumers match on the
/// variant instead of downcasting.
#[derive(Debug, Clone)]
pub enum Object {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
    Tag(Tag),
}

impl Object {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Object::Blob(_) => ObjectType::Blob,
            Object::Tree(_) => ObjectType::Tree,
            Object::Commit(_) => ObjectType::Commit,
            Object::Tag(_) => ObjectType::Tag,
        }
    }

    pub fn id(&self) -> ObjectHash {
        match self {
            Object::Blob(b) => b.id,
            Object::Tree(t) => t.id,
            Object::Commit(c) => c.id,
            Object::Tag(t) => t.id,
        }
    }

    pub fn to_data(&self) -> Result<Vec<u8>, WitError> {
        match self {
            Object::Blob(b) => b.to_data(),
            Object::Tree(t) => t.to_data(),
            Object::Commit(c) => c.to_data(),
            Object::Tag(t) => t.to_data(),
        }
    }

    /// Decode a body of the given type into the matching variant.
    pub fn from_body(
        object_type: ObjectType,
        body: &[u8],
        hash: ObjectHash,
    ) -> Result<Object, WitError> {
        Ok(match object_type {
            ObjectType::Blob => Object::Blob(Blob::from_bytes(body, hash)?),
            ObjectType::Tree => Object::Tree(Tree::from_bytes(body, hash)?),
            ObjectType::Commit => Object::Commit(Commit::from_bytes(body, hash)?),
            ObjectType::Tag => Object::Tag(Tag::from_bytes(body, hash)?),
        })
    }

    /// The commit inside, or `MalformedObject` naming the actual type.
    pub fn into_commit(self) -> Result<Commit, WitError> {
        match self {
            Object::Commit(c) => Ok(c),
            other => Err(WitError::MalformedObject(format!(
                "expected commit, found {}",
                other.object_type()
            ))),
        }
    }

    /// The tree inside, or `MalformedObject` naming the actual type.
    pub fn into_tree(self) -> Result<Tree, WitError> {
        match self {
            Object::Tree(t) => Ok(t),
            other => Err(WitError::MalformedObject(format!(
                "expected tree, found {}",
                other.object_type()
            ))),
        }
    }

    /// The blob inside, or `MalformedObject` naming the actual type.
    pub fn into_blob(self) -> Result<Blob, WitError> {
        match self {
            Object::Blob(b) => Ok(b),
            other => Err(WitError::MalformedObject(format!(
                "expected blob, found {}",
                other.object_type()
            ))),
        }
    }
}
