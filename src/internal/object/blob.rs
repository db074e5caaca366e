//! The Blob object stores file contents as an opaque byte payload. The id is
//! the digest of `blob <len>\0<bytes>`, so identical contents share one
//! object regardless of path or mode.

use std::fmt::Display;

use crate::errors::WitError;
use crate::hash::{HashKind, ObjectHash};
use crate::internal::object::ObjectTrait;
use crate::internal::object::types::ObjectType;

/// File contents as stored. Large files are chunked by the store layer and
/// represented by a manifest blob; consumers reading through the store never
/// observe the difference.
#[derive(Eq, Debug, Clone)]
pub struct Blob {
    pub id: ObjectHash,
    pub data: Vec<u8>,
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Type: Blob")?;
        writeln!(f, "Size: {}", self.data.len())
    }
}

impl Blob {
    /// Hash the content under the given kind and build the blob.
    pub fn from_content_bytes(kind: HashKind, data: Vec<u8>) -> Blob {
        let id = ObjectHash::from_type_and_data(kind, ObjectType::Blob, &data);
        Blob { id, data }
    }
}

impl ObjectTrait for Blob {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, WitError> {
        Ok(Blob {
            id: hash,
            data: data.to_vec(),
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Blob
    }

    fn get_size(&self) -> usize {
        self.data.len()
    }

    fn to_data(&self) -> Result<Vec<u8>, WitError> {
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Blob ids must match `git hash-object` for both algorithms.
    #[test]
    fn test_blob_id_known_values() {
        let blob = Blob::from_content_bytes(HashKind::Sha1, b"hello world\n".to_vec());
        // echo "hello world" | git hash-object --stdin
        assert_eq!(
            blob.id.to_string(),
            "3b18e512dba79e4c8300dd08aeb37f8e728b8dad"
        );

        let blob = Blob::from_content_bytes(HashKind::Sha256, b"hello world\n".to_vec());
        assert_eq!(blob.id.kind(), HashKind::Sha256);
        assert_eq!(blob.id.to_string().len(), 64);
    }

    /// Binary payloads containing NUL survive byte-exact.
    #[test]
    fn test_blob_binary_payload() {
        let payload = vec![0u8, 159, 146, 150, 0, 255];
        let blob = Blob::from_content_bytes(HashKind::Sha256, payload.clone());
        assert_eq!(blob.to_data().unwrap(), payload);
        assert_eq!(
            blob.object_hash(HashKind::Sha256).unwrap(),
            blob.id
        );
    }

    /// Empty blob is representable and addressable.
    #[test]
    fn test_empty_blob() {
        let blob = Blob::from_content_bytes(HashKind::Sha1, Vec::new());
        // git hash-object /dev/null
        assert_eq!(
            blob.id.to_string(),
            "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
        );
    }
}
