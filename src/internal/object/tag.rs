//! The annotated Tag object: a named, signed pointer at another object.
//! Lightweight tags are plain ref files and never reach this module.

use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;

use crate::errors::WitError;
use crate::hash::{HashKind, ObjectHash};
use crate::internal::object::ObjectTrait;
use crate::internal::object::signature::Signature;
use crate::internal::object::types::ObjectType;

/// An annotated tag: target id and type, tag name, tagger, message.
#[derive(Eq, Debug, Clone)]
pub struct Tag {
    pub id: ObjectHash,
    pub object_hash: ObjectHash,
    pub object_type: ObjectType,
    pub tag_name: String,
    pub tagger: Signature,
    pub message: String,
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "object {}", self.object_hash)?;
        writeln!(f, "type {}", self.object_type)?;
        writeln!(f, "tag {}", self.tag_name)?;
        writeln!(f, "tagger {}", self.tagger)?;
        writeln!(f, "{}", self.message)
    }
}

impl Tag {
    /// Build an annotated tag and compute its id.
    pub fn new(
        kind: HashKind,
        object_hash: ObjectHash,
        object_type: ObjectType,
        tag_name: String,
        tagger: Signature,
        message: &str,
    ) -> Result<Tag, WitError> {
        let mut tag = Tag {
            id: ObjectHash::zero(kind),
            object_hash,
            object_type,
            tag_name,
            tagger,
            message: message.to_string(),
        };
        tag.id = ObjectHash::from_type_and_data(kind, ObjectType::Tag, &tag.to_data()?);
        Ok(tag)
    }
}

impl ObjectTrait for Tag {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, WitError> {
        let malformed = |what: &str| WitError::MalformedObject(format!("tag: {what}"));

        let mut rest = data;
        let mut header = |prefix: &[u8]| -> Result<String, WitError> {
            if !rest.starts_with(prefix) {
                return Err(malformed(&format!(
                    "missing `{}` header",
                    String::from_utf8_lossy(prefix)
                )));
            }
            let end = rest
                .find_byte(0x0a)
                .ok_or_else(|| malformed("unterminated header"))?;
            let value = rest[prefix.len()..end].to_str_lossy().into_owned();
            rest = &rest[end + 1..];
            Ok(value)
        };

        let object_hash = ObjectHash::from_str(&header(b"object ")?)
            .map_err(|_| malformed("invalid target id"))?;
        let object_type = ObjectType::from_string(&header(b"type ")?)?;
        let tag_name = header(b"tag ")?;
        let tagger_line = header(b"tagger ")?;
        let mut tagger_bytes = b"tagger ".to_vec();
        tagger_bytes.extend_from_slice(tagger_line.as_bytes());
        let tagger = Signature::from_data(tagger_bytes)?;

        // Skip the separating blank line if present; the rest is the message.
        let message = rest
            .strip_prefix(b"\n")
            .unwrap_or(rest)
            .to_str_lossy()
            .into_owned();

        Ok(Tag {
            id: hash,
            object_hash,
            object_type,
            tag_name,
            tagger,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tag
    }

    fn get_size(&self) -> usize {
        0
    }

    fn to_data(&self) -> Result<Vec<u8>, WitError> {
        let mut data = Vec::new();

        data.extend(b"object ");
        data.extend(self.object_hash.to_string().as_bytes());
        data.extend(&[0x0a]);

        data.extend(b"type ");
        data.extend(self.object_type.to_bytes());
        data.extend(&[0x0a]);

        data.extend(b"tag ");
        data.extend(self.tag_name.as_bytes());
        data.extend(&[0x0a]);

        data.extend(self.tagger.to_data()?);
        data.extend(&[0x0a, 0x0a]);
        data.extend(self.message.as_bytes());

        Ok(data)
    }
}
