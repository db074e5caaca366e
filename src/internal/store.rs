//! Loose object storage: zlib-deflated `<type> <len>\0<body>` files fanned
//! out under `objects/<aa>/<rest>`.
//!
//! Objects are immutable. Writes stream through a temp file in the objects
//! directory and become visible by rename, so readers never observe a
//! partially written object. Storing an id that already exists is a no-op.

use std::{
    fs::{self, File},
    io::{self, BufReader, Read, Write},
    path::{Path, PathBuf},
};

use flate2::{Compression, bufread::ZlibDecoder, write::ZlibEncoder};
use tracing::debug;

use crate::{
    errors::WitError,
    hash::{HashKind, ObjectHash},
    internal::object::{Object, types::ObjectType},
    utils::HashWriter,
};

/// Prefix for in-flight temp files, skipped by iteration and swept by GC.
pub const TMP_PREFIX: &str = "tmp_obj_";

/// Handle over one repository's object directory, bound to its hash kind.
pub struct Store {
    root: PathBuf,
    kind: HashKind,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>, kind: HashKind) -> Store {
        Store {
            root: root.into(),
            kind,
        }
    }

    pub fn kind(&self) -> HashKind {
        self.kind
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `objects/<first two hex chars>/<rest>`.
    pub fn object_path(&self, id: &ObjectHash) -> PathBuf {
        let hex = id.to_string();
        self.root.join(&hex[..2]).join(&hex[2..])
    }

    pub fn exists(&self, id: &ObjectHash) -> bool {
        self.object_path(id).is_file()
    }

    /// Store a framed object given its full body in memory.
    pub fn put_raw(&self, object_type: ObjectType, body: &[u8]) -> Result<ObjectHash, WitError> {
        self.put_stream(object_type, body.len() as u64, &mut io::Cursor::new(body))
    }

    /// Store a typed object.
    pub fn put(&self, object: &Object) -> Result<ObjectHash, WitError> {
        let body = object.to_data()?;
        self.put_raw(object.object_type(), &body)
    }

    /// Store an object whose body streams from a reader. The body is hashed
    /// and compressed in one pass into a temp file, which is then renamed to
    /// its content address. Never buffers the body in memory.
    pub fn put_stream(
        &self,
        object_type: ObjectType,
        size: u64,
        body: &mut impl Read,
    ) -> Result<ObjectHash, WitError> {
        fs::create_dir_all(&self.root)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(TMP_PREFIX)
            .tempfile_in(&self.root)?;

        let mut hasher =
            HashWriter::for_object(self.kind, object_type.to_bytes(), size as usize);
        let mut encoder = ZlibEncoder::new(tmp.as_file_mut(), Compression::default());
        encoder.write_all(object_type.to_bytes())?;
        encoder.write_all(b" ")?;
        encoder.write_all(size.to_string().as_bytes())?;
        encoder.write_all(b"\0")?;

        let mut buf = [0u8; 64 * 1024];
        let mut written: u64 = 0;
        loop {
            let n = body.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            encoder.write_all(&buf[..n])?;
            written += n as u64;
        }
        encoder.finish()?;

        if written != size {
            return Err(WitError::MalformedObject(format!(
                "declared size {size} but streamed {written} bytes"
            )));
        }

        let id = hasher.finalize_hash();
        let path = self.object_path(&id);
        if path.is_file() {
            // Content-addressed: an existing file already holds these bytes.
            return Ok(id);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        tmp.persist(&path).map_err(|e| WitError::IOError(e.error))?;
        debug!(target: "wit::store", %id, ?object_type, size, "object written");
        Ok(id)
    }

    /// Open an object for streaming: returns its type, declared body size,
    /// and a reader over the inflated body bytes.
    pub fn open(
        &self,
        id: &ObjectHash,
    ) -> Result<(ObjectType, u64, impl Read + use<>), WitError> {
        let path = self.object_path(id);
        let file = File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                WitError::object_not_found(id)
            } else {
                WitError::IOError(e)
            }
        })?;
        let mut decoder = ZlibDecoder::new(BufReader::new(file));
        let (object_type, size) = read_loose_header(&mut decoder)?;
        Ok((object_type, size, decoder.take(size)))
    }

    /// Read the whole object into memory and check the declared length.
    pub fn get_raw(&self, id: &ObjectHash) -> Result<(ObjectType, Vec<u8>), WitError> {
        let (object_type, size, mut reader) = self.open(id)?;
        let mut body = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut body)?;
        if body.len() as u64 != size {
            return Err(WitError::MalformedObject(format!(
                "object `{id}` declares {size} bytes but holds {}",
                body.len()
            )));
        }
        Ok((object_type, body))
    }

    /// Decode into the tagged object union.
    pub fn get(&self, id: &ObjectHash) -> Result<Object, WitError> {
        let (object_type, body) = self.get_raw(id)?;
        Object::from_body(object_type, &body, *id)
    }

    /// Decode and recompute the id over the stored bytes, failing with
    /// `HashMismatch` when the content does not match its address.
    pub fn get_verified(&self, id: &ObjectHash) -> Result<Object, WitError> {
        let (object_type, body) = self.get_raw(id)?;
        let computed = ObjectHash::from_type_and_data(self.kind, object_type, &body);
        if computed != *id {
            return Err(WitError::HashMismatch {
                id: id.to_string(),
                computed: computed.to_string(),
            });
        }
        Object::from_body(object_type, &body, *id)
    }

    /// Recompute an object's digest by streaming, without buffering the
    /// body. Used by `gc --verify` where blobs may be huge.
    pub fn verify(&self, id: &ObjectHash) -> Result<(), WitError> {
        let (object_type, size, mut reader) = self.open(id)?;
        let mut hasher =
            HashWriter::for_object(self.kind, object_type.to_bytes(), size as usize);
        io::copy(&mut reader, &mut hasher)?;
        let computed = hasher.finalize_hash();
        if computed != *id {
            return Err(WitError::HashMismatch {
                id: id.to_string(),
                computed: computed.to_string(),
            });
        }
        Ok(())
    }

    /// Remove a loose object. GC-only; callers must have proven the object
    /// unreachable.
    pub fn delete(&self, id: &ObjectHash) -> Result<(), WitError> {
        fs::remove_file(self.object_path(id))?;
        Ok(())
    }

    /// Lazily enumerate every stored id by walking the two-hex fan-out
    /// directories. Entries that do not parse as ids (temp files, strays)
    /// are skipped. The iterator holds no directory handles between steps
    /// beyond the current prefix, so it is restartable and cheap.
    pub fn iterate(&self) -> impl Iterator<Item = ObjectHash> + use<> {
        let kind = self.kind;
        let prefixes: Vec<PathBuf> = match fs::read_dir(&self.root) {
            Ok(entries) => {
                let mut dirs: Vec<PathBuf> = entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| {
                        p.is_dir()
                            && p.file_name()
                                .and_then(|n| n.to_str())
                                .is_some_and(|n| n.len() == 2 && n.chars().all(|c| c.is_ascii_hexdigit()))
                    })
                    .collect();
                dirs.sort();
                dirs
            }
            Err(_) => Vec::new(),
        };

        prefixes.into_iter().flat_map(move |dir| {
            let prefix = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut names: Vec<String> = fs::read_dir(&dir)
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok())
                        .filter_map(|e| e.file_name().to_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default();
            names.sort();
            names
                .into_iter()
                .filter_map(move |name| format!("{prefix}{name}").parse::<ObjectHash>().ok())
                .filter(move |id| id.kind() == kind)
                .collect::<Vec<_>>()
        })
    }
}

/// Parse `<type> <len>\0` off the front of an inflating reader. Shared with
/// the Git migration, which reads the same framing out of foreign object
/// directories.
pub(crate) fn read_loose_header(reader: &mut impl Read) -> Result<(ObjectType, u64), WitError> {
    let mut header = Vec::with_capacity(16);
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte).map_err(|_| {
            WitError::MalformedObject("truncated loose object header".to_string())
        })?;
        if byte[0] == 0 {
            break;
        }
        header.push(byte[0]);
        if header.len() > 32 {
            return Err(WitError::MalformedObject(
                "oversized loose object header".to_string(),
            ));
        }
    }
    let header = String::from_utf8(header)
        .map_err(|_| WitError::MalformedObject("loose header is not utf-8".to_string()))?;
    let (type_token, len_token) = header.split_once(' ').ok_or_else(|| {
        WitError::MalformedObject(format!("loose header `{header}` missing space"))
    })?;
    let object_type = ObjectType::from_string(type_token)?;
    let size = len_token.parse::<u64>().map_err(|_| {
        WitError::MalformedObject(format!("loose header length `{len_token}` invalid"))
    })?;
    Ok((object_type, size))
}
