//! Shared I/O utilities: a streaming hash writer supporting both SHA-1 and
//! SHA-256, a byte-counting reader, and small read helpers.

use std::{
    io,
    io::{BufRead, Read},
};

use sha1::{Digest, Sha1};

use crate::hash::{HashKind, ObjectHash};

pub fn read_bytes(file: &mut impl Read, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0; len];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_hash(kind: HashKind, file: &mut impl Read) -> io::Result<ObjectHash> {
    ObjectHash::from_stream(kind, file)
}

/// A lightweight wrapper that counts bytes read from the underlying reader.
pub struct CountingReader<R> {
    pub inner: R,
    pub bytes_read: u64,
}

impl<R> CountingReader<R> {
    /// Creates a new `CountingReader` wrapping the given reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            bytes_read: 0,
        }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes_read += n as u64;
        Ok(n)
    }
}

impl<R: BufRead> BufRead for CountingReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.bytes_read += amt as u64;
        self.inner.consume(amt);
    }
}

/// A hash accumulator over either SHA-1 or SHA-256, for stream hashing where
/// the body never fits in one allocation. Implements `std::io::Write` so it
/// can sit behind `io::copy`.
#[derive(Clone)]
pub enum HashWriter {
    Sha1(Sha1),
    Sha256(sha2::Sha256),
}

impl HashWriter {
    pub fn new(kind: HashKind) -> Self {
        match kind {
            HashKind::Sha1 => HashWriter::Sha1(Sha1::new()),
            HashKind::Sha256 => HashWriter::Sha256(sha2::Sha256::new()),
        }
    }

    /// Start a writer pre-seeded with the object header `<type> <len>\0`.
    pub fn for_object(kind: HashKind, type_bytes: &[u8], size: usize) -> Self {
        let mut w = Self::new(kind);
        w.update(type_bytes);
        w.update(b" ");
        w.update(size.to_string().as_bytes());
        w.update(b"\0");
        w
    }

    pub fn kind(&self) -> HashKind {
        match self {
            HashWriter::Sha1(_) => HashKind::Sha1,
            HashWriter::Sha256(_) => HashKind::Sha256,
        }
    }

    /// Update the hash state with data.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            HashWriter::Sha1(hasher) => hasher.update(data),
            HashWriter::Sha256(hasher) => hasher.update(data),
        }
    }

    /// Finalize and return the raw digest bytes.
    pub fn finalize(self) -> Vec<u8> {
        match self {
            HashWriter::Sha1(hasher) => hasher.finalize().to_vec(),
            HashWriter::Sha256(hasher) => hasher.finalize().to_vec(),
        }
    }

    /// Finalize into a typed `ObjectHash`.
    pub fn finalize_hash(self) -> ObjectHash {
        match self {
            HashWriter::Sha1(hasher) => {
                let mut bytes = [0u8; 20];
                bytes.copy_from_slice(hasher.finalize().as_ref());
                ObjectHash::Sha1(bytes)
            }
            HashWriter::Sha256(hasher) => {
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(hasher.finalize().as_ref());
                ObjectHash::Sha256(bytes)
            }
        }
    }
}

impl io::Write for HashWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Incremental updates must equal one-shot hashing.
    #[test]
    fn test_hash_writer_incremental() {
        let mut w = HashWriter::new(HashKind::Sha256);
        w.update(b"Hello, ");
        w.update(b"world!");
        assert_eq!(
            w.finalize_hash(),
            ObjectHash::new(HashKind::Sha256, b"Hello, world!")
        );
    }

    /// The object-header seeded writer matches `from_type_and_data`.
    #[test]
    fn test_hash_writer_for_object() {
        use crate::internal::object::types::ObjectType;
        let body = b"streamed body";
        let mut w = HashWriter::for_object(HashKind::Sha1, b"blob", body.len());
        w.update(body);
        assert_eq!(
            w.finalize_hash(),
            ObjectHash::from_type_and_data(HashKind::Sha1, ObjectType::Blob, body)
        );
    }

    /// CountingReader tracks consumed bytes across reads.
    #[test]
    fn test_counting_reader() {
        let data = b"0123456789";
        let mut reader = CountingReader::new(std::io::Cursor::new(data));
        let first = read_bytes(&mut reader, 4).unwrap();
        assert_eq!(first, b"0123");
        assert_eq!(reader.bytes_read, 4);
        let rest = read_bytes(&mut reader, 6).unwrap();
        assert_eq!(rest, b"456789");
        assert_eq!(reader.bytes_read, 10);
    }
}
