//! Buffered inflate reader that decodes zlib-compressed object bodies while
//! simultaneously tracking the object digest for integrity verification.

use std::{io, io::BufRead};

use flate2::{Decompress, FlushDecompress, Status};

use crate::{hash::HashKind, internal::object::types::ObjectType, utils::HashWriter};

/// ReadBoxed unzips information from a DEFLATE stream through the [`BufRead`]
/// trait. For a continuous stream of DEFLATE information, the structure does
/// not read more bytes than the stream holds, so trailing data stays intact
/// for subsequent reads.
pub struct ReadBoxed<R> {
    /// The reader from which bytes should be decompressed.
    pub inner: R,
    /// The decompressor doing all the work.
    pub decompressor: Box<Decompress>,
    /// The current digest state for the decompressed data, pre-seeded with
    /// the object header and updated as bytes are read.
    pub hash: HashWriter,
}

impl<R> ReadBoxed<R>
where
    R: BufRead,
{
    /// Build a reader for one object body. The digest accumulates
    /// `<type> <size>\0` followed by every decompressed byte, so finalizing
    /// it after a full read yields the object id.
    pub fn new(inner: R, kind: HashKind, obj_type: ObjectType, size: usize) -> Self {
        ReadBoxed {
            inner,
            hash: HashWriter::for_object(kind, obj_type.to_bytes(), size),
            decompressor: Box::new(Decompress::new(true)),
        }
    }
}

impl<R> io::Read for ReadBoxed<R>
where
    R: BufRead,
{
    fn read(&mut self, into: &mut [u8]) -> io::Result<usize> {
        let o = read(&mut self.inner, &mut self.decompressor, into)?;
        self.hash.update(&into[..o]);
        Ok(o)
    }
}

/// Read bytes from `rd` and decompress them using `state` into a
/// pre-allocated fitting buffer `dst`, returning the amount of bytes written.
fn read(rd: &mut impl BufRead, state: &mut Decompress, mut dst: &mut [u8]) -> io::Result<usize> {
    let mut total_written = 0;
    loop {
        let (written, consumed, ret, eof);
        {
            let input = rd.fill_buf()?;
            eof = input.is_empty();
            let before_out = state.total_out();
            let before_in = state.total_in();
            let flush = if eof {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };
            ret = state.decompress(input, dst, flush);
            written = (state.total_out() - before_out) as usize;
            total_written += written;
            dst = &mut dst[written..];
            consumed = (state.total_in() - before_in) as usize;
        }
        rd.consume(consumed);

        match ret {
            // The stream has officially ended, nothing more to do here.
            Ok(Status::StreamEnd) => return Ok(total_written),
            // Either input or output are depleted even though the stream is not depleted yet.
            Ok(Status::Ok | Status::BufError) if eof || dst.is_empty() => return Ok(total_written),
            // Some progress was made in both the input and the output, it must continue to reach the end.
            Ok(Status::Ok | Status::BufError) if consumed != 0 || written != 0 => continue,
            // A strange state, where zlib makes no progress but isn't done either.
            Ok(Status::Ok | Status::BufError) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "deflate stream stalled without progress",
                ));
            }
            Err(..) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "corrupt deflate stream",
                ));
            }
        }
    }
}
