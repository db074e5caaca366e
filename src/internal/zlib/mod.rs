//! Zlib codec for loose objects: streaming inflate with digest tracking.

pub mod stream;
