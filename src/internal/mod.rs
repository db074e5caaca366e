//! Internal building blocks (object model, zlib codec, loose store, chunker,
//! staging index) that power the public repository operations.

pub mod chunk;
pub mod index;
pub mod object;
pub mod store;
pub mod zlib;
