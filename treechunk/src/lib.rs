/*!
Writer and reader for the tree-chunked encrypted sparse-file archive
format: accepts a byte stream (or a sparse file, via
[`sparse::write_sparse_source`]) and turns it into a deduplicated,
encrypted hash tree addressed by a single intro hash, then serves
random-access reads back over that tree.

Built on [`treechunk_core`] for the chunk format and key schedule, and
[`treechunk_scanner`] for sparse-file I/O.
*/

#![warn(clippy::all)]
#![allow(clippy::must_use_candidate)]

pub mod cache;
pub mod error;
pub mod loader;
pub mod reader;
pub mod sparse;
pub mod writer;

pub use cache::{ChunkCache, ChunkCacheMemory, ChunkCacheNone};
pub use error::{Result, TreeError};
pub use loader::{ChunkLoader, HttpChunkLoader, LocalChunkLoader};
pub use reader::Reader;
pub use sparse::write_sparse_source;
pub use writer::{ChunkSink, LayerTreeWriter};
