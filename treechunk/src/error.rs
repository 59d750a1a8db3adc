//! Error type for the layer-tree writer, reader runtime, and chunk loaders.
use thiserror::Error;

/// Composes [`treechunk_core::CodecError`] with the additional failure
/// modes that only arise once chunks are fetched from a real transport and
/// woven into a tree: an incomplete hash reference, an oversized loader
/// response, and I/O from the chunk store or the network.
#[derive(Error, Debug)]
pub enum TreeError {
    #[error(transparent)]
    Codec(#[from] treechunk_core::CodecError),
    #[error("hash reference truncated: expected 32 bytes")]
    IncompleteHashRef,
    #[error("chunk response of {got} bytes exceeds the {max} byte limit")]
    ResponseTooLarge { got: u64, max: u64 },
    #[error("chunk not found: {0}")]
    ChunkNotFound(String),
    #[error("size_2={got} is too small; minimum supported is {min} (a top layer slot must be able to address any 64-bit offset)")]
    InvalidSize2 { got: u32, min: u32 },
    #[error("block_size must be 4096 or 8192, got {0}")]
    InvalidBlockSize(u32),
    #[error("sparse scan error")]
    Scan(#[from] treechunk_scanner::ScanError),
    #[error("HTTP transport error")]
    Http(#[from] reqwest::Error),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TreeError>;
