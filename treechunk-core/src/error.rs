//! Error type for the chunk codec.
use thiserror::Error;

/// Everything that can go wrong decoding a chunk, per the format's single
/// integrity check (the outer hash) and its handful of structural checks.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("short header: expected 38 bytes")]
    ShortHeader,
    #[error("bad magic: not a treechunk chunk, or wrong key")]
    BadMagic,
    #[error("unsupported chunk version")]
    BadVersion,
    #[error("invalid compression flag")]
    BadFlag,
    #[error("chunk hash mismatch")]
    BadHash,
    #[error("ciphertext length is not a multiple of the block size")]
    BadSize,
    #[error("ciphertext shorter than its declared content length")]
    BadLen,
    #[error("unsupported block size")]
    BadBlockSize,
    #[error("zlib decompression failed: {0}")]
    Decompress(String),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;
