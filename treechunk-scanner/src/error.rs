//! Error type for the sparse-file scanner.
use thiserror::Error;

/// Everything that can go wrong opening or walking a file's data/hole
/// sections. `SEEK_DATA`/`SEEK_HOLE` failures that aren't the recognised
/// "no further transition" (`ENXIO`) case surface here as plain I/O errors.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
