/*!
Fetches a chunk's raw encoded bytes by name, from a local directory or
over HTTP. A loader knows nothing about encryption or hashing -- it just
hands back a byte stream for [`crate::reader::Reader`] to decode.
*/
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use treechunk_core::Hash;
use url::Url;

use crate::error::{Result, TreeError};

/// Opens a byte stream for the chunk named `name`. `max_size` is a hint
/// a transport-backed loader can use to reject an oversized response up
/// front, before it reads (and potentially buffers) the whole thing.
pub trait ChunkLoader {
    fn open_stream(&self, name: &Hash, max_size: usize) -> Result<Box<dyn Read>>;
}

/// Reads chunks from hex-named files in a directory, the counterpart to
/// [`crate::writer::LayerTreeWriter`]'s own on-disk naming convention.
pub struct LocalChunkLoader {
    dir: PathBuf,
}

impl LocalChunkLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        LocalChunkLoader { dir: dir.into() }
    }
}

impl ChunkLoader for LocalChunkLoader {
    #[tracing::instrument(skip(self))]
    fn open_stream(&self, name: &Hash, _max_size: usize) -> Result<Box<dyn Read>> {
        let path = self.dir.join(hex::encode(name));
        let file = File::open(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                TreeError::ChunkNotFound(hex::encode(name))
            } else {
                TreeError::Io(err)
            }
        })?;
        Ok(Box::new(file))
    }
}

/// Reads chunks from an HTTP endpoint that serves them at
/// `<base_url>/<hex(name)>`. Uses a blocking client with a short,
/// fixed timeout: this format has no use for a retry policy of its own,
/// and a hung remote store should surface as an error promptly rather
/// than stall the reader indefinitely.
pub struct HttpChunkLoader {
    base_url: Url,
    client: reqwest::blocking::Client,
}

impl HttpChunkLoader {
    pub fn new(base_url: Url) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(HttpChunkLoader { base_url, client })
    }
}

impl ChunkLoader for HttpChunkLoader {
    #[tracing::instrument(skip(self))]
    fn open_stream(&self, name: &Hash, max_size: usize) -> Result<Box<dyn Read>> {
        // A leading slash makes this an absolute-path reference, so `join`
        // replaces the base URL's entire path rather than resolving `name`
        // relative to it -- matching the reference loader's
        // `base_url._replace(path=hex(name))`, which discards whatever
        // path the base URL had.
        let url = self
            .base_url
            .join(&format!("/{}", hex::encode(name)))
            .map_err(|_| TreeError::ChunkNotFound(hex::encode(name)))?;
        let response = self
            .client
            .get(url)
            .header("Accept-Encoding", "identity")
            .header("User-Agent", "treechunk")
            .send()?
            .error_for_status()?;

        if let Some(len) = response.content_length() {
            if len > max_size as u64 {
                return Err(TreeError::ResponseTooLarge {
                    got: len,
                    max: max_size as u64,
                });
            }
        }
        Ok(Box::new(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_loader_reports_missing_chunk_by_name() {
        let loader = LocalChunkLoader::new("/nonexistent/treechunk/dir");
        let err = loader.open_stream(&[7u8; 32], 4096).unwrap_err();
        assert!(matches!(err, TreeError::ChunkNotFound(_)));
    }

    #[test]
    fn local_loader_reads_back_a_persisted_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let name = [3u8; 32];
        std::fs::write(dir.path().join(hex::encode(name)), b"chunk bytes").unwrap();
        let loader = LocalChunkLoader::new(dir.path());
        let mut stream = loader.open_stream(&name, 4096).unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"chunk bytes");
    }
}
