/*!
The reader runtime: opens a repository from its intro hash and serves
random-access reads over the logical byte stream the writer produced,
walking the hash tree top-down from a cached or freshly-loaded chunk at
each layer.
*/
use treechunk_core::chunk::{decode, Hash, ZERO_HASH};
use treechunk_core::intro::Intro;
use treechunk_core::keys::{derive_intro_key, derive_layer_key};
use treechunk_core::Key16;
use treechunk_core::layer::{layer_shape, LayerShape};

use crate::cache::ChunkCache;
use crate::error::{Result, TreeError};
use crate::loader::ChunkLoader;

/// A positioned byte source backing one step of a tree walk: either a
/// loaded chunk's decoded content, or a virtual run of zeros standing in
/// for a [`ZERO_HASH`] reference.
enum ChunkCursor {
    Zero { size: u64, pos: u64 },
    Content { data: Vec<u8>, pos: usize },
}

impl ChunkCursor {
    fn zero(size: u64) -> Self {
        ChunkCursor::Zero { size, pos: 0 }
    }

    fn content(data: Vec<u8>) -> Self {
        ChunkCursor::Content { data, pos: 0 }
    }

    fn seek(&mut self, offset: u64) {
        match self {
            ChunkCursor::Zero { pos, .. } => *pos = offset,
            ChunkCursor::Content { pos, .. } => *pos = offset as usize,
        }
    }

    fn read(&mut self, max: usize) -> Vec<u8> {
        match self {
            ChunkCursor::Zero { size, pos } => {
                let remaining = size.saturating_sub(*pos);
                let n = (max as u64).min(remaining) as usize;
                *pos += n as u64;
                vec![0u8; n]
            }
            ChunkCursor::Content { data, pos } => {
                let n = max.min(data.len().saturating_sub(*pos));
                let out = data[*pos..*pos + n].to_vec();
                *pos += n;
                out
            }
        }
    }

    fn read_hash(&mut self) -> Result<Hash> {
        let bytes = self.read(32);
        if bytes.len() != 32 {
            return Err(TreeError::IncompleteHashRef);
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        Ok(hash)
    }
}

/// Opens a repository by intro hash and serves reads over its logical
/// byte stream. Not `Sync`: the cache is mutated on every read.
pub struct Reader<L: ChunkLoader, C: ChunkCache> {
    loader: L,
    cache: C,
    layer_key: Key16,
    total_size: u64,
    num_layers: u32,
    layer_shape: Vec<LayerShape>,
    max_chunk_size: usize,
    top_chunk_hash: Hash,
}

impl<L: ChunkLoader, C: ChunkCache> Reader<L, C> {
    /// Fetches and decodes the intro chunk named `intro_hash`, deriving
    /// the repository's layer key from the key material it carries, and
    /// returns a reader positioned to serve reads over the whole stream.
    #[tracing::instrument(skip(loader, cache, unlock_key))]
    pub fn open(intro_hash: &Hash, unlock_key: &[u8; 16], loader: L, cache: C) -> Result<Self> {
        let intro_key = derive_intro_key(unlock_key);
        // The reference reader hardcodes 256 bytes here, comfortably
        // above the 88-byte intro payload, before it knows size_2.
        let intro_max_size = 256;
        let stream = loader.open_stream(intro_hash, intro_max_size)?;
        let payload = decode(stream, intro_hash, intro_key.as_bytes(), intro_max_size)?;
        let intro = Intro::decode(&payload)?;

        let layer_key = derive_layer_key(&intro.repo_key);
        let max_chunk_size = (1usize << intro.size_2) + 256;
        let layer_shape = layer_shape(intro.size_2, intro.num_layers.max(1) as usize);

        Ok(Reader {
            loader,
            cache,
            layer_key,
            total_size: intro.total_size,
            num_layers: intro.num_layers,
            layer_shape,
            max_chunk_size,
            top_chunk_hash: intro.top_chunk_hash,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn num_layers(&self) -> u32 {
        self.num_layers
    }

    fn load_chunk(&mut self, name: &Hash) -> Result<Vec<u8>> {
        if let Some(cached) = self.cache.get(name) {
            return Ok(cached);
        }
        let stream = self.loader.open_stream(name, self.max_chunk_size)?;
        let content = decode(stream, name, self.layer_key.as_bytes(), self.max_chunk_size)?;
        self.cache.set(*name, content.clone());
        Ok(content)
    }

    /// Walks from the top chunk down to the layer-0 chunk (or virtual
    /// zero run) covering `offset`, returning a cursor already seeked to
    /// the right position within it.
    fn chunk_stream_at(&mut self, offset: u64) -> Result<ChunkCursor> {
        if self.top_chunk_hash == ZERO_HASH {
            let mut cursor = ChunkCursor::zero(self.total_size);
            cursor.seek(offset);
            return Ok(cursor);
        }

        let mut hash = self.top_chunk_hash;
        let mut cursor = None;
        for layer in (0..self.num_layers as usize).rev() {
            let shape = self.layer_shape[layer];
            let mut next = if hash == ZERO_HASH {
                // The zero region's length is what the *parent* entry
                // covers, not what an entry at this layer covers -- a
                // ZERO_HASH found while descending into layer `layer`
                // stands in for the whole child chunk `layer+1`'s entry
                // pointed here, which spans `layer_shape[layer+1]`'s cover.
                ChunkCursor::zero(self.layer_shape[layer + 1].entry_cover_size())
            } else {
                ChunkCursor::content(self.load_chunk(&hash)?)
            };
            next.seek(shape.entry_offset(offset));
            if layer == 0 {
                cursor = Some(next);
                break;
            }
            hash = next.read_hash()?;
            cursor = Some(next);
        }
        cursor.ok_or(TreeError::IncompleteHashRef)
    }

    /// Reads up to `size` bytes starting at `offset`, stopping early if
    /// that would run past the end of the stream.
    #[tracing::instrument(skip(self))]
    pub fn read_at(&mut self, offset: u64, size: u64) -> Result<Vec<u8>> {
        if offset >= self.total_size {
            return Ok(Vec::new());
        }
        let mut remaining = size.min(self.total_size - offset);
        let mut offset = offset;
        let mut out = Vec::with_capacity(remaining as usize);
        while remaining > 0 {
            let mut cursor = self.chunk_stream_at(offset)?;
            let read = cursor.read(remaining as usize);
            if read.is_empty() {
                break;
            }
            offset += read.len() as u64;
            remaining -= read.len() as u64;
            out.extend_from_slice(&read);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ChunkCacheNone;
    use crate::writer::{ChunkSink, LayerTreeWriter};
    use std::collections::HashMap;
    use std::io::Read;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MemStore(Arc<Mutex<HashMap<Hash, Vec<u8>>>>);

    impl ChunkSink for MemStore {
        fn persist(&mut self, name: &Hash, bytes: &[u8]) -> std::io::Result<()> {
            self.0.lock().unwrap().insert(*name, bytes.to_vec());
            Ok(())
        }
    }

    struct MemLoader(MemStore);

    impl ChunkLoader for MemLoader {
        fn open_stream(&self, name: &Hash, _max_size: usize) -> Result<Box<dyn Read>> {
            let bytes = self
                .0
                .0
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| TreeError::ChunkNotFound(hex::encode(name)))?;
            Ok(Box::new(std::io::Cursor::new(bytes)))
        }
    }

    const UNLOCK: [u8; 16] = [b'U'; 16];
    const REPO_RAW: &[u8] = b"repo secret material, any length";

    #[test]
    fn round_trips_a_small_write() {
        let store = MemStore::default();
        let mut writer = LayerTreeWriter::new(store.clone(), 12, REPO_RAW, &UNLOCK, true).unwrap();
        writer.write(b"hello, sparse world").unwrap();
        let intro_hash = writer.wrap_up(4096).unwrap();

        let mut reader = Reader::open(&intro_hash, &UNLOCK, MemLoader(store), ChunkCacheNone).unwrap();
        assert_eq!(reader.total_size(), 4096);
        let out = reader.read_at(0, 20).unwrap();
        assert_eq!(out, b"hello, sparse world");
    }

    #[test]
    fn reads_past_end_of_stream_are_truncated() {
        let store = MemStore::default();
        let mut writer = LayerTreeWriter::new(store.clone(), 12, REPO_RAW, &UNLOCK, true).unwrap();
        writer.write(b"abc").unwrap();
        let intro_hash = writer.wrap_up(4096).unwrap();

        let mut reader = Reader::open(&intro_hash, &UNLOCK, MemLoader(store), ChunkCacheNone).unwrap();
        let out = reader.read_at(4090, 100).unwrap();
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn reads_over_a_zero_run_return_zero_bytes() {
        let store = MemStore::default();
        let mut writer = LayerTreeWriter::new(store.clone(), 12, REPO_RAW, &UNLOCK, true).unwrap();
        writer.write_zeros(4096 * 200).unwrap();
        writer.write(b"tail").unwrap();
        let intro_hash = writer.wrap_up(4096).unwrap();

        let mut reader = Reader::open(&intro_hash, &UNLOCK, MemLoader(store), ChunkCacheNone).unwrap();
        let zeros = reader.read_at(4096 * 50, 4096).unwrap();
        assert_eq!(zeros, vec![0u8; 4096]);
        let tail = reader.read_at(4096 * 200, 4).unwrap();
        assert_eq!(tail, b"tail");
    }
}
