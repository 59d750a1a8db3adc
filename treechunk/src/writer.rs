/*!
The layer-tree writer: turns a sequential byte stream (plus explicit
"N zero bytes" runs) into chunks for data layer 0 and hash-reference
layers 1..L-1, terminated by an intro chunk.

Sealing a layer chunk follows the rule in the format's own design: if the
sealed chunk's encoded bytes happen to equal the encoding of a
full-capacity all-zero payload, its name is replaced by [`ZERO_HASH`] and
the bytes are never persisted. This collapses a *fully filled* all-zero
subtree to nothing -- it does not, and cannot, collapse a short, partially
filled all-zero tail, since that tail's encoded bytes are a different
length than the all-zero reference payload and never compare equal to it.
See DESIGN.md for why this means a repository built purely from
`write_zeros` calls still typically persists one small non-`ZERO_HASH`
top chunk, rather than the `top_chunk_hash == ZERO_HASH` some of the
format's own prose would suggest.
*/
use treechunk_core::chunk::{encode, Hash, ZERO_HASH};
use treechunk_core::intro::Intro;
use treechunk_core::keys::{derive_intro_key, derive_layer_key, derive_repo_key, Key16};
use treechunk_core::layer::{layer_shape, min_supported_size_2, LayerShape, MAX_LAYER_SLOTS};

use crate::error::{Result, TreeError};

/// Where a writer hands off a sealed chunk's encoded bytes for storage.
/// Deliberately minimal: this format has no opinion on on-disk layout
/// beyond "name it by hash, and let a loader find it again by that name".
pub trait ChunkSink {
    fn persist(&mut self, name: &Hash, bytes: &[u8]) -> std::io::Result<()>;
}

/// A fixed-capacity accumulation buffer for one layer's in-progress chunk.
struct ChunkBuffer {
    max_size: usize,
    buffer: Vec<u8>,
}

impl ChunkBuffer {
    fn new(max_size: usize) -> Self {
        ChunkBuffer {
            max_size,
            buffer: Vec::new(),
        }
    }

    fn free(&self) -> usize {
        self.max_size - self.buffer.len()
    }

    fn is_full(&self) -> bool {
        self.buffer.len() == self.max_size
    }

    fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.free());
        self.buffer.extend_from_slice(&data[..n]);
        n
    }
}

/// Writes a tree-chunked repository: accepts data and zero runs in call
/// order and emits sealed chunks to `sink` as it goes, producing an intro
/// hash on [`wrap_up`](LayerTreeWriter::wrap_up).
///
/// Not safe for concurrent calls into the same instance -- there are no
/// locks, and the tree's shape is a deterministic function of call order.
pub struct LayerTreeWriter<S: ChunkSink> {
    sink: S,
    layers: Vec<ChunkBuffer>,
    total_size: u64,
    size_2: u32,
    max_size: usize,
    layer_key: Key16,
    intro_key: Key16,
    repo_key: Key16,
    compress_data: bool,
    all_zero_chunk_hash: Hash,
    layer_shape: Vec<LayerShape>,
}

impl<S: ChunkSink> LayerTreeWriter<S> {
    /// `size_2` must leave room for the top of [`MAX_LAYER_SLOTS`] layer
    /// slots to address any 64-bit offset (`size_2 >= 9`, see
    /// `treechunk_core::layer::min_supported_size_2`); `compress_data`
    /// governs whether layer chunks attempt zlib compression (the intro
    /// chunk never does).
    #[tracing::instrument(skip(sink, repo_key_raw, unlock_key))]
    pub fn new(sink: S, size_2: u32, repo_key_raw: &[u8], unlock_key: &[u8; 16], compress_data: bool) -> Result<Self> {
        let min_size_2 = min_supported_size_2();
        if size_2 < min_size_2 {
            return Err(TreeError::InvalidSize2 {
                got: size_2,
                min: min_size_2,
            });
        }

        let max_size = 1usize << size_2;
        let repo_key = derive_repo_key(repo_key_raw);
        let intro_key = derive_intro_key(unlock_key);
        let layer_key = derive_layer_key(repo_key.as_bytes());
        let layer_shape = layer_shape(size_2, MAX_LAYER_SLOTS);
        debug_assert!(layer_shape[MAX_LAYER_SLOTS - 1].shift > 64);

        let (all_zero_chunk_hash, _) = encode(&vec![0u8; max_size], layer_key.as_bytes(), compress_data);

        Ok(LayerTreeWriter {
            sink,
            layers: Vec::new(),
            total_size: 0,
            size_2,
            max_size,
            layer_key,
            intro_key,
            repo_key,
            compress_data,
            all_zero_chunk_hash,
            layer_shape,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Appends `data` to the logical stream as literal bytes.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.total_size += data.len() as u64;
        self.write_layer(0, data)
    }

    /// Appends `n` zero bytes, eliding as many full layer-0 chunks (and
    /// their upper-layer coverage) as the current write position allows.
    pub fn write_zeros(&mut self, n: u64) -> Result<()> {
        self.total_size += n;
        let residual = self.write_layer_zeros(0, n)?;
        debug_assert_eq!(residual, 0, "zero elision must fully consume its input at layer 0");
        Ok(())
    }

    fn ensure_layer(&mut self, layer: usize) {
        while self.layers.len() <= layer {
            self.layers.push(ChunkBuffer::new(self.max_size));
        }
    }

    fn write_layer(&mut self, layer: usize, data: &[u8]) -> Result<()> {
        self.ensure_layer(layer);
        let mut offset = 0;
        while offset < data.len() {
            if self.layers[layer].is_full() {
                self.seal_layer(layer, true)?;
            }
            let n = self.layers[layer].write(&data[offset..]);
            offset += n;
        }
        Ok(())
    }

    /// Iterative form of the reference algorithm's `write_layer_zeros`
    /// recursion (bounded by [`MAX_LAYER_SLOTS`] anyway, but an explicit
    /// loop avoids relying on the compiler to elide tail calls it isn't
    /// obliged to elide). Descends layer by layer filling as many whole
    /// entries as fit and fit the request, sealing any layer that fills;
    /// on the way back up, each layer absorbs whatever residual its
    /// parent couldn't place.
    fn write_layer_zeros(&mut self, start_layer: usize, mut zeros: u64) -> Result<u64> {
        let mut touched = Vec::new();
        let mut layer = start_layer;
        loop {
            let shape = self.layer_shape[layer];
            if zeros < shape.entry_cover_size() {
                break;
            }
            self.ensure_layer(layer);
            if zeros > 0 {
                let entries_free = self.layers[layer].free() as u64 / shape.entry_size;
                let entries_needed = zeros / shape.entry_cover_size();
                let fill = entries_free.min(entries_needed);
                if fill > 0 {
                    let bytes = vec![0u8; (fill * shape.entry_size) as usize];
                    self.layers[layer].write(&bytes);
                    zeros -= fill * shape.entry_cover_size();
                }
            }
            if self.layers[layer].is_full() {
                self.seal_layer(layer, true)?;
            }
            touched.push(layer);
            layer += 1;
        }

        while let Some(layer) = touched.pop() {
            if zeros == 0 {
                break;
            }
            let shape = self.layer_shape[layer];
            let entries_free = self.layers[layer].free() as u64 / shape.entry_size;
            let entries_needed = zeros / shape.entry_cover_size();
            debug_assert!(entries_free >= entries_needed);
            let fill = entries_needed;
            if fill > 0 {
                let bytes = vec![0u8; (fill * shape.entry_size) as usize];
                self.layers[layer].write(&bytes);
                zeros -= fill * shape.entry_cover_size();
            }
        }
        Ok(zeros)
    }

    /// Encodes and, unless it collapses to [`ZERO_HASH`], persists the
    /// named layer's buffer, installing a fresh empty buffer in its
    /// place. Returns `None` without persisting anything if the buffer
    /// was never written to -- matching the reference's refusal to
    /// propagate a reference for a layer nothing ever touched.
    fn seal_layer(&mut self, layer: usize, write_upper_ref: bool) -> Result<Option<Hash>> {
        if self.layers[layer].is_empty() {
            return Ok(None);
        }
        let (mut name, bytes) = encode(&self.layers[layer].buffer, self.layer_key.as_bytes(), self.compress_data);
        if name == self.all_zero_chunk_hash {
            name = ZERO_HASH;
        } else {
            self.sink.persist(&name, &bytes)?;
        }
        self.layers[layer] = ChunkBuffer::new(self.max_size);
        if write_upper_ref {
            self.write_layer(layer + 1, &name)?;
        }
        Ok(Some(name))
    }

    /// Pads the stream to the next `block_size` boundary, seals every
    /// open layer bottom-up, builds and persists the intro chunk, and
    /// returns its hash.
    #[tracing::instrument(skip(self))]
    pub fn wrap_up(mut self, block_size: u32) -> Result<Hash> {
        if block_size != 4096 && block_size != 8192 {
            return Err(TreeError::InvalidBlockSize(block_size));
        }
        let rem = self.total_size % u64::from(block_size);
        if rem != 0 {
            let pad = vec![0u8; (u64::from(block_size) - rem) as usize];
            self.write(&pad)?;
        }

        let num_layers = self.layers.len();
        let mut top_hash = ZERO_HASH;
        for layer in 0..num_layers {
            let is_top = layer == num_layers - 1;
            if let Some(hash) = self.seal_layer(layer, !is_top)? {
                if is_top {
                    top_hash = hash;
                }
            }
        }

        let intro = Intro {
            size_2: self.size_2,
            num_layers: num_layers as u32,
            total_size: self.total_size,
            block_size,
            repo_key: self.repo_key.0,
            top_chunk_hash: top_hash,
        };
        let payload = intro.encode();
        let (intro_hash, intro_bytes) = encode(&payload, self.intro_key.as_bytes(), false);
        self.sink.persist(&intro_hash, &intro_bytes)?;
        tracing::debug!(hash = %hex::encode(intro_hash), total_size = self.total_size, "wrapped up repository");
        Ok(intro_hash)
    }
}
