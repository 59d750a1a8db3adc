/*!
This crate contains the data structures and pure functions shared by the
writer and reader halves of a tree-chunked repository: the chunk wire
format (encode/decode), the key-derivation schedule, the hash-tree layer
geometry, and the intro (root) chunk payload.

Nothing in this crate touches a filesystem or network socket; it is the
`asuran-core` of this workspace, in the sense that both the writer and
the reader in the `treechunk` crate build on top of it without needing to
duplicate any of the cryptographic or geometric primitives.
*/

#![warn(clippy::all)]
#![allow(clippy::must_use_candidate)]

pub mod chunk;
pub mod error;
pub mod intro;
pub mod keys;
pub mod layer;

pub use chunk::{decode, encode, Hash, HASH_LEN, ZERO_HASH};
pub use error::CodecError;
pub use intro::Intro;
pub use keys::{derive_intro_key, derive_layer_key, derive_repo_key, Key16};
pub use layer::{layer_shape, LayerShape};
