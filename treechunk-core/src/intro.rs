/*!
The intro chunk payload: the root of a repository, naming the top of the
hash tree and carrying the parameters needed to walk it.

```text
 offset  size  field
   0     16    MAGIC
  16       4    VERSION
  20       4    size_2
  24       4    num_layers
  28       8    total_size   (u64)
  36       4    block_size
  40      16    repo_key
  56      32    top_chunk_hash
```

This lays out to 88 bytes, not the 84 the prose elsewhere rounds to --
the byte table above (and the reference implementation's `<16slllQl16s32s`
struct format) are the source of truth; see DESIGN.md.
*/
use crate::chunk::{Hash, HASH_LEN, MAGIC};
use crate::error::CodecError;

pub const INTRO_LEN: usize = 88;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intro {
    pub size_2: u32,
    pub num_layers: u32,
    pub total_size: u64,
    pub block_size: u32,
    pub repo_key: [u8; 16],
    pub top_chunk_hash: Hash,
}

impl Intro {
    pub fn encode(&self) -> [u8; INTRO_LEN] {
        let mut out = [0u8; INTRO_LEN];
        out[0..16].copy_from_slice(MAGIC);
        out[16..20].copy_from_slice(&(crate::chunk::VERSION as u32).to_le_bytes());
        out[20..24].copy_from_slice(&self.size_2.to_le_bytes());
        out[24..28].copy_from_slice(&self.num_layers.to_le_bytes());
        out[28..36].copy_from_slice(&self.total_size.to_le_bytes());
        out[36..40].copy_from_slice(&self.block_size.to_le_bytes());
        out[40..56].copy_from_slice(&self.repo_key);
        out[56..88].copy_from_slice(&self.top_chunk_hash);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Intro, CodecError> {
        if bytes.len() != INTRO_LEN {
            return Err(CodecError::ShortHeader);
        }
        if &bytes[0..16] != MAGIC {
            return Err(CodecError::BadMagic);
        }
        let version = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
        if version != crate::chunk::VERSION as u32 {
            return Err(CodecError::BadVersion);
        }
        let size_2 = u32::from_le_bytes(bytes[20..24].try_into().unwrap());
        let num_layers = u32::from_le_bytes(bytes[24..28].try_into().unwrap());
        let total_size = u64::from_le_bytes(bytes[28..36].try_into().unwrap());
        let block_size = u32::from_le_bytes(bytes[36..40].try_into().unwrap());
        if block_size != 4096 && block_size != 8192 {
            return Err(CodecError::BadBlockSize);
        }
        let mut repo_key = [0u8; 16];
        repo_key.copy_from_slice(&bytes[40..56]);
        let mut top_chunk_hash = [0u8; HASH_LEN];
        top_chunk_hash.copy_from_slice(&bytes[56..88]);

        Ok(Intro {
            size_2,
            num_layers,
            total_size,
            block_size,
            repo_key,
            top_chunk_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let intro = Intro {
            size_2: 12,
            num_layers: 2,
            total_size: 8192,
            block_size: 4096,
            repo_key: [5u8; 16],
            top_chunk_hash: [9u8; 32],
        };
        let bytes = intro.encode();
        assert_eq!(bytes.len(), INTRO_LEN);
        let decoded = Intro::decode(&bytes).unwrap();
        assert_eq!(decoded, intro);
    }

    #[test]
    fn rejects_bad_block_size() {
        let mut intro = Intro {
            size_2: 12,
            num_layers: 2,
            total_size: 8192,
            block_size: 4096,
            repo_key: [5u8; 16],
            top_chunk_hash: [9u8; 32],
        }
        .encode();
        intro[36..40].copy_from_slice(&1234u32.to_le_bytes());
        let err = Intro::decode(&intro).unwrap_err();
        assert!(matches!(err, CodecError::BadBlockSize));
    }
}
