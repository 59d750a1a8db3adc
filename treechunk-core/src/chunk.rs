/*!
The chunk wire format: framing, authenticated compression+encryption, and
the outer hash that names a chunk.

```text
 offset  size  field
   0     16    MAGIC                = "TREECHUNK REPO\n\0"
  16      1    VERSION              = 1
  17      1    compressed flag      in {0,1}
  18      4    content_len          (u32 LE, pre-encryption, post-compression)
  22     16    content_iv
  38     ..    ciphertext           (AES-128-CBC, len = ceil(content_len/16)*16)
```

A chunk's name is the SHA-256 of its full encoded bytes (header +
ciphertext). The IV is not random: it is a keyed hash of the plaintext
content, so `encode` is a deterministic function of `(payload, key,
compress_allowed)` and the same deflate output -- this is what lets two
independently-built repositories agree on chunk names for identical data
under the same layer key.
*/
use crate::error::{CodecError, Result};
use crate::keys::{hmac_sha256, sha256};

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use std::io::{Read, Write};
use tracing::trace;

pub const MAGIC: &[u8; 16] = b"TREECHUNK REPO\n\0";
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 38;
pub const HASH_LEN: usize = 32;
pub const AES_BLOCK_LEN: usize = 16;

/// The SHA-256 naming a chunk, or the `ZERO_HASH` sentinel.
pub type Hash = [u8; HASH_LEN];

/// The distinguished value denoting "an all-zero subtree at this layer".
/// Never a real chunk's name -- a chunk whose encoded bytes happen to hash
/// to all zeros would be astronomically unlucky, and is not handled
/// specially beyond this sentinel's own reserved meaning.
pub const ZERO_HASH: Hash = [0u8; HASH_LEN];

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

fn zero_pad_to_block(data: &[u8]) -> Vec<u8> {
    let rem = data.len() % AES_BLOCK_LEN;
    let mut padded = data.to_vec();
    if rem != 0 {
        padded.resize(data.len() + (AES_BLOCK_LEN - rem), 0);
    }
    padded
}

/// `content_iv = first16(HMAC-SHA256(key, SHA-256(content)))`. Binds the
/// IV to the plaintext rather than drawing it from an RNG.
fn content_iv(key: &[u8; 16], content: &[u8]) -> [u8; 16] {
    let digest = sha256(content);
    let mac = hmac_sha256(key, &digest);
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&mac[..16]);
    iv
}

fn aes128_cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], padded: &[u8]) -> Vec<u8> {
    Aes128CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<NoPadding>(padded)
}

fn aes128_cbc_decrypt(key: &[u8; 16], iv: &[u8; 16], ciphertext: &[u8]) -> Vec<u8> {
    // `ciphertext` is already block-aligned (checked by the caller before
    // this is reached), so `NoPadding` never rejects it.
    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .expect("ciphertext length was verified to be block-aligned")
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(1));
    encoder
        .write_all(data)
        .expect("writing to an in-memory encoder cannot fail");
    encoder.finish().expect("in-memory zlib stream is always valid")
}

/// Inflates `data`, discarding any decompressed bytes past `max_size`
/// rather than erroring -- matching the reference decoder's use of
/// zlib's bounded `decompress(..., max_length=...)`.
fn inflate_capped(data: &[u8], max_size: usize) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(data.len().saturating_mul(3).min(max_size));
    let mut buf = [0u8; 8192];
    loop {
        if out.len() >= max_size {
            break;
        }
        let n = decoder
            .read(&mut buf)
            .map_err(|e| CodecError::Decompress(e.to_string()))?;
        if n == 0 {
            break;
        }
        let room = max_size - out.len();
        out.extend_from_slice(&buf[..n.min(room)]);
    }
    Ok(out)
}

/// Encodes `payload` (at most `S` bytes, the caller's responsibility) into
/// a framed, encrypted, optionally compressed chunk, returning its name
/// and its full on-disk bytes.
#[tracing::instrument(level = "trace", skip(payload, key))]
pub fn encode(payload: &[u8], key: &[u8; 16], compress_allowed: bool) -> (Hash, Vec<u8>) {
    let (content, compressed) = if compress_allowed {
        let compressed_content = deflate(payload);
        // Keep the compressed form only if it saves at least 20%.
        if 5 * compressed_content.len() <= 4 * payload.len() {
            (compressed_content, true)
        } else {
            (payload.to_vec(), false)
        }
    } else {
        (payload.to_vec(), false)
    };

    let content_len = content.len() as u32;
    let padded = zero_pad_to_block(&content);
    let iv = content_iv(key, &content);
    let ciphertext = aes128_cbc_encrypt(key, &iv, &padded);

    let mut bytes = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    bytes.extend_from_slice(MAGIC);
    bytes.push(VERSION);
    bytes.push(compressed as u8);
    bytes.extend_from_slice(&content_len.to_le_bytes());
    bytes.extend_from_slice(&iv);
    bytes.extend_from_slice(&ciphertext);

    let name = sha256(&bytes);
    trace!(compressed, len = bytes.len(), "encoded chunk");
    (name, bytes)
}

/// Decodes a chunk read from `stream`, verifying it names `expected_name`
/// under `key`, and returns the original payload. `max_size` bounds both
/// how much ciphertext is read and how much decompressed output is kept.
#[tracing::instrument(level = "trace", skip(stream, key))]
pub fn decode<R: Read>(mut stream: R, expected_name: &Hash, key: &[u8; 16], max_size: usize) -> Result<Vec<u8>> {
    let mut header = [0u8; HEADER_LEN];
    read_header(&mut stream, &mut header)?;

    if &header[0..16] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    let version = header[16];
    if version != VERSION {
        return Err(CodecError::BadVersion);
    }
    let compressed = header[17];
    if compressed > 1 {
        return Err(CodecError::BadFlag);
    }
    let content_len = u32::from_le_bytes(header[18..22].try_into().unwrap()) as usize;
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&header[22..38]);

    let mut ciphertext = Vec::new();
    stream.take(max_size as u64).read_to_end(&mut ciphertext)?;

    let mut hasher_input = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    hasher_input.extend_from_slice(&header);
    hasher_input.extend_from_slice(&ciphertext);
    if sha256(&hasher_input) != *expected_name {
        return Err(CodecError::BadHash);
    }

    if ciphertext.len() % AES_BLOCK_LEN != 0 {
        return Err(CodecError::BadSize);
    }
    if ciphertext.len() < content_len {
        return Err(CodecError::BadLen);
    }

    let mut plain = aes128_cbc_decrypt(key, &iv, &ciphertext);
    plain.truncate(content_len);

    trace!(content_len, compressed = compressed == 1, "decoded chunk");
    if compressed == 1 {
        inflate_capped(&plain, max_size)
    } else {
        Ok(plain)
    }
}

fn read_header<R: Read>(stream: &mut R, header: &mut [u8; HEADER_LEN]) -> Result<()> {
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = stream.read(&mut header[filled..])?;
        if n == 0 {
            return Err(CodecError::ShortHeader);
        }
        filled += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 16] {
        [0x42u8; 16]
    }

    #[test]
    fn round_trip_compressible() {
        let payload = vec![b'a'; 4096];
        let (name, bytes) = encode(&payload, &key(), true);
        let decoded = decode(&bytes[..], &name, &key(), 4096 + 256).unwrap();
        assert_eq!(decoded, payload);
        // Highly compressible, should have actually compressed.
        assert_eq!(bytes[17], 1);
    }

    #[test]
    fn round_trip_incompressible() {
        // Pseudo-random-looking data that won't compress by 20%.
        let mut payload = vec![0u8; 256];
        for (i, b) in payload.iter_mut().enumerate() {
            *b = (i * 2654435761u32 as usize % 251) as u8;
        }
        let (name, bytes) = encode(&payload, &key(), true);
        let decoded = decode(&bytes[..], &name, &key(), 4096 + 256).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let payload = b"hello world".to_vec();
        let (name1, bytes1) = encode(&payload, &key(), true);
        let (name2, bytes2) = encode(&payload, &key(), true);
        assert_eq!(name1, name2);
        assert_eq!(bytes1, bytes2);
    }

    #[test]
    fn wrong_key_fails_magic_check_not_hash_check() {
        // Decoding under the encoding key succeeds; the hash check is the
        // sole integrity gate, so tampering with ciphertext bytes (not
        // the header) is what should trip BadHash.
        let payload = b"some content".to_vec();
        let (name, mut bytes) = encode(&payload, &key(), false);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let err = decode(&bytes[..], &name, &key(), 4096).unwrap_err();
        assert!(matches!(err, CodecError::BadHash));
    }

    #[test]
    fn short_header_detected() {
        let err = decode(&b"short"[..], &ZERO_HASH, &key(), 4096).unwrap_err();
        assert!(matches!(err, CodecError::ShortHeader));
    }

    #[test]
    fn truncated_ciphertext_fails_hash() {
        let payload = vec![1u8; 1000];
        let (name, bytes) = encode(&payload, &key(), true);
        let truncated = &bytes[..bytes.len() - 16];
        let err = decode(truncated, &name, &key(), 4096).unwrap_err();
        assert!(matches!(err, CodecError::BadHash));
    }
}
