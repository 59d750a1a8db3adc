/*!
Key derivation for a repository.

A repository has three 16-byte keys in play (see the module-level diagram
in `treechunk`'s README): the caller-supplied `unlock_key`, the
caller-supplied `repo_key_raw` (stored only in its hashed form), and two
keys derived from those by HMAC-SHA256, truncated to 16 bytes, the same
way `asuran_core::repository::key::Key` splits a single key bundle into
independent encryption/HMAC/ID sub-keys.
*/
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::trace;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// A 16-byte key that scrubs itself from memory on drop, the way
/// `asuran_core::repository::key::Key` zeroizes its own key material.
#[derive(Clone, Debug, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct Key16(pub [u8; 16]);

impl Key16 {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// Truncates a 32-byte digest down to the 16 bytes this format uses for
/// every derived key.
fn first16(full: [u8; 32]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&full[..16]);
    out
}

pub(crate) fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    // A 16-byte key is always valid key material for HMAC-SHA256; this
    // cannot fail the way a fixed-size-cipher key could.
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// `repo_key = first16(SHA-256(repo_key_raw))`, the only form of the
/// repository key that is ever persisted (in the intro chunk).
#[tracing::instrument(level = "trace", skip_all)]
pub fn derive_repo_key(repo_key_raw: &[u8]) -> Key16 {
    trace!("derived repo key");
    Key16(first16(sha256(repo_key_raw)))
}

/// `intro_key = first16(HMAC-SHA256(unlock_key, "intro"))`
#[tracing::instrument(level = "trace", skip_all)]
pub fn derive_intro_key(unlock_key: &[u8; 16]) -> Key16 {
    trace!("derived intro key");
    Key16(first16(hmac_sha256(unlock_key, b"intro")))
}

/// `layer_key = first16(HMAC-SHA256(repo_key, "layer"))`
#[tracing::instrument(level = "trace", skip_all)]
pub fn derive_layer_key(repo_key: &[u8; 16]) -> Key16 {
    trace!("derived layer key");
    Key16(first16(hmac_sha256(repo_key, b"layer")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let unlock = [7u8; 16];
        let repo_raw = [9u8; 16];
        let repo_key = derive_repo_key(&repo_raw);
        assert_eq!(repo_key, derive_repo_key(&repo_raw));
        let intro_key = derive_intro_key(&unlock);
        assert_eq!(intro_key, derive_intro_key(&unlock));
        let layer_key = derive_layer_key(repo_key.as_bytes());
        assert_eq!(layer_key, derive_layer_key(repo_key.as_bytes()));
        // The three keys must not collide with each other for typical inputs.
        assert_ne!(intro_key, layer_key);
    }
}
