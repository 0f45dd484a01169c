use sha2::{Digest, Sha256};

use crate::types::{CacheKey, InputFile};

/// Hex characters kept from the digest.
pub const CACHE_KEY_LEN: usize = 16;

/// Stable key over (absolute path, size, mtime). Any change to one of the
/// three yields a different key.
pub fn cache_key(input: &InputFile) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(input.path.to_string_lossy().as_bytes());
    hasher.update([0u8]);
    hasher.update(input.size.to_le_bytes());
    hasher.update(input.modified_nanos().to_le_bytes());
    let hex = hex::encode(hasher.finalize());
    CacheKey::new(&hex[..CACHE_KEY_LEN])
}
