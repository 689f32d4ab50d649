//! Cache key derivation.

use sha2::{Digest, Sha256};

/// Hex SHA-256 of a serialised page; the SSR cache key.
pub fn content_digest(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}
