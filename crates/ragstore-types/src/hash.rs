//! Content hashing for cache keys.

use sha2::{Digest, Sha256};

/// SHA-256 of the exact input, as lowercase hex.
///
/// No normalization is applied: case and whitespace are significant.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
