//! Document hashing for change detection.
//!
//! Emitted documents are fingerprinted so a downstream stage can tell
//! whether anything changed without diffing the documents themselves.

use sha2::{Digest, Sha256};

/// Hasher for emitted documents.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Computes the SHA-256 hex digest of a document.
    #[must_use]
    pub fn hash_document(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        // Constant-time comparison
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
