//! Hashing utilities for content-addressed keys

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a byte slice.
///
/// Used to derive stable identity keys and payload file names from target
/// URLs, so that re-downloading the same target always lands on the same
/// on-disk name.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_sha256_hex_stable_for_urls() {
        let a = sha256_hex(b"https://example.com/world/2024/jan/01/story");
        let b = sha256_hex(b"https://example.com/world/2024/jan/01/story");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
