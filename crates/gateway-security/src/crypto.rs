//! Cryptographic utilities.

use sha2::{Digest, Sha256};

/// Hashing service for API key storage and lookup.
#[derive(Debug, Clone, Default)]
pub struct HashingService;

impl HashingService {
    /// Hash data using SHA-256.
    #[must_use]
    pub fn sha256(data: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.finalize().to_vec()
    }

    /// Hash data using SHA-256 and return hex.
    #[must_use]
    pub fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Self::sha256(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashing_sha256() {
        let hash = HashingService::sha256_hex(b"hello");
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
