//! Hashing utilities
//!
//! SHA-256 stretches an operator password into a fixed-size encryption key,
//! and gives operators a short fingerprint to compare keys out of band.

use sha2::{Digest, Sha256};

/// Bytes of digest shown in a fingerprint
const FINGERPRINT_LEN: usize = 8;

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Short colon-separated digest of `data`, e.g. `3f2a:91c0:0b7e:d415`
pub fn fingerprint(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"anonbox-fingerprint");
    hasher.update(data);
    let digest = hasher.finalize();

    digest[..FINGERPRINT_LEN]
        .chunks(2)
        .map(hex::encode)
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256() {
        let data = b"hello world";
        assert_eq!(
            hex::encode(sha256(data)),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_sha256_empty() {
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_fingerprint_shape() {
        let fp = fingerprint(b"some key material");
        assert_eq!(fp.len(), 19);
        assert_eq!(fp.split(':').count(), 4);
        assert_eq!(fp, fingerprint(b"some key material"));
        assert_ne!(fp, fingerprint(b"other key material"));
        // Not a prefix of the plain digest
        assert!(!hex::encode(sha256(b"some key material")).starts_with(&fp.replace(':', "")));
    }
}
