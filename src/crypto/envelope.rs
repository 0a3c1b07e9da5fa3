//! Authenticated encryption envelope for chat payloads
//!
//! A sealed payload is laid out as `nonce || ciphertext || tag`. The nonce is
//! drawn fresh from the OS CSPRNG on every call, so a single key can seal any
//! number of messages. Opening verifies the Poly1305 tag before returning any
//! plaintext: a wrong key or a corrupted frame is an error, never garbage.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use thiserror::Error;

use super::hash::{fingerprint, sha256};

/// Size of an encryption key in bytes
pub const KEY_SIZE: usize = 32;

/// Nonce size for ChaCha20-Poly1305
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size for ChaCha20-Poly1305
pub const TAG_SIZE: usize = 16;

/// Envelope errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    Encryption,
    #[error("Authentication failed (wrong key or corrupted data)")]
    Authentication,
    #[error("Ciphertext too short: {0} bytes (minimum {min})", min = NONCE_SIZE + TAG_SIZE)]
    Truncated(usize),
    #[error("Invalid key encoding")]
    InvalidKey,
}

/// A pre-shared 32-byte symmetric key
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Derive a key from an operator password: `SHA-256(utf8(password))`.
    ///
    /// The empty password means "no key configured" and yields `None`.
    pub fn from_password(password: &str) -> Option<Self> {
        if password.is_empty() {
            return None;
        }
        Some(Self(sha256(password.as_bytes())))
    }

    /// Parse a hex-encoded 32-byte key
    pub fn from_hex(hex_key: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| CryptoError::InvalidKey)?;
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Short digest two operators can read aloud to confirm they share a key
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Generate a random key from the OS CSPRNG
pub fn generate_key() -> EncryptionKey {
    let mut key = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    EncryptionKey(key)
}

/// Seal `plaintext` under `key`, returning `nonce || ciphertext || tag`
pub fn seal(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, CryptoError> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encryption)?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a payload produced by [`seal`]
pub fn open(sealed: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Truncated(sealed.len()));
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = generate_key();
        let payloads: [&[u8]; 4] = [b"", b"x", b"Hello, anonbox!", &[0xAB; 5000]];

        for plaintext in payloads {
            let sealed = seal(plaintext, &key).unwrap();
            assert_eq!(sealed.len(), plaintext.len() + NONCE_SIZE + TAG_SIZE);
            assert_eq!(open(&sealed, &key).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let key1 = generate_key();
        let key2 = generate_key();

        let sealed = seal(b"Secret Data", &key1).unwrap();
        assert_eq!(open(&sealed, &key2), Err(CryptoError::Authentication));
    }

    #[test]
    fn test_open_corrupted_fails() {
        let key = generate_key();
        let mut sealed = seal(b"tamper with me", &key).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;

        assert_eq!(open(&sealed, &key), Err(CryptoError::Authentication));
    }

    #[test]
    fn test_open_truncated_fails() {
        let key = generate_key();
        let sealed = seal(b"short", &key).unwrap();

        assert_eq!(open(&sealed[..10], &key), Err(CryptoError::Truncated(10)));
        assert_eq!(open(&[], &key), Err(CryptoError::Truncated(0)));
    }

    #[test]
    fn test_nonce_is_fresh_per_seal() {
        let key = generate_key();
        let a = seal(b"same", &key).unwrap();
        let b = seal(b"same", &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_from_password() {
        assert!(EncryptionKey::from_password("").is_none());

        let a = EncryptionKey::from_password("hunter2").unwrap();
        let b = EncryptionKey::from_password("hunter2").unwrap();
        let c = EncryptionKey::from_password("hunter3").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_bytes(), &sha256(b"hunter2"));
    }

    #[test]
    fn test_key_hex_roundtrip() {
        let key = generate_key();
        let parsed = EncryptionKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(parsed, key);

        assert_eq!(EncryptionKey::from_hex("abcd"), Err(CryptoError::InvalidKey));
        assert_eq!(EncryptionKey::from_hex("zz"), Err(CryptoError::InvalidKey));
    }

    #[test]
    fn test_key_fingerprint() {
        let a = EncryptionKey::from_password("pw").unwrap();
        let b = EncryptionKey::from_password("pw").unwrap();
        let c = EncryptionKey::from_password("other").unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert!(!a.to_hex().contains(&a.fingerprint().replace(':', "")));
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = EncryptionKey::from_bytes([7u8; KEY_SIZE]);
        let debug = format!("{:?}", key);
        assert!(!debug.contains("07"));
        assert!(debug.contains("redacted"));
    }
}
