//! Cryptographic utilities
//!
//! This module provides:
//! - SHA-256 hashing (password to key derivation, key fingerprints)
//! - The authenticated encryption envelope applied to chat payloads

pub mod envelope;
pub mod hash;

pub use envelope::{
    generate_key, open, seal, CryptoError, EncryptionKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE,
};
pub use hash::{fingerprint, sha256};
