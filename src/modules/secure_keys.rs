//! Secure key handling with automatic zeroization.
//!
//! This module provides wrappers around the X25519 private keys and the
//! derived symmetric session keys so that sensitive key material is
//! zeroized on drop and never shows up in `Debug` output.

use rand_core::{OsRng, RngCore};
use secrecy::{ExposeSecret, Secret};
use std::fmt;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// Length of X25519 keys and of derived symmetric keys.
pub const KEY_LENGTH: usize = 32;

/// Error type for key operations.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid key size: expected {expected}, got {got}")]
    InvalidKeySize { expected: usize, got: usize },

    #[error("Invalid key format: {0}")]
    InvalidFormat(String),

    #[error("Cryptographic operation failed: {0}")]
    CryptoError(String),

    #[error("No private key stored for public key {0}")]
    MissingPrivateKey(String),

    #[error("No symmetric key stored for topic {0}")]
    MissingSymmetricKey(String),
}

/// Copy a slice into a fixed 32-byte array, checking its length.
pub fn key_array(bytes: &[u8]) -> Result<[u8; KEY_LENGTH], KeyError> {
    if bytes.len() != KEY_LENGTH {
        return Err(KeyError::InvalidKeySize {
            expected: KEY_LENGTH,
            got: bytes.len(),
        });
    }
    let mut array = [0u8; KEY_LENGTH];
    array.copy_from_slice(bytes);
    Ok(array)
}

/// Secure wrapper for an X25519 private key.
///
/// The key material is automatically zeroized when dropped.
pub struct SecureX25519PrivateKey {
    /// The secret key bytes wrapped in secrecy.
    inner: Secret<[u8; KEY_LENGTH]>,
}

impl SecureX25519PrivateKey {
    /// Generate a fresh key from the OS entropy source.
    pub fn generate() -> Result<Self, KeyError> {
        let mut bytes = [0u8; KEY_LENGTH];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| KeyError::CryptoError(format!("entropy source failed: {}", e)))?;
        Ok(Self {
            inner: Secret::new(bytes),
        })
    }

    /// Create from raw bytes.
    ///
    /// # Security
    /// The input bytes are copied and the original should be zeroized by the caller.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        Ok(Self {
            inner: Secret::new(key_array(bytes)?),
        })
    }

    /// Get the corresponding public key (32 bytes).
    pub fn public_key(&self) -> [u8; KEY_LENGTH] {
        let secret = StaticSecret::from(*self.inner.expose_secret());
        X25519PublicKey::from(&secret).to_bytes()
    }

    /// Perform X25519 key agreement with a peer public key.
    ///
    /// # Security
    /// The private key is only exposed within this function scope.
    pub fn perform_ecdh(&self, peer_public: &[u8; KEY_LENGTH]) -> [u8; KEY_LENGTH] {
        let secret = StaticSecret::from(*self.inner.expose_secret());
        let peer = X25519PublicKey::from(*peer_public);
        secret.diffie_hellman(&peer).to_bytes()
    }
}

impl fmt::Debug for SecureX25519PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecureX25519PrivateKey([REDACTED])")
    }
}

impl Clone for SecureX25519PrivateKey {
    fn clone(&self) -> Self {
        // Deep copy the secret bytes
        let mut new_bytes = [0u8; KEY_LENGTH];
        new_bytes.copy_from_slice(self.inner.expose_secret());
        Self {
            inner: Secret::new(new_bytes),
        }
    }
}

/// Symmetric session key derived from key agreement.
///
/// Stored by the key store under the session topic it hashes to.
pub struct SymmetricKey {
    inner: Secret<[u8; KEY_LENGTH]>,
}

impl SymmetricKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        Ok(Self {
            inner: Secret::new(key_array(bytes)?),
        })
    }

    /// Raw key bytes.
    ///
    /// # Security
    /// Do not log or persist the returned slice.
    pub fn expose(&self) -> &[u8; KEY_LENGTH] {
        self.inner.expose_secret()
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

impl Clone for SymmetricKey {
    fn clone(&self) -> Self {
        let mut new_bytes = [0u8; KEY_LENGTH];
        new_bytes.copy_from_slice(self.inner.expose_secret());
        Self {
            inner: Secret::new(new_bytes),
        }
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        crate::modules::crypto::constant_time_eq(self.expose(), other.expose())
    }
}
