use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::modules::secure_keys::{KeyError, SymmetricKey, KEY_LENGTH};

/// ChaCha20-Poly1305 nonce length.
pub const NONCE_LENGTH: usize = 12;

/// Derives a relay topic from key material.
///
/// topic = hex(SHA256(key_bytes)). Both peers compute the same topic from
/// the same key, so this must stay deterministic.
pub fn topic_from_key(key: &[u8]) -> String {
    hex::encode(Sha256::digest(key))
}

/// Derives the session symmetric key from an X25519 shared secret.
///
/// HKDF-SHA256 with no salt and empty info, expanded to 32 bytes.
pub fn derive_symmetric_key(shared_secret: &[u8]) -> Result<SymmetricKey, KeyError> {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut derived_key = [0u8; KEY_LENGTH];
    hkdf.expand(&[], &mut derived_key)
        .map_err(|e| KeyError::CryptoError(format!("HKDF expansion failed: {}", e)))?;
    SymmetricKey::from_bytes(&derived_key)
}

/// Encrypts `plaintext` with ChaCha20-Poly1305 under a fresh random nonce.
///
/// # Returns
/// Tuple of (nonce, sealed) where sealed includes ciphertext + tag
pub fn seal(
    key: &SymmetricKey,
    plaintext: &[u8],
) -> Result<([u8; NONCE_LENGTH], Vec<u8>), KeyError> {
    let mut nonce = [0u8; NONCE_LENGTH];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| KeyError::CryptoError(format!("entropy source failed: {}", e)))?;

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.expose()));
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| KeyError::CryptoError(format!("ChaCha20-Poly1305 encryption failed: {}", e)))?;

    Ok((nonce, sealed))
}

/// Decrypts and authenticates a sealed box produced by [`seal`].
pub fn open(key: &SymmetricKey, nonce: &[u8], sealed: &[u8]) -> Result<Vec<u8>, KeyError> {
    if nonce.len() != NONCE_LENGTH {
        return Err(KeyError::InvalidKeySize {
            expected: NONCE_LENGTH,
            got: nonce.len(),
        });
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.expose()));
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|e| KeyError::CryptoError(format!("ChaCha20-Poly1305 decryption failed: {}", e)))
}

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Base64 encode data using standard encoding
pub fn base64_encode(data: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD.encode(data)
}

/// Base64 decode data using standard encoding
pub fn base64_decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD.decode(data)
}
