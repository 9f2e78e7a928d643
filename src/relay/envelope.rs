//! Relay envelope framing.
//!
//! Type 0: `0x00 || nonce(12) || ciphertext+tag`
//! Type 1: `0x01 || sender public key(32) || nonce(12) || ciphertext+tag`

use crate::modules::crypto::{open, seal, NONCE_LENGTH};
use crate::modules::secure_keys::{key_array, KeyError, SymmetricKey, KEY_LENGTH};
use crate::relay::EnvelopeType;

/// Poly1305 tag length; the shortest valid ciphertext.
const TAG_LENGTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub envelope_type: EnvelopeType,
    pub sender_public_key: Option<[u8; KEY_LENGTH]>,
    pub nonce: [u8; NONCE_LENGTH],
    pub sealed: Vec<u8>,
}

impl Envelope {
    pub fn seal(
        key: &SymmetricKey,
        payload: &[u8],
        sender_public_key: Option<[u8; KEY_LENGTH]>,
    ) -> Result<Self, KeyError> {
        let (nonce, sealed) = seal(key, payload)?;
        let envelope_type = match sender_public_key {
            Some(_) => EnvelopeType::One,
            None => EnvelopeType::Zero,
        };
        Ok(Envelope {
            envelope_type,
            sender_public_key,
            nonce,
            sealed,
        })
    }

    pub fn open(&self, key: &SymmetricKey) -> Result<Vec<u8>, KeyError> {
        open(key, &self.nonce, &self.sealed)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + KEY_LENGTH + NONCE_LENGTH + self.sealed.len());
        out.push(self.envelope_type as u8);
        if let Some(sender) = &self.sender_public_key {
            out.extend_from_slice(sender);
        }
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.sealed);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let (&tag, rest) = bytes
            .split_first()
            .ok_or_else(|| KeyError::InvalidFormat("empty envelope".to_string()))?;
        let (envelope_type, sender_public_key, rest) = match tag {
            0 => (EnvelopeType::Zero, None, rest),
            1 => {
                if rest.len() < KEY_LENGTH {
                    return Err(KeyError::InvalidFormat("truncated sender key".to_string()));
                }
                let (sender, rest) = rest.split_at(KEY_LENGTH);
                (EnvelopeType::One, Some(key_array(sender)?), rest)
            }
            other => {
                return Err(KeyError::InvalidFormat(format!(
                    "unknown envelope type {}",
                    other
                )))
            }
        };
        if rest.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(KeyError::InvalidFormat("envelope too short".to_string()));
        }
        let (nonce, sealed) = rest.split_at(NONCE_LENGTH);
        let mut nonce_array = [0u8; NONCE_LENGTH];
        nonce_array.copy_from_slice(nonce);
        Ok(Envelope {
            envelope_type,
            sender_public_key,
            nonce: nonce_array,
            sealed: sealed.to_vec(),
        })
    }
}
