//! CACAO (chain-agnostic capability object) types and signature verification.
//!
//! A CACAO is the signed sign-in statement the wallet user produced. The
//! verifier rebuilds the CAIP-122 message from the payload, recovers the
//! signer from the signature and checks it against the `did:pkh` issuer.

use async_trait::async_trait;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

use crate::authenticate::error::CacaoError;
use crate::authenticate::recaps::decode_recap;

pub const CACAO_HEADER_EIP4361: &str = "eip4361";
pub const CACAO_HEADER_CAIP122: &str = "caip122";
pub const SIGNATURE_EIP191: &str = "eip191";
pub const SIGNATURE_EIP1271: &str = "eip1271";

const DID_PREFIX: &str = "did";
const DID_METHOD_PKH: &str = "pkh";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacaoHeader {
    pub t: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacaoPayload {
    pub iss: String,
    pub domain: String,
    pub aud: String,
    pub version: String,
    pub nonce: String,
    pub iat: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacaoSignature {
    pub t: String,
    pub s: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m: Option<String>,
}

/// Signed authorization object supplied by the wallet user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cacao {
    pub h: CacaoHeader,
    pub p: CacaoPayload,
    pub s: CacaoSignature,
}

impl Cacao {
    pub fn issuer(&self) -> Result<Issuer, CacaoError> {
        Issuer::parse(&self.p.iss)
    }
}

impl CacaoPayload {
    /// Chains embedded in this payload's ReCap resource.
    pub fn chains(&self) -> Vec<String> {
        decode_recap(self.resources.as_deref())
            .map(|recap| recap.chains())
            .unwrap_or_default()
    }

    /// Methods granted under the issuer's namespace by this payload's ReCap.
    pub fn methods(&self) -> Vec<String> {
        let namespace = match Issuer::parse(&self.iss) {
            Ok(issuer) => issuer.namespace,
            Err(_) => return Vec::new(),
        };
        decode_recap(self.resources.as_deref())
            .map(|recap| recap.methods(&namespace))
            .unwrap_or_default()
    }

    /// The CAIP-122 message the issuer signed.
    pub fn to_caip122_message(&self, chain_name: &str) -> Result<String, CacaoError> {
        let issuer = Issuer::parse(&self.iss)?;
        let mut message = format!(
            "{} wants you to sign in with your {} account:\n{}\n\n",
            self.domain, chain_name, issuer.address
        );

        let recap_statement =
            decode_recap(self.resources.as_deref()).map(|recap| recap.statement());
        match (&self.statement, recap_statement) {
            (Some(statement), Some(recap)) => message.push_str(&format!("{} {}", statement, recap)),
            (Some(statement), None) => message.push_str(statement),
            (None, Some(recap)) => message.push_str(&recap),
            (None, None) => {}
        }

        message.push_str(&format!(
            "\n\nURI: {}\nVersion: {}\nChain ID: {}\nNonce: {}\nIssued At: {}",
            self.aud, self.version, issuer.chain_id_reference, self.nonce, self.iat
        ));
        if let Some(exp) = &self.exp {
            message.push_str(&format!("\nExpiration Time: {}", exp));
        }
        if let Some(nbf) = &self.nbf {
            message.push_str(&format!("\nNot Before: {}", nbf));
        }
        if let Some(request_id) = &self.request_id {
            message.push_str(&format!("\nRequest ID: {}", request_id));
        }
        if let Some(resources) = self.resources.as_ref().filter(|r| !r.is_empty()) {
            message.push_str("\nResources:");
            for resource in resources {
                message.push_str(&format!("\n- {}", resource));
            }
        }
        Ok(message)
    }
}

/// `did:pkh:<namespace>:<reference>:<address>` issuer identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issuer {
    pub namespace: String,
    pub chain_id_reference: String,
    pub address: String,
}

impl Issuer {
    pub fn parse(iss: &str) -> Result<Self, CacaoError> {
        let parts: Vec<&str> = iss.split(':').collect();
        match parts.as_slice() {
            [DID_PREFIX, DID_METHOD_PKH, namespace, reference, address]
                if !namespace.is_empty() && !reference.is_empty() && !address.is_empty() =>
            {
                Ok(Issuer {
                    namespace: namespace.to_string(),
                    chain_id_reference: reference.to_string(),
                    address: address.to_string(),
                })
            }
            _ => Err(CacaoError::InvalidIssuer(iss.to_string())),
        }
    }

    /// CAIP-2 chain id, `namespace:reference`.
    pub fn chain_id(&self) -> String {
        format!("{}:{}", self.namespace, self.chain_id_reference)
    }
}

impl fmt::Display for Issuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            DID_PREFIX, DID_METHOD_PKH, self.namespace, self.chain_id_reference, self.address
        )
    }
}

/// Trait for CACAO verification.
///
/// Abstracted so contract-wallet (EIP-1271) backends and test doubles can be plugged in.
#[async_trait]
pub trait CacaoVerifier: Send + Sync {
    async fn verify(&self, cacao: &Cacao) -> bool;
}

/// Default verifier: EIP-191 personal-sign recovery over the CAIP-122 message.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignatureVerifier;

impl SignatureVerifier {
    pub fn check(&self, cacao: &Cacao) -> Result<(), CacaoError> {
        match cacao.s.t.as_str() {
            SIGNATURE_EIP191 => {
                let issuer = cacao.issuer()?;
                let message = cacao.p.to_caip122_message("Ethereum")?;
                verify_eip191(&message, &cacao.s.s, &issuer.address)
            }
            other => Err(CacaoError::UnsupportedSignatureType(other.to_string())),
        }
    }
}

#[async_trait]
impl CacaoVerifier for SignatureVerifier {
    async fn verify(&self, cacao: &Cacao) -> bool {
        match self.check(cacao) {
            Ok(()) => {
                debug!("CACAO verified for issuer {}", cacao.p.iss);
                true
            }
            Err(e) => {
                warn!("CACAO verification failed for issuer {}: {}", cacao.p.iss, e);
                false
            }
        }
    }
}

/// Verify a 65-byte `r || s || v` personal-sign signature against an address.
pub fn verify_eip191(
    message: &str,
    signature_hex: &str,
    expected_address: &str,
) -> Result<(), CacaoError> {
    let signature_bytes = hex::decode(signature_hex.trim().trim_start_matches("0x"))
        .map_err(|e| CacaoError::InvalidSignature(e.to_string()))?;
    if signature_bytes.len() != 65 {
        return Err(CacaoError::InvalidSignature(format!(
            "signature must decode to 65 bytes, got {}",
            signature_bytes.len()
        )));
    }

    let signature = Signature::from_slice(&signature_bytes[..64])
        .map_err(|e| CacaoError::InvalidSignature(e.to_string()))?;
    let recovery_id = normalize_recovery_id(signature_bytes[64])?;
    let prehash = eip191_hash(message);
    let verifying_key = VerifyingKey::recover_from_prehash(&prehash, &signature, recovery_id)
        .map_err(|e| CacaoError::InvalidSignature(format!("failed recovering signer: {}", e)))?;

    let recovered = ethereum_address(&verifying_key);
    if !recovered.eq_ignore_ascii_case(expected_address) {
        return Err(CacaoError::AddressMismatch {
            expected: expected_address.to_string(),
            recovered,
        });
    }
    Ok(())
}

fn normalize_recovery_id(raw: u8) -> Result<RecoveryId, CacaoError> {
    let id = match raw {
        27 | 28 => raw - 27,
        0 | 1 => raw,
        _ => {
            return Err(CacaoError::InvalidSignature(
                "recovery id must be 0/1 or 27/28".to_string(),
            ))
        }
    };
    RecoveryId::from_byte(id)
        .ok_or_else(|| CacaoError::InvalidSignature("recovery id is invalid".to_string()))
}

/// Keccak-256 of `"\x19Ethereum Signed Message:\n" + len + message`.
pub fn eip191_hash(message: &str) -> [u8; 32] {
    let bytes = message.as_bytes();
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", bytes.len()).as_bytes());
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Lowercase `0x` address of a secp256k1 key.
pub fn ethereum_address(key: &VerifyingKey) -> String {
    let encoded = key.to_encoded_point(false);
    let digest = Keccak256::digest(&encoded.as_bytes()[1..]);
    format!("0x{}", hex::encode(&digest[12..]))
}
