//! Types for session authenticate approval.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::modules::secure_keys::{key_array, KeyError, KEY_LENGTH};

/// Events granted to every authenticated session. Not negotiated.
pub const SESSION_EVENTS: [&str; 2] = ["chainChanged", "accountsChanged"];

/// Authenticated sessions live for seven days unless extended.
pub const SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Relay routing identifier (hex SHA-256 of key material).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(pub String);

impl Topic {
    pub fn new(value: impl Into<String>) -> Self {
        Topic(value.into())
    }

    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// X25519 public key, carried as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKey(String);

impl PublicKey {
    pub fn from_hex(hex_key: impl Into<String>) -> Self {
        PublicKey(hex_key.into().to_lowercase())
    }

    pub fn from_bytes(bytes: &[u8; KEY_LENGTH]) -> Self {
        PublicKey(hex::encode(bytes))
    }

    pub fn key_as_hex(&self) -> &str {
        &self.0
    }

    /// Decode to raw key bytes, rejecting anything that is not 32 bytes of hex.
    pub fn to_bytes(&self) -> Result<[u8; KEY_LENGTH], KeyError> {
        let bytes = hex::decode(&self.0).map_err(|e| KeyError::InvalidFormat(e.to_string()))?;
        key_array(&bytes)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Application metadata exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetaData {
    pub name: String,
    pub description: String,
    pub url: String,
    pub icons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

/// Whether stored metadata describes this wallet or the remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppMetaDataType {
    #[serde(rename = "self")]
    SelfApp,
    Peer,
}

impl fmt::Display for AppMetaDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppMetaDataType::SelfApp => f.write_str("self"),
            AppMetaDataType::Peer => f.write_str("peer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub public_key: String,
    pub metadata: AppMetaData,
}

/// Expiry as unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expiry(pub i64);

impl Expiry {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.0 < now
    }
}

/// Authentication payload proposed by the requesting application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadParams {
    pub chains: Vec<String>,
    pub domain: String,
    pub nonce: String,
    pub aud: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub payload_type: Option<String>,
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
#[serde(rename_all = "camelCase")]
pub struct SessionAuthenticateParams {
    pub requester: Participant,
    pub auth_payload: PayloadParams,
    pub expiry_timestamp: i64,
}

/// A `wc_sessionAuthenticate` request awaiting the user's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAuthRequest {
    pub id: u64,
    /// Pairing topic the request arrived on.
    pub topic: Topic,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<Expiry>,
    pub params: SessionAuthenticateParams,
}

/// Proposed namespace: what the application asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalNamespace {
    pub chains: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

/// Session namespace: what the wallet granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionNamespace {
    pub chains: Vec<String>,
    pub accounts: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

/// Durable result of a successful approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedSession {
    pub topic: Topic,
    pub pairing_topic: Topic,
    pub expiry: Expiry,
    pub self_public_key: PublicKey,
    pub self_metadata: AppMetaData,
    pub peer_public_key: PublicKey,
    pub peer_metadata: AppMetaData,
    pub controller_key: PublicKey,
    pub required_namespaces: BTreeMap<String, ProposalNamespace>,
    pub session_namespaces: BTreeMap<String, SessionNamespace>,
    pub is_acknowledged: bool,
}
