//! Error types for session authenticate approval.

use thiserror::Error;

use crate::authenticate::types::Topic;
use crate::modules::secure_keys::KeyError;

/// Terminal outcome of a failed approval.
#[derive(Debug, Error)]
pub enum ApproveError {
    #[error("No pending session authenticate request for id {id}")]
    MissingRequest { id: u64 },

    #[error("This request has expired, id: {id}")]
    RequestExpired { id: u64 },

    #[error("Chain {chain} is not CAIP-2 compliant")]
    ChainCompliance { chain: String },

    #[error("Only eip155 (EVM) is supported, got namespace {namespace} in chain {chain}")]
    UnsupportedNamespace { chain: String, namespace: String },

    #[error("Signature verification failed Session Authenticate, please try again")]
    SignatureInvalid,

    #[error("At least one CACAO is required to approve session authenticate")]
    EmptyCacaos,

    #[error("Session authenticate request {id} is already being approved")]
    AlreadyInFlight { id: u64 },

    #[error("Key agreement failed: {0}")]
    KeyAgreement(#[source] KeyError),

    #[error("Failed to subscribe to session topic {topic}: {reason}")]
    SubscribeFailure { topic: Topic, reason: String },

    #[error("Failed to publish session authenticate approval on topic {topic}: {reason}")]
    PublishFailure { topic: Topic, reason: String },

    #[error("Connectivity error: {0}")]
    Connectivity(Connectivity),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Approval task aborted: {0}")]
    Aborted(String),
}

/// The two connectivity failures tagged separately for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Connectivity {
    #[error("no relay connection")]
    NoRelay,

    #[error("no internet connection")]
    NoInternet,
}

/// Errors raised by the relay transport.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("No relay connection")]
    NoRelayConnection,

    #[error("No internet connection")]
    NoInternetConnection,

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Envelope error: {0}")]
    Envelope(#[from] KeyError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    pub fn connectivity(&self) -> Option<Connectivity> {
        match self {
            RelayError::NoRelayConnection => Some(Connectivity::NoRelay),
            RelayError::NoInternetConnection => Some(Connectivity::NoInternet),
            _ => None,
        }
    }
}

/// Errors from the persistent stores.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Redis operation failed: {0}")]
    RedisError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Entry already exists: {0}")]
    AlreadyExists(String),

    #[error("Key store error: {0}")]
    Key(#[from] KeyError),
}

impl From<redis::RedisError> for StorageError {
    fn from(e: redis::RedisError) -> Self {
        StorageError::RedisError(e.to_string())
    }
}

/// Errors while interpreting or verifying a CACAO.
#[derive(Debug, Error)]
pub enum CacaoError {
    #[error("Invalid issuer: {0}")]
    InvalidIssuer(String),

    #[error("Invalid ReCap resource: {0}")]
    InvalidRecap(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Unsupported signature type: {0}")]
    UnsupportedSignatureType(String),

    #[error("Signature does not match issuer address {expected}, recovered {recovered}")]
    AddressMismatch { expected: String, recovered: String },
}
