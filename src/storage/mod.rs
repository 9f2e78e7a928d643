//! Collaborator stores used by the approval engine.
//!
//! Each store is a trait so the engine can be driven by the in-memory
//! implementations (tests, embedded use) or by the Redis-backed ones.
//!
//! ```text
//! ┌──────────────────┐   ┌──────────────┐   ┌───────────────┐
//! │PendingRequestStore│   │ SessionStore │   │ MetadataStore │
//! └──────────────────┘   └──────────────┘   └───────────────┘
//! ┌──────────────┐   ┌──────────────────┐   ┌───────────┐   ┌──────────┐
//! │ PairingStore │   │VerifyContextStore│   │ EventSink │   │ KeyStore │
//! └──────────────┘   └──────────────────┘   └───────────┘   └──────────┘
//!      memory.rs + redis_store.rs                        memory.rs only
//! ```
//!
//! Key material never goes to Redis; the key store is process-local.
//! A session is only usable with its symmetric key, so `SessionStore`
//! and `MetadataStore` must share the key store's lifetime. The `authd`
//! daemon keeps all three in memory; `RedisStore` sessions only fit a
//! deployment that also persists keys.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::authenticate::error::StorageError;
use crate::authenticate::trace::TelemetryEvent;
use crate::authenticate::types::{
    AppMetaData, AppMetaDataType, AuthenticatedSession, PendingAuthRequest, PublicKey, Topic,
};
use crate::modules::crypto::topic_from_key;
use crate::modules::secure_keys::{KeyError, SymmetricKey};

pub use memory::{
    InMemoryEventSink, InMemoryKeyStore, InMemoryMetadataStore, InMemoryPairingStore,
    InMemoryPendingRequestStore, InMemorySessionStore, InMemoryVerifyContextStore,
};
pub use redis_store::RedisStore;

/// Lookup of session authenticate requests that await the user's decision.
#[async_trait]
pub trait PendingRequestStore: Send + Sync {
    async fn get(&self, id: u64) -> Result<Option<PendingAuthRequest>, StorageError>;

    async fn insert(&self, request: PendingAuthRequest) -> Result<(), StorageError>;
}

/// Key management. Private keys never leave the implementation.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Generate and store a fresh X25519 key pair, returning the public half.
    async fn generate_key_pair(&self) -> Result<PublicKey, KeyError>;

    /// X25519 + HKDF-SHA256 between a stored key pair and a peer public key.
    async fn generate_symmetric_key_from_key_agreement(
        &self,
        self_public_key: &PublicKey,
        peer_public_key: &PublicKey,
    ) -> Result<SymmetricKey, KeyError>;

    fn get_topic_from_key(&self, key: &[u8]) -> Topic {
        Topic(topic_from_key(key))
    }

    async fn set_key(&self, key: &SymmetricKey, topic: &Topic) -> Result<(), KeyError>;

    async fn get_symmetric_key(&self, topic: &Topic) -> Result<SymmetricKey, KeyError>;

    /// Remove the symmetric key stored under `topic`.
    async fn remove_keys(&self, topic: &Topic) -> Result<(), KeyError>;

    /// Discard a generated key pair.
    async fn remove_key_pair(&self, public_key: &PublicKey) -> Result<(), KeyError>;
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert metadata; fails with `AlreadyExists` if the (topic, type) slot is taken.
    async fn insert_or_abort(
        &self,
        topic: &Topic,
        metadata: &AppMetaData,
        kind: AppMetaDataType,
    ) -> Result<(), StorageError>;

    async fn get(
        &self,
        topic: &Topic,
        kind: AppMetaDataType,
    ) -> Result<Option<AppMetaData>, StorageError>;

    async fn delete(&self, topic: &Topic) -> Result<(), StorageError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(
        &self,
        session: &AuthenticatedSession,
        request_id: u64,
    ) -> Result<(), StorageError>;

    async fn get_session(
        &self,
        topic: &Topic,
    ) -> Result<Option<AuthenticatedSession>, StorageError>;

    async fn get_session_by_request_id(
        &self,
        request_id: u64,
    ) -> Result<Option<AuthenticatedSession>, StorageError>;

    async fn delete_session(&self, topic: &Topic) -> Result<(), StorageError>;
}

#[async_trait]
pub trait PairingStore: Send + Sync {
    /// Mark the pairing active and extend its expiry.
    async fn activate(&self, topic: &Topic) -> Result<(), StorageError>;

    async fn is_active(&self, topic: &Topic) -> Result<bool, StorageError>;
}

/// Verify API result attached to an incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Validation {
    Valid,
    Invalid,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyContext {
    pub id: u64,
    pub origin: String,
    pub validation: Validation,
    pub verify_url: String,
    #[serde(default)]
    pub is_scam: Option<bool>,
}

#[async_trait]
pub trait VerifyContextStore: Send + Sync {
    async fn insert(&self, context: VerifyContext) -> Result<(), StorageError>;

    async fn get(&self, id: u64) -> Result<Option<VerifyContext>, StorageError>;

    async fn delete(&self, id: u64) -> Result<(), StorageError>;
}

/// Telemetry sink. Writes are best effort; callers log and swallow errors.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn insert_or_abort(&self, event: &TelemetryEvent) -> Result<(), StorageError>;
}
