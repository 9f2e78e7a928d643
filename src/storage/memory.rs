//! In-memory collaborator implementations.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::authenticate::error::StorageError;
use crate::authenticate::trace::TelemetryEvent;
use crate::authenticate::types::{
    AppMetaData, AppMetaDataType, AuthenticatedSession, PendingAuthRequest, PublicKey, Topic,
};
use crate::modules::crypto::derive_symmetric_key;
use crate::modules::secure_keys::{KeyError, SecureX25519PrivateKey, SymmetricKey};
use crate::storage::{
    EventSink, KeyStore, MetadataStore, PairingStore, PendingRequestStore, SessionStore,
    VerifyContext, VerifyContextStore,
};

/// Process-local key store. Private keys are held zeroize-on-drop.
#[derive(Default)]
pub struct InMemoryKeyStore {
    key_pairs: RwLock<HashMap<PublicKey, SecureX25519PrivateKey>>,
    symmetric_keys: RwLock<HashMap<Topic, SymmetricKey>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn has_key_pair(&self, public_key: &PublicKey) -> bool {
        self.key_pairs.read().await.contains_key(public_key)
    }

    pub async fn has_symmetric_key(&self, topic: &Topic) -> bool {
        self.symmetric_keys.read().await.contains_key(topic)
    }

    pub async fn key_pair_count(&self) -> usize {
        self.key_pairs.read().await.len()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn generate_key_pair(&self) -> Result<PublicKey, KeyError> {
        let private_key = SecureX25519PrivateKey::generate()?;
        let public_key = PublicKey::from_bytes(&private_key.public_key());
        self.key_pairs
            .write()
            .await
            .insert(public_key.clone(), private_key);
        Ok(public_key)
    }

    async fn generate_symmetric_key_from_key_agreement(
        &self,
        self_public_key: &PublicKey,
        peer_public_key: &PublicKey,
    ) -> Result<SymmetricKey, KeyError> {
        let peer = peer_public_key.to_bytes()?;
        let key_pairs = self.key_pairs.read().await;
        let private_key = key_pairs
            .get(self_public_key)
            .ok_or_else(|| KeyError::MissingPrivateKey(self_public_key.to_string()))?;
        derive_symmetric_key(&private_key.perform_ecdh(&peer))
    }

    async fn set_key(&self, key: &SymmetricKey, topic: &Topic) -> Result<(), KeyError> {
        self.symmetric_keys
            .write()
            .await
            .insert(topic.clone(), key.clone());
        Ok(())
    }

    async fn get_symmetric_key(&self, topic: &Topic) -> Result<SymmetricKey, KeyError> {
        self.symmetric_keys
            .read()
            .await
            .get(topic)
            .cloned()
            .ok_or_else(|| KeyError::MissingSymmetricKey(topic.to_string()))
    }

    async fn remove_keys(&self, topic: &Topic) -> Result<(), KeyError> {
        self.symmetric_keys.write().await.remove(topic);
        Ok(())
    }

    async fn remove_key_pair(&self, public_key: &PublicKey) -> Result<(), KeyError> {
        self.key_pairs.write().await.remove(public_key);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPendingRequestStore {
    requests: RwLock<HashMap<u64, PendingAuthRequest>>,
}

impl InMemoryPendingRequestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingRequestStore for InMemoryPendingRequestStore {
    async fn get(&self, id: u64) -> Result<Option<PendingAuthRequest>, StorageError> {
        Ok(self.requests.read().await.get(&id).cloned())
    }

    async fn insert(&self, request: PendingAuthRequest) -> Result<(), StorageError> {
        self.requests.write().await.insert(request.id, request);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Topic, (u64, AuthenticatedSession)>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert_session(
        &self,
        session: &AuthenticatedSession,
        request_id: u64,
    ) -> Result<(), StorageError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.topic) {
            return Err(StorageError::AlreadyExists(session.topic.to_string()));
        }
        sessions.insert(session.topic.clone(), (request_id, session.clone()));
        Ok(())
    }

    async fn get_session(
        &self,
        topic: &Topic,
    ) -> Result<Option<AuthenticatedSession>, StorageError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(topic)
            .map(|(_, session)| session.clone()))
    }

    async fn get_session_by_request_id(
        &self,
        request_id: u64,
    ) -> Result<Option<AuthenticatedSession>, StorageError> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|(id, _)| *id == request_id)
            .map(|(_, session)| session.clone()))
    }

    async fn delete_session(&self, topic: &Topic) -> Result<(), StorageError> {
        self.sessions.write().await.remove(topic);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMetadataStore {
    metadata: RwLock<HashMap<(Topic, AppMetaDataType), AppMetaData>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_empty(&self) -> bool {
        self.metadata.read().await.is_empty()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn insert_or_abort(
        &self,
        topic: &Topic,
        metadata: &AppMetaData,
        kind: AppMetaDataType,
    ) -> Result<(), StorageError> {
        let mut entries = self.metadata.write().await;
        let key = (topic.clone(), kind);
        if entries.contains_key(&key) {
            return Err(StorageError::AlreadyExists(format!("{}:{}", topic, kind)));
        }
        entries.insert(key, metadata.clone());
        Ok(())
    }

    async fn get(
        &self,
        topic: &Topic,
        kind: AppMetaDataType,
    ) -> Result<Option<AppMetaData>, StorageError> {
        Ok(self
            .metadata
            .read()
            .await
            .get(&(topic.clone(), kind))
            .cloned())
    }

    async fn delete(&self, topic: &Topic) -> Result<(), StorageError> {
        self.metadata.write().await.retain(|(t, _), _| t != topic);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPairingStore {
    active: RwLock<HashMap<Topic, bool>>,
}

impl InMemoryPairingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PairingStore for InMemoryPairingStore {
    async fn activate(&self, topic: &Topic) -> Result<(), StorageError> {
        self.active.write().await.insert(topic.clone(), true);
        Ok(())
    }

    async fn is_active(&self, topic: &Topic) -> Result<bool, StorageError> {
        Ok(self.active.read().await.get(topic).copied().unwrap_or(false))
    }
}

#[derive(Default)]
pub struct InMemoryVerifyContextStore {
    contexts: RwLock<HashMap<u64, VerifyContext>>,
}

impl InMemoryVerifyContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VerifyContextStore for InMemoryVerifyContextStore {
    async fn insert(&self, context: VerifyContext) -> Result<(), StorageError> {
        self.contexts.write().await.insert(context.id, context);
        Ok(())
    }

    async fn get(&self, id: u64) -> Result<Option<VerifyContext>, StorageError> {
        Ok(self.contexts.read().await.get(&id).cloned())
    }

    async fn delete(&self, id: u64) -> Result<(), StorageError> {
        self.contexts.write().await.remove(&id);
        Ok(())
    }
}

/// Keeps telemetry events in insertion order.
#[derive(Default)]
pub struct InMemoryEventSink {
    events: RwLock<Vec<TelemetryEvent>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<TelemetryEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn insert_or_abort(&self, event: &TelemetryEvent) -> Result<(), StorageError> {
        let mut events = self.events.write().await;
        if events.iter().any(|e| e.event_id == event.event_id) {
            return Err(StorageError::AlreadyExists(event.event_id.to_string()));
        }
        events.push(event.clone());
        Ok(())
    }
}
