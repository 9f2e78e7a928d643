//! Redis-backed stores. Values are serde_json strings.

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use redis::{AsyncCommands, Client as RedisClient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::authenticate::error::StorageError;
use crate::authenticate::trace::TelemetryEvent;
use crate::authenticate::types::{
    AppMetaData, AppMetaDataType, AuthenticatedSession, PendingAuthRequest, Topic,
};
use crate::storage::{
    EventSink, MetadataStore, PairingStore, PendingRequestStore, SessionStore, VerifyContext,
    VerifyContextStore,
};

/// Active pairings are kept for 30 days after activation.
const PAIRING_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

/// Verify contexts are dropped after a day if nothing consumes them.
const VERIFY_CONTEXT_TTL_SECONDS: u64 = 24 * 60 * 60;

/// Newest telemetry events kept in the `wc:events` list.
const MAX_EVENTS: isize = 10_000;

/// Session record together with the request id it was approved for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    request_id: u64,
    session: AuthenticatedSession,
}

/// All persistent stores over one Redis client.
#[derive(Clone)]
pub struct RedisStore {
    redis_client: Arc<RedisClient>,
}

impl RedisStore {
    pub fn new(redis_client: Arc<RedisClient>) -> Self {
        Self { redis_client }
    }

    pub fn open(url: &str) -> Result<Self, StorageError> {
        Ok(Self::new(Arc::new(RedisClient::open(url)?)))
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StorageError> {
        Ok(self.redis_client.get_multiplexed_async_connection().await?)
    }

    // Redis key constructors
    fn pending_key(&self, id: u64) -> String {
        format!("wc:pending:{}", id)
    }

    fn session_key(&self, topic: &Topic) -> String {
        format!("wc:session:{}", topic)
    }

    fn session_request_key(&self, request_id: u64) -> String {
        format!("wc:session:request:{}", request_id)
    }

    fn metadata_key(&self, topic: &Topic, kind: AppMetaDataType) -> String {
        format!("wc:metadata:{}:{}", topic, kind)
    }

    fn pairing_key(&self, topic: &Topic) -> String {
        format!("wc:pairing:{}", topic)
    }

    fn verify_key(&self, id: u64) -> String {
        format!("wc:verify:{}", id)
    }

    /// Append an event and trim the list to the newest `MAX_EVENTS`.
    fn push_event(&self, json: String) -> redis::Pipeline {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .rpush(self.events_key(), json)
            .ignore()
            .ltrim(self.events_key(), -MAX_EVENTS, -1)
            .ignore();
        pipe
    }

    fn events_key(&self) -> &'static str {
        "wc:events"
    }
}

#[async_trait]
impl PendingRequestStore for RedisStore {
    async fn get(&self, id: u64) -> Result<Option<PendingAuthRequest>, StorageError> {
        let mut conn = self.connection().await?;
        let json: Option<String> = conn.get(self.pending_key(id)).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, request: PendingAuthRequest) -> Result<(), StorageError> {
        let mut conn = self.connection().await?;
        let key = self.pending_key(request.id);
        let json = serde_json::to_string(&request)?;
        match request.expiry {
            Some(expiry) => {
                let ttl = (expiry.0 - Utc::now().timestamp()).max(1) as u64;
                let _: () = conn.set_ex(&key, json, ttl).await?;
            }
            None => {
                let _: () = conn.set(&key, json).await?;
            }
        }
        debug!("Stored pending request {}", request.id);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn insert_session(
        &self,
        session: &AuthenticatedSession,
        request_id: u64,
    ) -> Result<(), StorageError> {
        let mut conn = self.connection().await?;
        let session_key = self.session_key(&session.topic);
        let record = serde_json::to_string(&StoredSession {
            request_id,
            session: session.clone(),
        })?;

        let inserted: bool = conn.set_nx(&session_key, record).await?;
        if !inserted {
            return Err(StorageError::AlreadyExists(session_key));
        }
        let ttl = (session.expiry.0 - Utc::now().timestamp()).max(1);
        let _: () = conn.expire(&session_key, ttl).await?;
        let _: () = conn
            .set_ex(
                self.session_request_key(request_id),
                session.topic.value(),
                ttl as u64,
            )
            .await?;

        info!(
            "Stored session {} for request {} in Redis",
            session.topic, request_id
        );
        Ok(())
    }

    async fn get_session(
        &self,
        topic: &Topic,
    ) -> Result<Option<AuthenticatedSession>, StorageError> {
        let mut conn = self.connection().await?;
        let json: Option<String> = conn.get(self.session_key(topic)).await?;
        match json {
            Some(json) => {
                let record: StoredSession = serde_json::from_str(&json)?;
                Ok(Some(record.session))
            }
            None => Ok(None),
        }
    }

    async fn get_session_by_request_id(
        &self,
        request_id: u64,
    ) -> Result<Option<AuthenticatedSession>, StorageError> {
        let mut conn = self.connection().await?;
        let topic: Option<String> = conn.get(self.session_request_key(request_id)).await?;
        match topic {
            Some(topic) => self.get_session(&Topic(topic)).await,
            None => Ok(None),
        }
    }

    async fn delete_session(&self, topic: &Topic) -> Result<(), StorageError> {
        let mut conn = self.connection().await?;
        let session_key = self.session_key(topic);
        let json: Option<String> = conn.get(&session_key).await?;
        if let Some(json) = json {
            let record: StoredSession = serde_json::from_str(&json)?;
            let _: () = conn.del(self.session_request_key(record.request_id)).await?;
        }
        let _: () = conn.del(&session_key).await?;
        debug!("Deleted session {}", topic);
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for RedisStore {
    async fn insert_or_abort(
        &self,
        topic: &Topic,
        metadata: &AppMetaData,
        kind: AppMetaDataType,
    ) -> Result<(), StorageError> {
        let mut conn = self.connection().await?;
        let key = self.metadata_key(topic, kind);
        let inserted: bool = conn.set_nx(&key, serde_json::to_string(metadata)?).await?;
        if !inserted {
            return Err(StorageError::AlreadyExists(key));
        }
        Ok(())
    }

    async fn get(
        &self,
        topic: &Topic,
        kind: AppMetaDataType,
    ) -> Result<Option<AppMetaData>, StorageError> {
        let mut conn = self.connection().await?;
        let json: Option<String> = conn.get(self.metadata_key(topic, kind)).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, topic: &Topic) -> Result<(), StorageError> {
        let mut conn = self.connection().await?;
        let keys = vec![
            self.metadata_key(topic, AppMetaDataType::SelfApp),
            self.metadata_key(topic, AppMetaDataType::Peer),
        ];
        let _: () = conn.del(keys).await?;
        Ok(())
    }
}

#[async_trait]
impl PairingStore for RedisStore {
    async fn activate(&self, topic: &Topic) -> Result<(), StorageError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .set_ex(self.pairing_key(topic), "active", PAIRING_TTL_SECONDS as u64)
            .await?;
        debug!("Activated pairing {}", topic);
        Ok(())
    }

    async fn is_active(&self, topic: &Topic) -> Result<bool, StorageError> {
        let mut conn = self.connection().await?;
        let state: Option<String> = conn.get(self.pairing_key(topic)).await?;
        Ok(state.as_deref() == Some("active"))
    }
}

#[async_trait]
impl VerifyContextStore for RedisStore {
    async fn insert(&self, context: VerifyContext) -> Result<(), StorageError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .set_ex(
                self.verify_key(context.id),
                serde_json::to_string(&context)?,
                VERIFY_CONTEXT_TTL_SECONDS,
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: u64) -> Result<Option<VerifyContext>, StorageError> {
        let mut conn = self.connection().await?;
        let json: Option<String> = conn.get(self.verify_key(id)).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: u64) -> Result<(), StorageError> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(self.verify_key(id)).await?;
        Ok(())
    }
}

#[async_trait]
impl EventSink for RedisStore {
    async fn insert_or_abort(&self, event: &TelemetryEvent) -> Result<(), StorageError> {
        let mut conn = self.connection().await?;
        let _: () = self
            .push_event(serde_json::to_string(event)?)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
