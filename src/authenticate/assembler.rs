//! Builds and persists the authenticated session record.

use chrono::Utc;
use log::{debug, error, info};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::authenticate::cacao::Cacao;
use crate::authenticate::error::StorageError;
use crate::authenticate::types::{
    AppMetaData, AppMetaDataType, AuthenticatedSession, Expiry, PendingAuthRequest,
    ProposalNamespace, PublicKey, SessionNamespace, Topic, SESSION_EVENTS, SESSION_TTL_SECONDS,
};
use crate::storage::{MetadataStore, SessionStore};

/// `<chain>:<address>` for every chain and address, chain-major, deduplicated.
pub fn build_accounts(chains: &[String], addresses: &[String]) -> Vec<String> {
    let mut accounts: Vec<String> = Vec::with_capacity(chains.len() * addresses.len());
    for chain in chains {
        for address in addresses {
            let account = format!("{}:{}", chain, address);
            if !accounts.contains(&account) {
                accounts.push(account);
            }
        }
    }
    accounts
}

/// Everything the assembler needs from an approval in progress.
pub struct SessionDraft<'a> {
    pub request: &'a PendingAuthRequest,
    pub cacaos: &'a [Cacao],
    pub chains: &'a [String],
    pub addresses: &'a [String],
    pub session_topic: &'a Topic,
    pub self_public_key: &'a PublicKey,
    pub self_metadata: &'a AppMetaData,
}

pub struct SessionAssembler {
    metadata: Arc<dyn MetadataStore>,
    sessions: Arc<dyn SessionStore>,
}

impl SessionAssembler {
    pub fn new(metadata: Arc<dyn MetadataStore>, sessions: Arc<dyn SessionStore>) -> Self {
        SessionAssembler { metadata, sessions }
    }

    /// Build the session, or `None` when the first CACAO grants no methods.
    pub fn assemble(&self, draft: &SessionDraft<'_>) -> Option<AuthenticatedSession> {
        let first = draft.cacaos.first()?;
        let methods = first.p.methods();
        if methods.is_empty() {
            debug!(
                "No ReCap methods granted for request {}, skipping session",
                draft.request.id
            );
            return None;
        }

        let namespace = match first.issuer() {
            Ok(issuer) => issuer.namespace,
            Err(e) => {
                error!("Cannot determine session namespace: {}", e);
                return None;
            }
        };
        let events: Vec<String> = SESSION_EVENTS.iter().map(|e| e.to_string()).collect();
        let accounts = build_accounts(draft.chains, draft.addresses);

        let mut required_namespaces = BTreeMap::new();
        required_namespaces.insert(
            namespace.clone(),
            ProposalNamespace {
                chains: draft.chains.to_vec(),
                methods: methods.clone(),
                events: events.clone(),
            },
        );
        let mut session_namespaces = BTreeMap::new();
        session_namespaces.insert(
            namespace,
            SessionNamespace {
                chains: draft.chains.to_vec(),
                accounts,
                methods,
                events,
            },
        );

        let requester = &draft.request.params.requester;
        Some(AuthenticatedSession {
            topic: draft.session_topic.clone(),
            pairing_topic: draft.request.topic.clone(),
            expiry: Expiry(Utc::now().timestamp() + SESSION_TTL_SECONDS),
            self_public_key: draft.self_public_key.clone(),
            self_metadata: draft.self_metadata.clone(),
            peer_public_key: PublicKey::from_hex(requester.public_key.clone()),
            peer_metadata: requester.metadata.clone(),
            controller_key: draft.self_public_key.clone(),
            required_namespaces,
            session_namespaces,
            is_acknowledged: true,
        })
    }

    /// Store self and peer metadata under the session topic, then the session.
    pub async fn persist(
        &self,
        session: &AuthenticatedSession,
        request_id: u64,
    ) -> Result<(), StorageError> {
        self.metadata
            .insert_or_abort(&session.topic, &session.self_metadata, AppMetaDataType::SelfApp)
            .await?;
        self.metadata
            .insert_or_abort(&session.topic, &session.peer_metadata, AppMetaDataType::Peer)
            .await?;
        self.sessions.insert_session(session, request_id).await?;
        info!(
            "Stored authenticated session {} for request {}",
            session.topic, request_id
        );
        Ok(())
    }

    /// Delete the session and its metadata. Errors are logged, never returned.
    pub async fn rollback(&self, topic: &Topic) {
        if let Err(e) = self.sessions.delete_session(topic).await {
            error!("Failed to delete session {} during rollback: {}", topic, e);
        }
        if let Err(e) = self.metadata.delete(topic).await {
            error!("Failed to delete metadata for {} during rollback: {}", topic, e);
        }
    }
}
