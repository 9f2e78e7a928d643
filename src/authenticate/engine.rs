//! Approval orchestrator for `wc_sessionAuthenticate` requests.

use futures_util::future::join_all;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::task::JoinHandle;

use crate::authenticate::assembler::{SessionAssembler, SessionDraft};
use crate::authenticate::cacao::{Cacao, CacaoVerifier};
use crate::authenticate::chains::resolve_chains;
use crate::authenticate::error::{ApproveError, Connectivity, RelayError, StorageError};
use crate::authenticate::key_agreement::{derive_session, SessionKeys};
use crate::authenticate::trace::{EventKind, TelemetryEvent, Trace, TraceTag};
use crate::authenticate::types::{
    AppMetaData, AuthenticatedSession, Participant, PendingAuthRequest, PublicKey, Topic,
};
use crate::relay::{
    EnvelopeType, IrnParams, JsonRpcResponse, Participants, ProtocolError, RelayTransport,
    SessionAuthenticateApproveParams,
};
use crate::storage::{
    EventSink, KeyStore, MetadataStore, PairingStore, PendingRequestStore, SessionStore,
    VerifyContextStore,
};

/// Everything the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub requests: Arc<dyn PendingRequestStore>,
    pub relay: Arc<dyn RelayTransport>,
    pub keys: Arc<dyn KeyStore>,
    pub verifier: Arc<dyn CacaoVerifier>,
    pub metadata: Arc<dyn MetadataStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub pairings: Arc<dyn PairingStore>,
    pub verify_contexts: Arc<dyn VerifyContextStore>,
    pub events: Arc<dyn EventSink>,
}

/// Which relay failures undo the persisted session and key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RollbackPolicy {
    /// Only a publish failure rolls back; a subscribe failure leaves state in place.
    #[default]
    PublishOnly,
    /// Subscribe failures roll back too.
    Symmetric,
}

/// Successful approval.
#[derive(Debug, Clone)]
pub struct Approval {
    pub request_id: u64,
    pub session_topic: Topic,
    pub response_topic: Topic,
    pub pairing_topic: Topic,
    pub self_public_key: PublicKey,
    /// `None` when the CACAOs granted no methods.
    pub session: Option<AuthenticatedSession>,
    pub trace: Trace,
}

/// One-shot handle to a spawned approval. Awaiting consumes it.
pub struct ApprovalHandle {
    request_id: u64,
    handle: JoinHandle<Result<Approval, ApproveError>>,
}

impl ApprovalHandle {
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub async fn outcome(self) -> Result<Approval, ApproveError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(ApproveError::Aborted(e.to_string())),
        }
    }
}

/// Detached work whose failures must not reach the caller.
#[derive(Default)]
struct BackgroundTasks {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundTasks {
    fn lock(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut handles = self.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(tokio::spawn(task));
    }

    async fn flush(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = self.lock().drain(..).collect();
            if pending.is_empty() {
                return;
            }
            for result in join_all(pending).await {
                if let Err(e) = result {
                    error!("Background task failed: {}", e);
                }
            }
        }
    }
}

/// Releases the request id when the approval finishes.
struct InFlightGuard<'a> {
    ids: &'a Mutex<HashSet<u64>>,
    id: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

pub struct ApprovalEngine {
    collaborators: Collaborators,
    assembler: SessionAssembler,
    self_metadata: AppMetaData,
    rollback_policy: RollbackPolicy,
    enable_timing_logs: bool,
    in_flight: Mutex<HashSet<u64>>,
    background: BackgroundTasks,
}

impl ApprovalEngine {
    pub fn new(collaborators: Collaborators, self_metadata: AppMetaData) -> Self {
        let assembler =
            SessionAssembler::new(collaborators.metadata.clone(), collaborators.sessions.clone());
        ApprovalEngine {
            collaborators,
            assembler,
            self_metadata,
            rollback_policy: RollbackPolicy::default(),
            enable_timing_logs: false,
            in_flight: Mutex::new(HashSet::new()),
            background: BackgroundTasks::default(),
        }
    }

    pub fn with_rollback_policy(mut self, policy: RollbackPolicy) -> Self {
        self.rollback_policy = policy;
        self
    }

    pub fn with_timing_logs(mut self, enabled: bool) -> Self {
        self.enable_timing_logs = enabled;
        self
    }

    /// Run the approval on its own task.
    pub fn spawn_approve(self: &Arc<Self>, id: u64, cacaos: Vec<Cacao>) -> ApprovalHandle {
        let engine = Arc::clone(self);
        ApprovalHandle {
            request_id: id,
            handle: tokio::spawn(async move { engine.approve(id, cacaos).await }),
        }
    }

    /// Wait for outstanding telemetry writes and post-approval cleanup.
    pub async fn flush_background(&self) {
        self.background.flush().await;
    }

    /// Approve session authenticate request `id` with the user's signed CACAOs.
    pub async fn approve(&self, id: u64, cacaos: Vec<Cacao>) -> Result<Approval, ApproveError> {
        let started = Instant::now();
        let _guard = self.acquire(id)?;

        let mut trace = Trace::new();
        trace.push(TraceTag::SessionAuthenticateApproveStarted);
        info!("Approving session authenticate request {}", id);

        let result = self.run(id, cacaos, &mut trace).await;
        match &result {
            Ok(approval) => info!(
                "Session authenticate request {} approved on session topic {}",
                id, approval.session_topic
            ),
            Err(e) => error!("Session authenticate request {} failed: {}", id, e),
        }
        if self.enable_timing_logs {
            info!("Approval of request {} took {:?}", id, started.elapsed());
        }
        result
    }

    fn acquire(&self, id: u64) -> Result<InFlightGuard<'_>, ApproveError> {
        let mut ids = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !ids.insert(id) {
            warn!("Request {} is already being approved", id);
            return Err(ApproveError::AlreadyInFlight { id });
        }
        Ok(InFlightGuard {
            ids: &self.in_flight,
            id,
        })
    }

    async fn run(
        &self,
        id: u64,
        cacaos: Vec<Cacao>,
        trace: &mut Trace,
    ) -> Result<Approval, ApproveError> {
        let c = &self.collaborators;

        if cacaos.is_empty() {
            self.record(EventKind::AuthenticatedSessionApproveFailure, trace, None);
            return Err(ApproveError::EmptyCacaos);
        }

        let request = match c.requests.get(id).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                self.record(EventKind::MissingSessionAuthenticateRequest, trace, None);
                return Err(ApproveError::MissingRequest { id });
            }
            Err(e) => {
                self.record(EventKind::AuthenticatedSessionApproveFailure, trace, None);
                return Err(e.into());
            }
        };

        if request.expiry.is_some_and(|expiry| expiry.is_expired()) {
            return Err(self.reject_expired(&request, trace).await);
        }
        trace.push(TraceTag::AuthenticatedSessionNotExpired);

        let chains = match resolve_chains(&cacaos, &request.params.auth_payload.chains) {
            Ok(chains) => chains,
            Err(e) => {
                let kind = match &e {
                    ApproveError::UnsupportedNamespace { .. } => {
                        trace.push(TraceTag::ChainsCaip2Compliant);
                        EventKind::ChainsEvmCompliantFailure
                    }
                    _ => EventKind::ChainsCaip2CompliantFailure,
                };
                self.record(kind, trace, Some(&request.topic));
                return Err(e);
            }
        };
        trace.push(TraceTag::ChainsCaip2Compliant);
        trace.push(TraceTag::ChainsEvmCompliant);

        let peer_public_key = PublicKey::from_hex(request.params.requester.public_key.clone());
        let keys = match derive_session(c.keys.as_ref(), &peer_public_key).await {
            Ok(keys) => keys,
            Err(e) => {
                self.record(
                    EventKind::AuthenticatedSessionApproveFailure,
                    trace,
                    Some(&request.topic),
                );
                return Err(ApproveError::KeyAgreement(e));
            }
        };
        trace.push(TraceTag::CreateAuthenticatedSessionTopic);

        let verified = join_all(cacaos.iter().map(|cacao| c.verifier.verify(cacao))).await;
        if verified.iter().any(|ok| !ok) {
            self.discard_key_pair(&keys.self_public_key).await;
            self.record(EventKind::InvalidCacao, trace, Some(&keys.session_topic));
            return Err(ApproveError::SignatureInvalid);
        }
        trace.push(TraceTag::CacaosVerified);
        let addresses = issuer_addresses(&cacaos);

        let session = self.assembler.assemble(&SessionDraft {
            request: &request,
            cacaos: &cacaos,
            chains: &chains,
            addresses: &addresses,
            session_topic: &keys.session_topic,
            self_public_key: &keys.self_public_key,
            self_metadata: &self.self_metadata,
        });
        if let Some(session) = &session {
            if let Err(e) = self.assembler.persist(session, id).await {
                self.rollback(&keys, true, false).await;
                self.record(
                    EventKind::AuthenticatedSessionApproveFailure,
                    trace,
                    Some(&keys.session_topic),
                );
                return Err(e.into());
            }
        }
        if let Err(e) = c.keys.set_key(&keys.symmetric_key, &keys.session_topic).await {
            self.rollback(&keys, session.is_some(), false).await;
            self.record(
                EventKind::AuthenticatedSessionApproveFailure,
                trace,
                Some(&keys.session_topic),
            );
            return Err(StorageError::Key(e).into());
        }
        if session.is_some() {
            trace.push(TraceTag::StoreAuthenticatedSession);
        }

        trace.push(TraceTag::SubscribingAuthenticatedSessionTopic);
        if let Err(e) = c.relay.subscribe(&keys.session_topic).await {
            let (kind, err) = relay_failure(
                e,
                EventKind::SubscribeAuthenticatedSessionTopicFailure,
                |reason| ApproveError::SubscribeFailure {
                    topic: keys.session_topic.clone(),
                    reason,
                },
            );
            if self.rollback_policy == RollbackPolicy::Symmetric {
                self.rollback(&keys, session.is_some(), false).await;
            }
            self.record(kind, trace, Some(&keys.session_topic));
            return Err(err);
        }
        trace.push(TraceTag::SubscribeAuthenticatedSessionTopicSuccess);

        trace.push(TraceTag::PublishingAuthenticatedSessionApprove);
        if let Err(err) = self
            .publish_approval(&request, &keys, &peer_public_key, cacaos)
            .await
        {
            let (kind, err) = match err {
                PublishError::Relay(e) => relay_failure(
                    e,
                    EventKind::AuthenticatedSessionApprovePublishFailure,
                    |reason| ApproveError::PublishFailure {
                        topic: keys.response_topic.clone(),
                        reason,
                    },
                ),
                PublishError::Encode(reason) => (
                    EventKind::AuthenticatedSessionApprovePublishFailure,
                    ApproveError::PublishFailure {
                        topic: keys.response_topic.clone(),
                        reason,
                    },
                ),
            };
            self.rollback(&keys, session.is_some(), true).await;
            self.record(kind, trace, Some(&keys.response_topic));
            return Err(err);
        }
        trace.push(TraceTag::AuthenticatedSessionApprovePublishSuccess);

        self.activate_pairing(id, request.topic.clone());

        Ok(Approval {
            request_id: id,
            session_topic: keys.session_topic,
            response_topic: keys.response_topic,
            pairing_topic: request.topic,
            self_public_key: keys.self_public_key,
            session,
            trace: trace.clone(),
        })
    }

    async fn reject_expired(&self, request: &PendingAuthRequest, trace: &Trace) -> ApproveError {
        warn!("Session authenticate request {} has expired", request.id);
        if let Err(e) = self
            .collaborators
            .relay
            .respond_with_error(
                request,
                ProtocolError::request_expired(),
                IrnParams::reject(),
            )
            .await
        {
            error!("Failed to send expiry error for request {}: {}", request.id, e);
        }
        self.record(
            EventKind::SessionAuthenticateRequestExpired,
            trace,
            Some(&request.topic),
        );
        ApproveError::RequestExpired { id: request.id }
    }

    async fn publish_approval(
        &self,
        request: &PendingAuthRequest,
        keys: &SessionKeys,
        peer_public_key: &PublicKey,
        cacaos: Vec<Cacao>,
    ) -> Result<(), PublishError> {
        let params = SessionAuthenticateApproveParams {
            responder: Participant {
                public_key: keys.self_public_key.key_as_hex().to_string(),
                metadata: self.self_metadata.clone(),
            },
            cacaos,
        };
        let result =
            serde_json::to_value(&params).map_err(|e| PublishError::Encode(e.to_string()))?;
        let participants = Participants {
            sender_public_key: keys.self_public_key.clone(),
            receiver_public_key: peer_public_key.clone(),
        };
        self.collaborators
            .relay
            .publish_response(
                &keys.response_topic,
                IrnParams::approve(),
                JsonRpcResponse::result(request.id, result),
                EnvelopeType::One,
                Some(participants),
            )
            .await
            .map_err(PublishError::Relay)
    }

    /// Undo what an approval stored. Errors are logged and swallowed.
    async fn rollback(&self, keys: &SessionKeys, session_persisted: bool, subscribed: bool) {
        let c = &self.collaborators;
        info!("Rolling back authenticated session {}", keys.session_topic);
        if subscribed {
            if let Err(e) = c.relay.unsubscribe(&keys.session_topic).await {
                error!("Failed to unsubscribe {} during rollback: {}", keys.session_topic, e);
            }
        }
        if let Err(e) = c.keys.remove_keys(&keys.session_topic).await {
            error!("Failed to remove key for {} during rollback: {}", keys.session_topic, e);
        }
        if session_persisted {
            self.assembler.rollback(&keys.session_topic).await;
        } else if let Err(e) = c.metadata.delete(&keys.session_topic).await {
            error!("Failed to delete metadata for {} during rollback: {}", keys.session_topic, e);
        }
        self.discard_key_pair(&keys.self_public_key).await;
    }

    async fn discard_key_pair(&self, public_key: &PublicKey) {
        if let Err(e) = self.collaborators.keys.remove_key_pair(public_key).await {
            error!("Failed to discard key pair {}: {}", public_key, e);
        }
    }

    fn activate_pairing(&self, id: u64, pairing_topic: Topic) {
        let pairings = self.collaborators.pairings.clone();
        let verify_contexts = self.collaborators.verify_contexts.clone();
        self.background.spawn(async move {
            match pairings.activate(&pairing_topic).await {
                Ok(()) => debug!("Activated pairing {}", pairing_topic),
                Err(e) => error!("Failed to activate pairing {}: {}", pairing_topic, e),
            }
            if let Err(e) = verify_contexts.delete(id).await {
                error!("Failed to delete verify context {}: {}", id, e);
            }
        });
    }

    fn record(&self, kind: EventKind, trace: &Trace, topic: Option<&Topic>) {
        let event = TelemetryEvent::new(kind, trace.clone(), topic.cloned());
        let events = self.collaborators.events.clone();
        self.background.spawn(async move {
            if let Err(e) = events.insert_or_abort(&event).await {
                error!("Failed to record {:?} event: {}", event.kind, e);
            }
        });
    }
}

enum PublishError {
    Relay(RelayError),
    Encode(String),
}

/// Map a relay error to its telemetry kind and terminal error.
fn relay_failure(
    e: RelayError,
    kind: EventKind,
    otherwise: impl FnOnce(String) -> ApproveError,
) -> (EventKind, ApproveError) {
    match e.connectivity() {
        Some(Connectivity::NoRelay) => (
            EventKind::NoWssConnection,
            ApproveError::Connectivity(Connectivity::NoRelay),
        ),
        Some(Connectivity::NoInternet) => (
            EventKind::NoInternetConnection,
            ApproveError::Connectivity(Connectivity::NoInternet),
        ),
        None => (kind, otherwise(e.to_string())),
    }
}

/// Distinct issuer addresses, first-seen order.
fn issuer_addresses(cacaos: &[Cacao]) -> Vec<String> {
    let mut addresses: Vec<String> = Vec::new();
    for cacao in cacaos {
        match cacao.issuer() {
            Ok(issuer) => {
                if !addresses.contains(&issuer.address) {
                    addresses.push(issuer.address);
                }
            }
            Err(e) => warn!("Skipping CACAO with unparseable issuer: {}", e),
        }
    }
    addresses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticate::cacao::{CacaoHeader, CacaoPayload, CacaoSignature};

    fn cacao(iss: &str) -> Cacao {
        Cacao {
            h: CacaoHeader { t: "caip122".into() },
            p: CacaoPayload {
                iss: iss.into(),
                domain: "d".into(),
                aud: "a".into(),
                version: "1".into(),
                nonce: "n".into(),
                iat: "i".into(),
                nbf: None,
                exp: None,
                statement: None,
                request_id: None,
                resources: None,
            },
            s: CacaoSignature {
                t: "eip191".into(),
                s: "0x".into(),
                m: None,
            },
        }
    }

    #[test]
    fn test_issuer_addresses_dedup() {
        let cacaos = vec![
            cacao("did:pkh:eip155:1:0xA"),
            cacao("did:pkh:eip155:137:0xB"),
            cacao("did:pkh:eip155:10:0xA"),
        ];
        assert_eq!(issuer_addresses(&cacaos), vec!["0xA", "0xB"]);
    }

    #[test]
    fn test_relay_failure_mapping() {
        let (kind, err) = relay_failure(
            RelayError::NoInternetConnection,
            EventKind::AuthenticatedSessionApprovePublishFailure,
            |_| ApproveError::SignatureInvalid,
        );
        assert_eq!(kind, EventKind::NoInternetConnection);
        assert!(matches!(err, ApproveError::Connectivity(Connectivity::NoInternet)));

        let (kind, err) = relay_failure(
            RelayError::Publish("timeout".into()),
            EventKind::AuthenticatedSessionApprovePublishFailure,
            ApproveError::Aborted,
        );
        assert_eq!(kind, EventKind::AuthenticatedSessionApprovePublishFailure);
        assert!(matches!(err, ApproveError::Aborted(r) if r.contains("timeout")));
    }

    #[tokio::test]
    async fn test_background_flush_waits_for_tasks() {
        let tasks = BackgroundTasks::default();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for i in 0..3 {
            let tx = tx.clone();
            tasks.spawn(async move {
                tokio::task::yield_now().await;
                let _ = tx.send(i);
            });
        }
        tasks.flush().await;
        drop(tx);
        let mut seen = Vec::new();
        while let Some(i) = rx.recv().await {
            seen.push(i);
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
