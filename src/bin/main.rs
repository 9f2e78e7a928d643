use std::sync::Arc;
use std::time::Duration;

use async_nats::Message as NatsMessage;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use session_authenticate::authenticate::{ApproveError, Cacao, SignatureVerifier};
use session_authenticate::relay::{InboundMessage, NatsConnection, NatsRelay};
use session_authenticate::storage::{
    InMemoryKeyStore, InMemoryMetadataStore, InMemorySessionStore, KeyStore, RedisStore,
};
use session_authenticate::{Approval, ApprovalEngine, Collaborators, Settings};

const NATS_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Request published on the approve subject by the wallet UI.
#[derive(Debug, Deserialize)]
struct ApproveCommand {
    id: u64,
    cacaos: Vec<Cacao>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ApproveReply {
    Approved {
        id: u64,
        session_topic: String,
        response_topic: String,
        session_created: bool,
    },
    Failed {
        id: Option<u64>,
        error: String,
    },
}

impl ApproveReply {
    fn from_outcome(id: u64, outcome: Result<Approval, ApproveError>) -> Self {
        match outcome {
            Ok(approval) => ApproveReply::Approved {
                id,
                session_topic: approval.session_topic.to_string(),
                response_topic: approval.response_topic.to_string(),
                session_created: approval.session.is_some(),
            },
            Err(e) => ApproveReply::Failed {
                id: Some(id),
                error: e.to_string(),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let settings = Settings::from_env();
    info!(
        "Starting session authenticate daemon (nats: {}, subject: {})",
        settings.nats_url, settings.approve_subject
    );

    let store = Arc::new(RedisStore::open(&settings.redis_url)?);
    // Sessions live next to their keys so a restart drops both.
    let keys: Arc<dyn KeyStore> = Arc::new(InMemoryKeyStore::new());
    let sessions = Arc::new(InMemorySessionStore::new());
    let metadata = Arc::new(InMemoryMetadataStore::new());

    // Initialize NATS connection
    let nats_connection = Arc::new(NatsConnection::new(settings.nats_url.clone()));
    // Spawn a task to handle NATS connection and reconnection
    let nats_connection_clone = nats_connection.clone();
    tokio::spawn(async move {
        loop {
            let client = nats_connection_clone.get_client().await;
            if client.is_none() {
                info!("NATS client not connected. Attempting to connect...");
                match nats_connection_clone.connect().await {
                    Ok(_) => info!("Successfully connected to NATS server"),
                    Err(e) => {
                        error!(
                            "Failed to connect to NATS server: {}. Retrying in {:?}...",
                            e, NATS_RETRY_INTERVAL
                        );
                        tokio::time::sleep(NATS_RETRY_INTERVAL).await;
                        continue;
                    }
                }
            }
            tokio::time::sleep(NATS_RETRY_INTERVAL).await;
        }
    });

    let (relay, mut inbound) = NatsRelay::new(nats_connection.clone(), keys.clone());
    tokio::spawn(async move {
        while let Some(InboundMessage { topic, payload }) = inbound.recv().await {
            debug!("Received {} bytes on session topic {}", payload.len(), topic);
        }
    });

    let collaborators = Collaborators {
        requests: store.clone(),
        relay: Arc::new(relay),
        keys,
        verifier: Arc::new(SignatureVerifier),
        metadata,
        sessions,
        pairings: store.clone(),
        verify_contexts: store.clone(),
        events: store,
    };
    let engine = Arc::new(
        ApprovalEngine::new(collaborators, settings.self_metadata())
            .with_rollback_policy(settings.rollback_policy())
            .with_timing_logs(settings.enable_timing_logs),
    );

    tokio::select! {
        _ = handle_approve_subscription(
            nats_connection,
            settings.approve_subject.clone(),
            engine.clone(),
        ) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down, waiting for background tasks");
        }
    }
    engine.flush_background().await;

    Ok(())
}

async fn handle_approve_subscription(
    nats_connection: Arc<NatsConnection>,
    subject: String,
    engine: Arc<ApprovalEngine>,
) {
    loop {
        if let Some(client) = nats_connection.get_client().await {
            match client.subscribe(subject.clone()).await {
                Ok(mut subscription) => {
                    info!("Subscribed to NATS subject: {}", subject);
                    while let Some(msg) = subscription.next().await {
                        let client = client.clone();
                        let engine = engine.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_approve_message(msg, &client, engine).await {
                                error!("Error handling approve command: {}", e);
                            }
                        });
                    }
                }
                Err(e) => {
                    error!(
                        "Failed to subscribe to NATS subject: {}. Retrying in {:?}...",
                        e, NATS_RETRY_INTERVAL
                    );
                }
            }
        }
        tokio::time::sleep(NATS_RETRY_INTERVAL).await;
    }
}

async fn handle_approve_message(
    msg: NatsMessage,
    client: &async_nats::Client,
    engine: Arc<ApprovalEngine>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let reply = match serde_json::from_slice::<ApproveCommand>(&msg.payload) {
        Ok(command) => {
            let handle = engine.spawn_approve(command.id, command.cacaos);
            let id = handle.request_id();
            ApproveReply::from_outcome(id, handle.outcome().await)
        }
        Err(e) => {
            warn!("Rejecting malformed approve command: {}", e);
            ApproveReply::Failed {
                id: None,
                error: format!("invalid approve command: {}", e),
            }
        }
    };

    match msg.reply {
        Some(reply_subject) => {
            client
                .publish(reply_subject, serde_json::to_vec(&reply)?.into())
                .await?;
        }
        None => debug!("Approve command without reply subject: {:?}", reply),
    }
    Ok(())
}
