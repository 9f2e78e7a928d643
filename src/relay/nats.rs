//! NATS-backed relay transport.

use async_nats::connection::State;
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::authenticate::error::RelayError;
use crate::authenticate::types::Topic;
use crate::modules::crypto::{base64_decode, base64_encode};
use crate::relay::envelope::Envelope;
use crate::relay::{EnvelopeType, IrnParams, JsonRpcResponse, Participants, RelayTransport};
use crate::storage::KeyStore;

/// Shared NATS client, replaced by the reconnect loop.
pub struct NatsConnection {
    client: Mutex<Option<async_nats::Client>>,
    url: String,
}

impl NatsConnection {
    pub fn new(url: String) -> Self {
        Self {
            client: Mutex::new(None),
            url,
        }
    }

    pub async fn connect(&self) -> Result<(), async_nats::Error> {
        let mut client = self.client.lock().await;
        match async_nats::connect(&self.url).await {
            Ok(new_client) => {
                *client = Some(new_client);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_client(&self) -> Option<async_nats::Client> {
        self.client.lock().await.clone()
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Body published on a topic subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayPublish {
    pub topic: Topic,
    /// Base64 envelope bytes.
    pub message: String,
    pub ttl: u64,
    pub tag: u32,
    pub prompt: bool,
}

/// Decrypted message received on a subscribed topic.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: Topic,
    pub payload: Vec<u8>,
}

pub struct NatsRelay {
    connection: Arc<NatsConnection>,
    keys: Arc<dyn KeyStore>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    subscriptions: Mutex<HashMap<Topic, JoinHandle<()>>>,
}

impl NatsRelay {
    pub fn new(
        connection: Arc<NatsConnection>,
        keys: Arc<dyn KeyStore>,
    ) -> (Self, mpsc::UnboundedReceiver<InboundMessage>) {
        let (inbound, rx) = mpsc::unbounded_channel();
        (
            NatsRelay {
                connection,
                keys,
                inbound,
                subscriptions: Mutex::new(HashMap::new()),
            },
            rx,
        )
    }

    async fn client(&self) -> Result<async_nats::Client, RelayError> {
        let client = self
            .connection
            .get_client()
            .await
            .ok_or(RelayError::NoRelayConnection)?;
        if client.connection_state() == State::Disconnected {
            return Err(RelayError::NoInternetConnection);
        }
        Ok(client)
    }

    async fn seal(
        &self,
        topic: &Topic,
        payload: &[u8],
        envelope: EnvelopeType,
        participants: Option<Participants>,
    ) -> Result<Envelope, RelayError> {
        match envelope {
            EnvelopeType::Zero => {
                let key = self.keys.get_symmetric_key(topic).await?;
                Ok(Envelope::seal(&key, payload, None)?)
            }
            EnvelopeType::One => {
                let participants = participants.ok_or_else(|| {
                    RelayError::Publish("type 1 envelope requires participants".to_string())
                })?;
                let key = self
                    .keys
                    .generate_symmetric_key_from_key_agreement(
                        &participants.sender_public_key,
                        &participants.receiver_public_key,
                    )
                    .await?;
                let sender = participants.sender_public_key.to_bytes()?;
                Ok(Envelope::seal(&key, payload, Some(sender))?)
            }
        }
    }
}

/// Decode and decrypt one relay message for `topic`.
async fn open_inbound(
    keys: &dyn KeyStore,
    topic: &Topic,
    data: &[u8],
) -> Result<Option<Vec<u8>>, RelayError> {
    let publish: RelayPublish = serde_json::from_slice(data)?;
    let bytes = base64_decode(&publish.message)
        .map_err(|e| RelayError::Subscribe(format!("invalid message encoding: {}", e)))?;
    let envelope = Envelope::from_bytes(&bytes)?;
    if envelope.envelope_type == EnvelopeType::One {
        // Session topics only carry type 0 traffic.
        warn!("Dropping type 1 envelope received on {}", topic);
        return Ok(None);
    }
    let key = keys.get_symmetric_key(topic).await?;
    Ok(Some(envelope.open(&key)?))
}

#[async_trait]
impl RelayTransport for NatsRelay {
    async fn subscribe(&self, topic: &Topic) -> Result<(), RelayError> {
        let client = self.client().await?;
        let mut subscriber = client
            .subscribe(topic.to_string())
            .await
            .map_err(|e| RelayError::Subscribe(e.to_string()))?;
        info!("Subscribed to topic {}", topic);

        let keys = self.keys.clone();
        let inbound = self.inbound.clone();
        let task_topic = topic.clone();
        let handle = tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                match open_inbound(keys.as_ref(), &task_topic, &msg.payload).await {
                    Ok(Some(payload)) => {
                        let message = InboundMessage {
                            topic: task_topic.clone(),
                            payload,
                        };
                        if inbound.send(message).is_err() {
                            debug!("Inbound receiver dropped, stopping {}", task_topic);
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => error!("Error handling message on {}: {}", task_topic, e),
                }
            }
        });

        if let Some(previous) = self.subscriptions.lock().await.insert(topic.clone(), handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<(), RelayError> {
        if let Some(handle) = self.subscriptions.lock().await.remove(topic) {
            handle.abort();
            info!("Unsubscribed from topic {}", topic);
        }
        Ok(())
    }

    async fn publish_response(
        &self,
        topic: &Topic,
        irn: IrnParams,
        response: JsonRpcResponse,
        envelope: EnvelopeType,
        participants: Option<Participants>,
    ) -> Result<(), RelayError> {
        let client = self.client().await?;
        let payload = serde_json::to_vec(&response)?;
        let sealed = self.seal(topic, &payload, envelope, participants).await?;

        let body = RelayPublish {
            topic: topic.clone(),
            message: base64_encode(&sealed.to_bytes()),
            ttl: irn.ttl,
            tag: irn.tag,
            prompt: irn.prompt,
        };
        client
            .publish(topic.to_string(), serde_json::to_vec(&body)?.into())
            .await
            .map_err(|e| RelayError::Publish(e.to_string()))?;
        client
            .flush()
            .await
            .map_err(|e| RelayError::Publish(e.to_string()))?;
        debug!(
            "Published response {} on {} (tag {})",
            response.id(),
            topic,
            irn.tag
        );
        Ok(())
    }
}
