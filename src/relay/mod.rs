//! Relay transport: topic subscription and encrypted JSON-RPC publishing.
//!
//! ```text
//! ApprovalEngine ──► RelayTransport ──► NatsRelay ──► NATS subject = topic
//!                         │                 │
//!                         │                 └─ Envelope (type 0 / type 1)
//!                         └─ JsonRpcResponse + IrnParams
//! ```

pub mod envelope;
pub mod json_rpc;
pub mod nats;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::authenticate::error::RelayError;
use crate::authenticate::types::{PendingAuthRequest, PublicKey, Topic};

pub use envelope::Envelope;
pub use json_rpc::{JsonRpcResponse, ProtocolError, SessionAuthenticateApproveParams};
pub use nats::{InboundMessage, NatsConnection, NatsRelay};

/// IRN tags of session authenticate responses.
pub struct Tags;

impl Tags {
    pub const SESSION_AUTHENTICATE_RESPONSE_APPROVE: u32 = 1117;
    pub const SESSION_AUTHENTICATE_RESPONSE_REJECT: u32 = 1118;
}

/// Message TTLs in seconds.
pub struct Ttl;

impl Ttl {
    pub const FIVE_MINUTES: u64 = 300;
    pub const ONE_DAY: u64 = 86_400;
}

/// Relay publish parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrnParams {
    pub tag: u32,
    pub ttl: u64,
    pub prompt: bool,
}

impl IrnParams {
    pub fn approve() -> Self {
        IrnParams {
            tag: Tags::SESSION_AUTHENTICATE_RESPONSE_APPROVE,
            ttl: Ttl::ONE_DAY,
            prompt: false,
        }
    }

    pub fn reject() -> Self {
        IrnParams {
            tag: Tags::SESSION_AUTHENTICATE_RESPONSE_REJECT,
            ttl: Ttl::FIVE_MINUTES,
            prompt: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EnvelopeType {
    Zero = 0,
    One = 1,
}

/// Key agreement parties of a type 1 envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participants {
    pub sender_public_key: PublicKey,
    pub receiver_public_key: PublicKey,
}

#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn subscribe(&self, topic: &Topic) -> Result<(), RelayError>;

    async fn unsubscribe(&self, topic: &Topic) -> Result<(), RelayError>;

    /// Publish a response. Type 1 envelopes need `participants`.
    async fn publish_response(
        &self,
        topic: &Topic,
        irn: IrnParams,
        response: JsonRpcResponse,
        envelope: EnvelopeType,
        participants: Option<Participants>,
    ) -> Result<(), RelayError>;

    /// Answer `request` with a protocol error on the topic it arrived on.
    async fn respond_with_error(
        &self,
        request: &PendingAuthRequest,
        error: ProtocolError,
        irn: IrnParams,
    ) -> Result<(), RelayError> {
        self.publish_response(
            &request.topic,
            irn,
            JsonRpcResponse::error(request.id, error),
            EnvelopeType::Zero,
            None,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_irn_params() {
        assert_eq!(IrnParams::approve().tag, 1117);
        assert_eq!(IrnParams::approve().ttl, 86_400);
        assert_eq!(IrnParams::reject().tag, 1118);
        assert_eq!(IrnParams::reject().ttl, 300);
        assert_eq!(EnvelopeType::One as u8, 1);
    }
}
