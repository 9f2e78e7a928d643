//! JSON-RPC 2.0 payloads exchanged over the relay.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::authenticate::cacao::Cacao;
use crate::authenticate::types::Participant;

pub const JSON_RPC_VERSION: &str = "2.0";
pub const METHOD_SESSION_AUTHENTICATE: &str = "wc_sessionAuthenticate";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResult {
    pub id: u64,
    pub jsonrpc: String,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub id: u64,
    pub jsonrpc: String,
    pub error: ProtocolError,
}

/// Response to a request previously received from a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcResponse {
    Result(JsonRpcResult),
    Error(JsonRpcError),
}

impl JsonRpcResponse {
    pub fn result(id: u64, result: Value) -> Self {
        JsonRpcResponse::Result(JsonRpcResult {
            id,
            jsonrpc: JSON_RPC_VERSION.to_string(),
            result,
        })
    }

    pub fn error(id: u64, error: ProtocolError) -> Self {
        JsonRpcResponse::Error(JsonRpcError {
            id,
            jsonrpc: JSON_RPC_VERSION.to_string(),
            error,
        })
    }

    pub fn id(&self) -> u64 {
        match self {
            JsonRpcResponse::Result(r) => r.id,
            JsonRpcResponse::Error(e) => e.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
}

impl ProtocolError {
    pub fn request_expired() -> Self {
        ProtocolError {
            code: 8000,
            message: "Request expired. Please try again.".to_string(),
        }
    }
}

/// Result body of an approved `wc_sessionAuthenticate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAuthenticateApproveParams {
    pub responder: Participant,
    pub cacaos: Vec<Cacao>,
}
