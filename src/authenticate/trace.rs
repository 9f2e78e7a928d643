//! Diagnostic trace and telemetry events for the approval flow.

use chrono::Utc;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::authenticate::types::Topic;

/// Milestones reached by an approval, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceTag {
    SessionAuthenticateApproveStarted,
    AuthenticatedSessionNotExpired,
    ChainsCaip2Compliant,
    ChainsEvmCompliant,
    CreateAuthenticatedSessionTopic,
    CacaosVerified,
    StoreAuthenticatedSession,
    SubscribingAuthenticatedSessionTopic,
    SubscribeAuthenticatedSessionTopicSuccess,
    PublishingAuthenticatedSessionApprove,
    AuthenticatedSessionApprovePublishSuccess,
}

/// Append-only list of reached milestones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace(Vec<TraceTag>);

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tag: TraceTag) {
        self.0.push(tag);
    }

    pub fn tags(&self) -> &[TraceTag] {
        &self.0
    }

    pub fn contains(&self, tag: TraceTag) -> bool {
        self.0.contains(&tag)
    }

    pub fn last(&self) -> Option<TraceTag> {
        self.0.last().copied()
    }
}

/// Failure kinds reported to the event sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MissingSessionAuthenticateRequest,
    SessionAuthenticateRequestExpired,
    ChainsCaip2CompliantFailure,
    ChainsEvmCompliantFailure,
    InvalidCacao,
    SubscribeAuthenticatedSessionTopicFailure,
    AuthenticatedSessionApprovePublishFailure,
    NoWssConnection,
    NoInternetConnection,
    AuthenticatedSessionApproveFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceProperties {
    pub trace: Trace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<Topic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub event_id: u64,
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
    pub kind: EventKind,
    pub properties: TraceProperties,
}

impl TelemetryEvent {
    pub fn new(kind: EventKind, trace: Trace, topic: Option<Topic>) -> Self {
        TelemetryEvent {
            event_id: OsRng.next_u64(),
            timestamp: Utc::now().timestamp_millis(),
            kind,
            properties: TraceProperties { trace, topic },
        }
    }
}
