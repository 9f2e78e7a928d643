//! Session authenticate approval.
//!
//! A wallet answering a `wc_sessionAuthenticate` request signs one or more
//! CACAOs ("sign in with your account" statements). Approving the request
//! turns those into an authenticated session with the requesting app and
//! tells the app about it over the relay.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐     ┌──────────────────┐     ┌────────────────┐
//! │ PendingRequestStore│────▶│  ApprovalEngine  │────▶│ RelayTransport │
//! └────────────────────┘     │ (orchestrator)   │     │ (subscribe,    │
//!                            └──────────────────┘     │  publish)      │
//!                              │   │    │    │        └────────────────┘
//!            ┌─────────────────┘   │    │    └──────────────┐
//!            ▼                     ▼    ▼                   ▼
//!   ┌────────────────┐  ┌──────────────┐ ┌──────────────┐ ┌─────────────────┐
//!   │ chains (CAIP-2 │  │ key_agreement│ │ CacaoVerifier│ │ SessionAssembler│
//!   │  + namespace)  │  │ (X25519/HKDF)│ │  (EIP-191)   │ │ (accounts, ns)  │
//!   └────────────────┘  └──────────────┘ └──────────────┘ └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use session_authenticate::authenticate::{ApprovalEngine, Collaborators};
//!
//! let engine = Arc::new(ApprovalEngine::new(collaborators, self_metadata));
//! let handle = engine.spawn_approve(request_id, cacaos);
//! match handle.outcome().await {
//!     Ok(approval) => { /* session established on approval.session_topic */ }
//!     Err(e) => { /* report e to the user */ }
//! }
//! ```

pub mod assembler;
pub mod cacao;
pub mod chains;
pub mod engine;
pub mod error;
pub mod key_agreement;
pub mod recaps;
pub mod trace;
pub mod types;

// Re-export main types for convenience
pub use assembler::{build_accounts, SessionAssembler};
pub use cacao::{
    Cacao, CacaoHeader, CacaoPayload, CacaoSignature, CacaoVerifier, Issuer, SignatureVerifier,
};
pub use chains::resolve_chains;
pub use engine::{Approval, ApprovalEngine, ApprovalHandle, Collaborators, RollbackPolicy};
pub use error::{ApproveError, CacaoError, Connectivity, RelayError, StorageError};
pub use key_agreement::{derive_session, SessionKeys};
pub use recaps::ReCap;
pub use trace::{EventKind, TelemetryEvent, Trace, TraceTag};
pub use types::{
    AppMetaData, AppMetaDataType, AuthenticatedSession, Expiry, Participant, PayloadParams,
    PendingAuthRequest, PublicKey, SessionAuthenticateParams, Topic,
};
