extern crate hex;
extern crate serde;

// Session authenticate approval flow
pub mod authenticate;

// Environment settings for the daemon
pub mod config;

// Key material and symmetric crypto primitives
pub mod modules;

// Relay transport (NATS)
pub mod relay;

// Collaborator stores (in-memory and Redis)
pub mod storage;

pub use authenticate::{
    Approval, ApprovalEngine, ApprovalHandle, ApproveError, Cacao, Collaborators, RollbackPolicy,
};
pub use config::Settings;
