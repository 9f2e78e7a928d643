//! Environment-driven settings for the approval daemon.

use std::env;

use crate::authenticate::engine::RollbackPolicy;
use crate::authenticate::types::AppMetaData;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub nats_url: String,
    pub redis_url: String,
    pub approve_subject: String,
    pub self_name: String,
    pub self_description: String,
    pub self_url: String,
    pub self_icons: Vec<String>,
    pub self_redirect: Option<String>,
    pub rollback_on_subscribe_failure: bool,
    pub enable_timing_logs: bool,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build settings from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |name: &str| {
            lookup(name)
                .unwrap_or_else(|| "false".to_string())
                .parse()
                .unwrap_or(false)
        };

        Settings {
            nats_url: lookup("NATS_URL").unwrap_or_else(|| "nats://localhost:4222".to_string()),
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            approve_subject: lookup("APPROVE_SUBJECT")
                .unwrap_or_else(|| "walletkit.approve".to_string()),
            self_name: lookup("SELF_NAME").unwrap_or_else(|| "Wallet".to_string()),
            self_description: lookup("SELF_DESCRIPTION").unwrap_or_default(),
            self_url: lookup("SELF_URL").unwrap_or_else(|| "https://localhost".to_string()),
            self_icons: lookup("SELF_ICONS")
                .map(|icons| {
                    icons
                        .split(',')
                        .map(str::trim)
                        .filter(|icon| !icon.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            self_redirect: lookup("SELF_REDIRECT").filter(|r| !r.is_empty()),
            rollback_on_subscribe_failure: flag("ROLLBACK_ON_SUBSCRIBE_FAILURE"),
            enable_timing_logs: flag("ENABLE_TIMING_LOGS"),
        }
    }

    pub fn self_metadata(&self) -> AppMetaData {
        AppMetaData {
            name: self.self_name.clone(),
            description: self.self_description.clone(),
            url: self.self_url.clone(),
            icons: self.self_icons.clone(),
            redirect: self.self_redirect.clone(),
        }
    }

    pub fn rollback_policy(&self) -> RollbackPolicy {
        if self.rollback_on_subscribe_failure {
            RollbackPolicy::Symmetric
        } else {
            RollbackPolicy::PublishOnly
        }
    }
}
