use std::env;

use session_authenticate::{RollbackPolicy, Settings};

#[test]
fn test_settings_from_environment() {
    // Save original environment variables
    let original_subject = env::var("APPROVE_SUBJECT").ok();
    let original_rollback = env::var("ROLLBACK_ON_SUBSCRIBE_FAILURE").ok();

    env::set_var("APPROVE_SUBJECT", "wallet.test.approve");
    env::set_var("ROLLBACK_ON_SUBSCRIBE_FAILURE", "true");
    let settings = Settings::from_env();
    assert_eq!(settings.approve_subject, "wallet.test.approve");
    assert_eq!(settings.rollback_policy(), RollbackPolicy::Symmetric);

    // Without the variables the defaults apply
    env::remove_var("APPROVE_SUBJECT");
    env::remove_var("ROLLBACK_ON_SUBSCRIBE_FAILURE");
    let settings = Settings::from_env();
    assert_eq!(settings.approve_subject, "walletkit.approve");
    assert_eq!(settings.rollback_policy(), RollbackPolicy::PublishOnly);

    // Restore original environment variables
    if let Some(val) = original_subject {
        env::set_var("APPROVE_SUBJECT", val);
    }
    if let Some(val) = original_rollback {
        env::set_var("ROLLBACK_ON_SUBSCRIBE_FAILURE", val);
    }
}

#[test]
fn test_self_metadata_from_settings() {
    let settings = Settings::from_lookup(|name| match name {
        "SELF_NAME" => Some("Acme Wallet".to_string()),
        "SELF_URL" => Some("https://wallet.acme.example".to_string()),
        _ => None,
    });
    let metadata = settings.self_metadata();
    assert_eq!(metadata.name, "Acme Wallet");
    assert_eq!(metadata.url, "https://wallet.acme.example");
    assert_eq!(metadata.description, "");
    assert!(metadata.icons.is_empty());
}
