//! Session key derivation for an approval.

use log::debug;

use crate::authenticate::types::{PublicKey, Topic};
use crate::modules::secure_keys::{KeyError, SymmetricKey};
use crate::storage::KeyStore;

/// Key material and topics of a new authenticated session.
#[derive(Debug, Clone)]
pub struct SessionKeys {
    pub self_public_key: PublicKey,
    pub symmetric_key: SymmetricKey,
    /// `hex(SHA-256(peer public key))`; the requester listens here.
    pub response_topic: Topic,
    /// `hex(SHA-256(symmetric key))`.
    pub session_topic: Topic,
}

/// Generate a fresh key pair and agree a session key with `peer_public_key`.
///
/// The peer key is validated before anything is generated, so a malformed
/// key leaves nothing behind in the key store.
pub async fn derive_session(
    keys: &dyn KeyStore,
    peer_public_key: &PublicKey,
) -> Result<SessionKeys, KeyError> {
    let peer_bytes = peer_public_key.to_bytes()?;

    let self_public_key = keys.generate_key_pair().await?;
    let symmetric_key = match keys
        .generate_symmetric_key_from_key_agreement(&self_public_key, peer_public_key)
        .await
    {
        Ok(key) => key,
        Err(e) => {
            let _ = keys.remove_key_pair(&self_public_key).await;
            return Err(e);
        }
    };

    let response_topic = keys.get_topic_from_key(&peer_bytes);
    let session_topic = keys.get_topic_from_key(symmetric_key.expose());
    debug!(
        "Derived session topic {} (response topic {})",
        session_topic, response_topic
    );

    Ok(SessionKeys {
        self_public_key,
        symmetric_key,
        response_topic,
        session_topic,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::crypto::topic_from_key;
    use crate::storage::InMemoryKeyStore;

    #[tokio::test]
    async fn test_both_sides_derive_same_session_topic() {
        let wallet = InMemoryKeyStore::new();
        let dapp = InMemoryKeyStore::new();
        let dapp_public = dapp.generate_key_pair().await.unwrap();

        let session = derive_session(&wallet, &dapp_public).await.unwrap();
        let dapp_key = dapp
            .generate_symmetric_key_from_key_agreement(&dapp_public, &session.self_public_key)
            .await
            .unwrap();

        assert_eq!(dapp_key, session.symmetric_key);
        assert_eq!(
            session.session_topic.value(),
            topic_from_key(dapp_key.expose())
        );
        assert_eq!(
            session.response_topic.value(),
            topic_from_key(&dapp_public.to_bytes().unwrap())
        );
        assert_eq!(session.session_topic.value().len(), 64);
    }

    #[tokio::test]
    async fn test_fresh_key_pair_per_derivation() {
        let wallet = InMemoryKeyStore::new();
        let peer = PublicKey::from_bytes(&[9u8; 32]);

        let first = derive_session(&wallet, &peer).await.unwrap();
        let second = derive_session(&wallet, &peer).await.unwrap();
        assert_ne!(first.self_public_key, second.self_public_key);
        assert_ne!(first.session_topic, second.session_topic);
        assert_eq!(first.response_topic, second.response_topic);
    }

    #[tokio::test]
    async fn test_invalid_peer_key_generates_nothing() {
        let wallet = InMemoryKeyStore::new();
        let result = derive_session(&wallet, &PublicKey::from_hex("not-hex")).await;
        assert!(matches!(result, Err(KeyError::InvalidFormat(_))));
        assert_eq!(wallet.key_pair_count().await, 0);
    }
}
