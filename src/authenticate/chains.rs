//! Chain resolution and CAIP-2 / namespace validation.

use log::{debug, warn};

use crate::authenticate::cacao::Cacao;
use crate::authenticate::error::ApproveError;

/// The only chain namespace approvals are supported for.
pub const SUPPORTED_NAMESPACE: &str = "eip155";

/// CAIP-2: `namespace:reference`, namespace `[-a-z0-9]{3,8}`,
/// reference `[-_a-zA-Z0-9]{1,32}`.
pub fn is_chain_id_caip2_compliant(chain: &str) -> bool {
    let mut parts = chain.split(':');
    let (namespace, reference) = match (parts.next(), parts.next(), parts.next()) {
        (Some(namespace), Some(reference), None) => (namespace, reference),
        _ => return false,
    };

    let namespace_ok = (3..=8).contains(&namespace.len())
        && namespace
            .chars()
            .all(|c| c == '-' || c.is_ascii_lowercase() || c.is_ascii_digit());
    let reference_ok = (1..=32).contains(&reference.len())
        && reference
            .chars()
            .all(|c| c == '-' || c == '_' || c.is_ascii_alphanumeric());

    namespace_ok && reference_ok
}

/// Namespace part of a chain id (`eip155` for `eip155:1`).
pub fn namespace_of(chain: &str) -> &str {
    chain.split(':').next().unwrap_or(chain)
}

/// ReCap chains of the first CACAO, or `fallback` when it carries none.
pub fn collect_chains(cacaos: &[Cacao], fallback: &[String]) -> Vec<String> {
    let embedded = cacaos
        .first()
        .map(|cacao| cacao.p.chains())
        .unwrap_or_default();
    if embedded.is_empty() {
        debug!("No ReCap chains in first CACAO, using requested chains");
        fallback.to_vec()
    } else {
        embedded
    }
}

pub fn ensure_caip2(chains: &[String]) -> Result<(), ApproveError> {
    match chains.iter().find(|c| !is_chain_id_caip2_compliant(c)) {
        Some(chain) => {
            warn!("Chain {} is not CAIP-2 compliant", chain);
            Err(ApproveError::ChainCompliance {
                chain: chain.clone(),
            })
        }
        None => Ok(()),
    }
}

pub fn ensure_namespace(chains: &[String]) -> Result<(), ApproveError> {
    match chains
        .iter()
        .find(|c| namespace_of(c) != SUPPORTED_NAMESPACE)
    {
        Some(chain) => {
            warn!("Chain {} is outside the {} namespace", chain, SUPPORTED_NAMESPACE);
            Err(ApproveError::UnsupportedNamespace {
                chain: chain.clone(),
                namespace: namespace_of(chain).to_string(),
            })
        }
        None => Ok(()),
    }
}

/// Resolve the chains the approval covers and check them.
///
/// An empty list passes both checks.
pub fn resolve_chains(
    cacaos: &[Cacao],
    fallback: &[String],
) -> Result<Vec<String>, ApproveError> {
    let chains = collect_chains(cacaos, fallback);
    ensure_caip2(&chains)?;
    ensure_namespace(&chains)?;
    Ok(chains)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticate::cacao::{CacaoHeader, CacaoPayload, CacaoSignature};
    use crate::authenticate::recaps::eip155_request_recap;

    fn cacao_with(resources: Option<Vec<String>>) -> Cacao {
        Cacao {
            h: CacaoHeader { t: "caip122".into() },
            p: CacaoPayload {
                iss: "did:pkh:eip155:1:0xabc".into(),
                domain: "app.example".into(),
                aud: "https://app.example".into(),
                version: "1".into(),
                nonce: "1".into(),
                iat: "2024-01-01T00:00:00Z".into(),
                nbf: None,
                exp: None,
                statement: None,
                request_id: None,
                resources,
            },
            s: CacaoSignature {
                t: "eip191".into(),
                s: "0x".into(),
                m: None,
            },
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_caip2_compliance() {
        for chain in [
            "eip155:1",
            "eip155:137",
            "cosmos:cosmoshub-4",
            "bip122:000000000019d6689c085ae165831e93",
        ] {
            assert!(is_chain_id_caip2_compliant(chain), "{}", chain);
        }
        for chain in [
            "1",
            "eip155",
            "ei:1",
            "EIP155:1",
            "eip155:",
            "eip155:1:2",
            "toolongnamespace:1",
            "",
        ] {
            assert!(!is_chain_id_caip2_compliant(chain), "{}", chain);
        }
        assert!(!is_chain_id_caip2_compliant(&format!("eip155:{}", "1".repeat(33))));
    }

    #[test]
    fn test_recap_chains_take_precedence() {
        let recap = eip155_request_recap(&["personal_sign"], &["eip155:10"]);
        let cacaos = vec![cacao_with(Some(vec![recap.encode().unwrap()]))];
        let chains = resolve_chains(&cacaos, &strings(&["eip155:1"])).unwrap();
        assert_eq!(chains, vec!["eip155:10"]);
    }

    #[test]
    fn test_fallback_to_requested_chains() {
        let cacaos = vec![cacao_with(None)];
        let chains = resolve_chains(&cacaos, &strings(&["eip155:1", "eip155:137"])).unwrap();
        assert_eq!(chains, vec!["eip155:1", "eip155:137"]);
    }

    #[test]
    fn test_non_compliant_chain() {
        let cacaos = vec![cacao_with(None)];
        assert!(matches!(
            resolve_chains(&cacaos, &strings(&["1"])),
            Err(ApproveError::ChainCompliance { chain }) if chain == "1"
        ));
    }

    #[test]
    fn test_non_evm_namespace() {
        let cacaos = vec![cacao_with(None)];
        assert!(matches!(
            resolve_chains(&cacaos, &strings(&["eip155:1", "solana:mainnet"])),
            Err(ApproveError::UnsupportedNamespace { namespace, .. }) if namespace == "solana"
        ));
    }

    #[test]
    fn test_empty_chains_pass() {
        let cacaos = vec![cacao_with(None)];
        assert!(resolve_chains(&cacaos, &[]).unwrap().is_empty());
    }
}
