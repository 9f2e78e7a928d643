//! ReCap (EIP-5573) resource decoding.
//!
//! A ReCap resource is `urn:recap:` followed by base64url JSON of the form
//! `{"att": {"eip155": {"request/personal_sign": [{"chains": ["eip155:1"]}]}}}`.
//! The chains a wallet signed for and the methods it granted are both
//! carried here rather than in dedicated CACAO fields.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::authenticate::error::CacaoError;

pub const RECAPS_PREFIX: &str = "urn:recap:";

/// Ability namespace whose abilities map to JSON-RPC methods.
const REQUEST_ABILITY: &str = "request";

/// Decoded ReCap object. Keys are kept sorted, which the statement format relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReCap {
    pub att: BTreeMap<String, BTreeMap<String, Vec<Value>>>,
}

impl ReCap {
    /// Decode a single `urn:recap:` resource.
    pub fn decode(resource: &str) -> Result<Self, CacaoError> {
        let encoded = resource
            .strip_prefix(RECAPS_PREFIX)
            .ok_or_else(|| CacaoError::InvalidRecap(format!("missing {} prefix", RECAPS_PREFIX)))?;
        let json = URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .map_err(|e| CacaoError::InvalidRecap(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| CacaoError::InvalidRecap(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, CacaoError> {
        let json = serde_json::to_vec(self).map_err(|e| CacaoError::InvalidRecap(e.to_string()))?;
        Ok(format!("{}{}", RECAPS_PREFIX, URL_SAFE_NO_PAD.encode(json)))
    }

    /// Every chain listed in any ability's `chains` caveat, first-seen order.
    pub fn chains(&self) -> Vec<String> {
        let mut chains: Vec<String> = Vec::new();
        for abilities in self.att.values() {
            for caveats in abilities.values() {
                for caveat in caveats {
                    let listed = caveat.get("chains").and_then(Value::as_array);
                    for chain in listed.into_iter().flatten().filter_map(Value::as_str) {
                        if !chains.iter().any(|c| c == chain) {
                            chains.push(chain.to_string());
                        }
                    }
                }
            }
        }
        chains
    }

    /// Methods granted under `request/` for the given resource key.
    pub fn methods(&self, resource: &str) -> Vec<String> {
        self.att
            .get(resource)
            .map(|abilities| {
                abilities
                    .keys()
                    .filter_map(|ability| ability.strip_prefix("request/"))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Human readable statement the wallet must have signed over.
    ///
    /// `I further authorize the stated URI to perform the following actions on my behalf:
    /// (1) 'request': 'eth_sign', 'personal_sign' for 'eip155'.`
    pub fn statement(&self) -> String {
        let mut statement = String::from(
            "I further authorize the stated URI to perform the following actions on my behalf:",
        );
        let mut index = 1;
        for (resource, abilities) in &self.att {
            let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
            for ability in abilities.keys() {
                let (namespace, name) = ability.split_once('/').unwrap_or((ability.as_str(), ""));
                grouped.entry(namespace).or_default().push(name);
            }
            for (namespace, names) in grouped {
                let actions = names
                    .iter()
                    .map(|name| format!("'{}'", name))
                    .collect::<Vec<_>>()
                    .join(", ");
                statement.push_str(&format!(
                    " ({}) '{}': {} for '{}'.",
                    index, namespace, actions, resource
                ));
                index += 1;
            }
        }
        statement
    }
}

/// The ReCap in a resource list. Per EIP-5573 it is the last `urn:recap:` entry.
pub fn find_recap(resources: Option<&[String]>) -> Option<&str> {
    resources?
        .iter()
        .rev()
        .find(|r| r.starts_with(RECAPS_PREFIX))
        .map(String::as_str)
}

/// Decoded ReCap, ignoring malformed entries.
pub fn decode_recap(resources: Option<&[String]>) -> Option<ReCap> {
    let resource = find_recap(resources)?;
    match ReCap::decode(resource) {
        Ok(recap) => Some(recap),
        Err(e) => {
            log::warn!("Ignoring malformed ReCap resource: {}", e);
            None
        }
    }
}

/// Build a ReCap granting `methods` on `chains` under the `eip155` resource.
pub fn eip155_request_recap(methods: &[&str], chains: &[&str]) -> ReCap {
    let caveat = serde_json::json!({ "chains": chains });
    let abilities: BTreeMap<String, Vec<Value>> = methods
        .iter()
        .map(|m| (format!("{}/{}", REQUEST_ABILITY, m), vec![caveat.clone()]))
        .collect();
    let mut att = BTreeMap::new();
    att.insert("eip155".to_string(), abilities);
    ReCap { att }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_recap() {
        // {"att":{"eip155":{"request/eth_sign":[{"chains":["eip155:1"]}],"request/personal_sign":[{"chains":["eip155:1","eip155:137"]}]}}}
        let json = r#"{"att":{"eip155":{"request/eth_sign":[{"chains":["eip155:1"]}],"request/personal_sign":[{"chains":["eip155:1","eip155:137"]}]}}}"#;
        let resource = format!("{}{}", RECAPS_PREFIX, URL_SAFE_NO_PAD.encode(json));

        let recap = ReCap::decode(&resource).unwrap();
        assert_eq!(recap.chains(), vec!["eip155:1", "eip155:137"]);
        assert_eq!(recap.methods("eip155"), vec!["eth_sign", "personal_sign"]);
        assert!(recap.methods("solana").is_empty());
    }

    #[test]
    fn test_padded_base64_is_accepted() {
        use base64::engine::general_purpose::URL_SAFE;
        let json = r#"{"att":{"eip155":{"request/personal_sign":[{}]}}}"#;
        let resource = format!("{}{}", RECAPS_PREFIX, URL_SAFE.encode(json));

        let recap = ReCap::decode(&resource).unwrap();
        assert!(recap.chains().is_empty());
        assert_eq!(recap.methods("eip155"), vec!["personal_sign"]);
    }

    #[test]
    fn test_statement() {
        let recap = eip155_request_recap(&["personal_sign", "eth_sign"], &["eip155:1"]);
        assert_eq!(
            recap.statement(),
            "I further authorize the stated URI to perform the following actions on my behalf: \
             (1) 'request': 'eth_sign', 'personal_sign' for 'eip155'."
        );
    }

    #[test]
    fn test_find_recap_takes_last() {
        let first = eip155_request_recap(&["eth_sign"], &["eip155:1"]).encode().unwrap();
        let last = eip155_request_recap(&["personal_sign"], &["eip155:10"]).encode().unwrap();
        let resources = vec![
            "ipfs://bafybeiemxf5abjwjbikoz4mc3a3dla6ual3jsgpdr4cjr3oz3evfyavhwq".to_string(),
            first,
            last.clone(),
        ];
        assert_eq!(find_recap(Some(&resources)), Some(last.as_str()));
        assert_eq!(decode_recap(Some(&resources)).unwrap().chains(), vec!["eip155:10"]);
        assert!(find_recap(None).is_none());
    }

    #[test]
    fn test_invalid_recap() {
        assert!(matches!(
            ReCap::decode("urn:recap:!!!"),
            Err(CacaoError::InvalidRecap(_))
        ));
        assert!(ReCap::decode("https://example.com").is_err());
        let garbage = vec![format!("{}{}", RECAPS_PREFIX, URL_SAFE_NO_PAD.encode("nope"))];
        assert!(decode_recap(Some(&garbage)).is_none());
    }
}
