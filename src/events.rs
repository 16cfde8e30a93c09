use alloy::primitives::{B256, keccak256};
use alloy::rpc::types::Log;
use alloy_dyn_abi::DynSolValue;

use crate::abi::{ContractDescriptor, DecodedEvent};

/// Events emitted by the DID registry contract.
///
/// Indexed strings are only available as their keccak hash; use
/// [`RegistryEvent::concerns`] to match them against a DID.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Created { id_hash: B256, did: String },
    Deleted { did_hash: B256 },
    HashUpdated { did_hash: B256, hash: B256 },
    UriUpdated { did_hash: B256, uri: String },
    /// Any other event declared by the descriptor.
    Other(DecodedEvent),
}

impl RegistryEvent {
    /// Whether the event was emitted for `did`.
    pub fn concerns(&self, did: &str) -> bool {
        let hash = keccak256(did.as_bytes());
        match self {
            RegistryEvent::Created { did: created, .. } => created == did,
            RegistryEvent::Deleted { did_hash }
            | RegistryEvent::HashUpdated { did_hash, .. }
            | RegistryEvent::UriUpdated { did_hash, .. } => *did_hash == hash,
            RegistryEvent::Other(_) => false,
        }
    }
}

fn word(event: &DecodedEvent, name: &str) -> Option<B256> {
    match event.field(name) {
        Some(DynSolValue::FixedBytes(word, 32)) => Some(*word),
        _ => None,
    }
}

fn string(event: &DecodedEvent, name: &str) -> Option<String> {
    match event.field(name) {
        Some(DynSolValue::String(value)) => Some(value.clone()),
        _ => None,
    }
}

impl From<DecodedEvent> for RegistryEvent {
    fn from(event: DecodedEvent) -> Self {
        let typed = match event.name.as_str() {
            "CreateDID" => word(&event, "id")
                .zip(string(&event, "didString"))
                .map(|(id_hash, did)| RegistryEvent::Created { id_hash, did }),
            "DeleteDID" => {
                word(&event, "didString").map(|did_hash| RegistryEvent::Deleted { did_hash })
            }
            "UpdateHash" => word(&event, "didString")
                .zip(word(&event, "hash"))
                .map(|(did_hash, hash)| RegistryEvent::HashUpdated { did_hash, hash }),
            "UpdateURI" => word(&event, "didString")
                .zip(string(&event, "uri"))
                .map(|(did_hash, uri)| RegistryEvent::UriUpdated { did_hash, uri }),
            _ => None,
        };
        typed.unwrap_or(RegistryEvent::Other(event))
    }
}

/// Decodes the logs of a receipt. Logs the descriptor does not know are skipped.
pub fn decode_logs(descriptor: &ContractDescriptor, logs: &[Log]) -> Vec<RegistryEvent> {
    logs.iter()
        .filter_map(
            |log| match descriptor.decode_log(log.topics(), &log.data().data) {
                Ok(event) => event.map(RegistryEvent::from),
                Err(e) => {
                    log::warn!("Skipping undecodable log from {}: {e}", log.address());
                    None
                }
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use alloy::primitives::b256;

    use super::*;
    use crate::abi::EventField;

    #[test]
    fn test_typed_conversion() {
        let did_hash = keccak256("did:io:0xABC");
        let hash = b256!("0x414efa99dfac6f4095d6954713fb0085268d400d6a05a8ae8a69b5b1c10eeeee");
        let event = DecodedEvent {
            name: "UpdateHash".to_string(),
            fields: vec![
                EventField {
                    name: "didString".to_string(),
                    indexed: true,
                    value: DynSolValue::FixedBytes(did_hash, 32),
                },
                EventField {
                    name: "hash".to_string(),
                    indexed: false,
                    value: DynSolValue::FixedBytes(hash, 32),
                },
            ],
        };
        let typed = RegistryEvent::from(event);
        assert_eq!(typed, RegistryEvent::HashUpdated { did_hash, hash });
        assert!(typed.concerns("did:io:0xABC"));
        assert!(!typed.concerns("did:io:0xDEF"));
    }

    #[test]
    fn test_unexpected_shape_is_kept() {
        let event = DecodedEvent {
            name: "UpdateURI".to_string(),
            fields: vec![],
        };
        assert!(matches!(
            RegistryEvent::from(event),
            RegistryEvent::Other(_)
        ));
    }
}
