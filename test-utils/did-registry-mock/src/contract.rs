use alloy::primitives::{Address, B256, Bytes, address, keccak256};
use alloy_sol_types::{Revert, SolError, SolEvent, SolInterface, SolValue, sol};
use std::collections::HashMap;

use crate::block::TransactionLog;

/// Address the registry contract is deployed at on the mock chain
pub const REGISTRY_ADDRESS: Address = address!("0x00000000000000000000000000000000000d1d01");

/// Prefix of DIDs managed by the registry
pub const DID_PREFIX: &str = "did:io:";

sol! {
    contract DidRegistry {
        event CreateDID(string indexed id, string didString);
        event DeleteDID(string indexed didString);
        event UpdateHash(string indexed didString, bytes32 hash);
        event UpdateURI(string indexed didString, string uri);

        function createDID(string id, bytes32 hash, string uri) external;
        function deleteDID(string did) external;
        function updateHash(string did, bytes32 hash) external;
        function updateURI(string did, string uri) external;
        function getHash(string did) external view returns (bytes32);
        function getURI(string did) external view returns (string);
        function dids(string did) external view returns (bool exist, bytes32 hash, string uri);
    }
}

/// A stored DID entry
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DidEntry {
    pub exist: bool,
    pub hash: B256,
    pub uri: String,
    pub owner: Address,
}

/// Result of executing a call against the registry
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success { output: Bytes, logs: Vec<TransactionLog> },
    Revert { reason: String },
}

impl ExecutionOutcome {
    fn revert(reason: &str) -> Self {
        ExecutionOutcome::Revert {
            reason: reason.to_string(),
        }
    }

    /// ABI encoded `Error(string)` payload of a revert
    pub fn revert_data(reason: &str) -> Bytes {
        Revert {
            reason: reason.to_string(),
        }
        .abi_encode()
        .into()
    }
}

/// How the registry stores deleted DIDs and answers reads of absent ones
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, derive_more::Display)]
pub enum StorageMode {
    /// Delete frees the slot, reads of absent DIDs revert
    #[default]
    #[display("reverting")]
    Reverting,
    /// Delete only clears `exist`, reads return the raw slot (zero values for unknown DIDs)
    #[display("raw slots")]
    RawSlots,
}

/// In-memory implementation of the DID registry contract
#[derive(Clone, Debug, Default)]
pub struct RegistryContract {
    dids: HashMap<String, DidEntry>,
    mode: StorageMode,
}

impl RegistryContract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mode: StorageMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: StorageMode) {
        self.mode = mode;
    }

    /// Normalize an id the way the registry does: empty means the sender's own DID
    pub fn resolve_did(id: &str, sender: Address) -> String {
        if id.is_empty() {
            format!("{DID_PREFIX}{}", sender.to_checksum(None))
        } else if id.starts_with("did:") {
            id.to_string()
        } else {
            format!("{DID_PREFIX}{id}")
        }
    }

    pub fn entry(&self, did: &str) -> Option<&DidEntry> {
        self.dids.get(did).filter(|entry| entry.exist)
    }

    pub fn len(&self) -> usize {
        self.dids.values().filter(|entry| entry.exist).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Execute calldata sent by `sender`. State is only modified on success.
    pub fn execute(&mut self, sender: Address, data: &[u8]) -> ExecutionOutcome {
        let call = match DidRegistry::DidRegistryCalls::abi_decode(data) {
            Ok(call) => call,
            Err(e) => {
                log::debug!("Unknown registry call from {sender}: {e}");
                return ExecutionOutcome::revert("unknown function");
            }
        };

        use DidRegistry::DidRegistryCalls as Call;
        match call {
            Call::createDID(call) => self.create(sender, call.id, call.hash, call.uri),
            Call::deleteDID(call) => self.delete(sender, call.did),
            Call::updateHash(call) => self.update_hash(sender, call.did, call.hash),
            Call::updateURI(call) => self.update_uri(sender, call.did, call.uri),
            Call::getHash(call) => self.read(sender, &call.did, |entry| (entry.hash,).abi_encode_params()),
            Call::getURI(call) => {
                self.read(sender, &call.did, |entry| (entry.uri.clone(),).abi_encode_params())
            }
            Call::dids(call) => {
                let did = Self::resolve_did(&call.did, sender);
                let entry = self.slot(&did);
                ExecutionOutcome::Success {
                    output: (entry.exist, entry.hash, entry.uri).abi_encode_params().into(),
                    logs: Vec::new(),
                }
            }
        }
    }

    fn read(
        &self,
        sender: Address,
        did: &str,
        encode: impl FnOnce(&DidEntry) -> Vec<u8>,
    ) -> ExecutionOutcome {
        let did = Self::resolve_did(did, sender);
        let entry = match (self.mode, self.entry(&did)) {
            (_, Some(entry)) => entry.clone(),
            (StorageMode::RawSlots, None) => self.slot(&did),
            (StorageMode::Reverting, None) => return ExecutionOutcome::revert("DID does not exist"),
        };
        ExecutionOutcome::Success {
            output: encode(&entry).into(),
            logs: Vec::new(),
        }
    }

    /// The stored slot of `did` as the contract's public mapping returns it
    fn slot(&self, did: &str) -> DidEntry {
        match self.mode {
            StorageMode::Reverting => self.entry(did).cloned().unwrap_or_default(),
            StorageMode::RawSlots => self.dids.get(did).cloned().unwrap_or_default(),
        }
    }

    fn create(&mut self, sender: Address, id: String, hash: B256, uri: String) -> ExecutionOutcome {
        let did = Self::resolve_did(&id, sender);
        if self.entry(&did).is_some() {
            return ExecutionOutcome::revert("DID already exists");
        }
        log::info!("Registry: {did} created by {sender}");
        self.dids.insert(
            did.clone(),
            DidEntry {
                exist: true,
                hash,
                uri,
                owner: sender,
            },
        );
        let event = DidRegistry::CreateDID {
            id: keccak256(id.as_bytes()),
            didString: did,
        };
        success_with(event.encode_log_data())
    }

    fn owned_entry(&mut self, sender: Address, did: &str) -> Result<&mut DidEntry, ExecutionOutcome> {
        match self.dids.get_mut(did) {
            Some(entry) if entry.exist && entry.owner == sender => Ok(entry),
            Some(entry) if entry.exist => Err(ExecutionOutcome::revert("caller is not DID owner")),
            _ => Err(ExecutionOutcome::revert("DID does not exist")),
        }
    }

    fn update_hash(&mut self, sender: Address, did: String, hash: B256) -> ExecutionOutcome {
        let did = Self::resolve_did(&did, sender);
        match self.owned_entry(sender, &did) {
            Ok(entry) => entry.hash = hash,
            Err(revert) => return revert,
        }
        log::info!("Registry: hash of {did} updated");
        let event = DidRegistry::UpdateHash {
            didString: keccak256(did.as_bytes()),
            hash,
        };
        success_with(event.encode_log_data())
    }

    fn update_uri(&mut self, sender: Address, did: String, uri: String) -> ExecutionOutcome {
        let did = Self::resolve_did(&did, sender);
        match self.owned_entry(sender, &did) {
            Ok(entry) => entry.uri = uri.clone(),
            Err(revert) => return revert,
        }
        log::info!("Registry: uri of {did} updated");
        let event = DidRegistry::UpdateURI {
            didString: keccak256(did.as_bytes()),
            uri,
        };
        success_with(event.encode_log_data())
    }

    fn delete(&mut self, sender: Address, did: String) -> ExecutionOutcome {
        let did = Self::resolve_did(&did, sender);
        if let Err(revert) = self.owned_entry(sender, &did) {
            return revert;
        }
        match self.mode {
            StorageMode::Reverting => {
                self.dids.remove(&did);
            }
            StorageMode::RawSlots => {
                if let Some(entry) = self.dids.get_mut(&did) {
                    entry.exist = false;
                }
            }
        }
        log::info!("Registry: {did} deleted");
        let event = DidRegistry::DeleteDID {
            didString: keccak256(did.as_bytes()),
        };
        success_with(event.encode_log_data())
    }
}

fn success_with(log: alloy::primitives::LogData) -> ExecutionOutcome {
    ExecutionOutcome::Success {
        output: Bytes::new(),
        logs: vec![TransactionLog {
            address: REGISTRY_ADDRESS,
            topics: log.topics().to_vec(),
            data: log.data,
        }],
    }
}

#[cfg(test)]
mod tests {
    use alloy_sol_types::SolCall;

    use super::*;

    const OWNER: Address = address!("0x0ddfc506136fb7c050cc2e9511eccd81b15e7426");
    const OTHER: Address = address!("0x1111111111111111111111111111111111111111");

    fn create_call(id: &str, hash: B256, uri: &str) -> Vec<u8> {
        DidRegistry::createDIDCall {
            id: id.to_string(),
            hash,
            uri: uri.to_string(),
        }
        .abi_encode()
    }

    #[test]
    fn test_create_and_read() {
        let mut contract = RegistryContract::new();
        let hash = B256::repeat_byte(0x41);
        let outcome = contract.execute(OWNER, &create_call("did:io:0xABC", hash, "urixxx"));
        match outcome {
            ExecutionOutcome::Success { logs, .. } => {
                assert_eq!(logs.len(), 1);
                assert_eq!(logs[0].topics[0], DidRegistry::CreateDID::SIGNATURE_HASH);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let entry = contract.entry("did:io:0xABC").unwrap();
        assert_eq!(entry.hash, hash);
        assert_eq!(entry.uri, "urixxx");

        let duplicate = contract.execute(OWNER, &create_call("did:io:0xABC", hash, "other"));
        assert_eq!(duplicate, ExecutionOutcome::revert("DID already exists"));
    }

    #[test]
    fn test_empty_id_uses_sender() {
        let mut contract = RegistryContract::new();
        contract.execute(OWNER, &create_call("", B256::ZERO, ""));
        let did = format!("did:io:{}", OWNER.to_checksum(None));
        assert!(contract.entry(&did).is_some());
        assert!(contract.entry(&did.to_lowercase()).is_none());
    }

    #[test]
    fn test_empty_id_reads_sender_did() {
        let mut contract = RegistryContract::new();
        contract.execute(OWNER, &create_call("", B256::repeat_byte(0x41), "own"));
        let call = DidRegistry::getURICall { did: String::new() }.abi_encode();
        match contract.execute(OWNER, &call) {
            ExecutionOutcome::Success { output, .. } => {
                assert_eq!(<(String,)>::abi_decode_params(&output).unwrap().0, "own");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(
            contract.execute(OTHER, &call),
            ExecutionOutcome::revert("DID does not exist")
        );
    }

    #[test]
    fn test_raw_slots_keep_deleted_values() {
        let mut contract = RegistryContract::with_mode(StorageMode::RawSlots);
        let hash = B256::repeat_byte(0x41);
        contract.execute(OWNER, &create_call("did:io:0xABC", hash, "urixxx"));
        let delete = DidRegistry::deleteDIDCall {
            did: "did:io:0xABC".to_string(),
        }
        .abi_encode();
        assert!(matches!(
            contract.execute(OWNER, &delete),
            ExecutionOutcome::Success { .. }
        ));
        assert!(contract.entry("did:io:0xABC").is_none());

        let get_hash = |did: &str| {
            DidRegistry::getHashCall {
                did: did.to_string(),
            }
            .abi_encode()
        };
        // Deleted: the stale hash is still returned.
        match contract.execute(OWNER, &get_hash("did:io:0xABC")) {
            ExecutionOutcome::Success { output, .. } => {
                assert_eq!(<(B256,)>::abi_decode_params(&output).unwrap().0, hash);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // Unknown: zero instead of a revert.
        match contract.execute(OWNER, &get_hash("did:io:0xDEF")) {
            ExecutionOutcome::Success { output, .. } => {
                assert_eq!(<(B256,)>::abi_decode_params(&output).unwrap().0, B256::ZERO);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let dids = DidRegistry::didsCall {
            did: "did:io:0xABC".to_string(),
        }
        .abi_encode();
        match contract.execute(OWNER, &dids) {
            ExecutionOutcome::Success { output, .. } => {
                let (exist, stored, _uri) =
                    <(bool, B256, String)>::abi_decode_params(&output).unwrap();
                assert!(!exist);
                assert_eq!(stored, hash);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        // A deleted DID can be registered again.
        assert!(matches!(
            contract.execute(OWNER, &create_call("did:io:0xABC", B256::ZERO, "again")),
            ExecutionOutcome::Success { .. }
        ));
    }

    #[test]
    fn test_only_owner_modifies() {
        let mut contract = RegistryContract::new();
        contract.execute(OWNER, &create_call("did:io:0xABC", B256::ZERO, "a"));
        let call = DidRegistry::deleteDIDCall {
            did: "did:io:0xABC".to_string(),
        }
        .abi_encode();
        assert_eq!(
            contract.execute(OTHER, &call),
            ExecutionOutcome::revert("caller is not DID owner")
        );
        assert!(matches!(
            contract.execute(OWNER, &call),
            ExecutionOutcome::Success { .. }
        ));
        assert_eq!(
            contract.execute(OWNER, &call),
            ExecutionOutcome::revert("DID does not exist")
        );
    }
}
