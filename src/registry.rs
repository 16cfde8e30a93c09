use std::sync::Arc;

use alloy::primitives::{Address, B256, Bytes};
use tokio_util::sync::CancellationToken;

use crate::abi::ContractDescriptor;
use crate::config::ClientConfig;
use crate::did::{Did, DidDocument, DidRecord};
use crate::error::{Error, Result};
use crate::poller::{ConfirmationPoller, PollState, Receipt};
use crate::query::QueryExecutor;
use crate::signer::PrivateKey;
use crate::transaction::{GasSettings, Submission, Submitter};

/// The six registry operations, bound to one contract on one endpoint.
///
/// State-changing operations return as soon as the node accepts the
/// transaction. Use [`Registry::wait_for_confirmation`] to learn the outcome.
#[derive(Debug, Clone)]
pub struct Registry {
    contract: Address,
    descriptor: Arc<ContractDescriptor>,
    submitter: Submitter,
    query: QueryExecutor,
    poller: ConfirmationPoller,
    config: Arc<ClientConfig>,
}

impl Registry {
    pub(crate) fn new(
        contract: Address,
        descriptor: Arc<ContractDescriptor>,
        submitter: Submitter,
        query: QueryExecutor,
        poller: ConfirmationPoller,
        config: Arc<ClientConfig>,
    ) -> Self {
        Self {
            contract,
            descriptor,
            submitter,
            query,
            poller,
            config,
        }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn descriptor(&self) -> &ContractDescriptor {
        &self.descriptor
    }

    pub fn query(&self) -> &QueryExecutor {
        &self.query
    }

    pub fn poller(&self) -> &ConfirmationPoller {
        &self.poller
    }

    /// Registers a DID.
    ///
    /// An empty `id` registers the signer's own DID, `did:<method>:<address>`.
    /// `hash` is a 32 byte hex string, with or without `0x`.
    pub async fn create_did(
        &self,
        key: &PrivateKey,
        gas: &GasSettings,
        id: &str,
        hash: &str,
        uri: &str,
    ) -> Result<Submission> {
        let input = self.descriptor.encode_str("createDID", &[id, hash, uri])?;
        let did = self.resolve(id, key)?;
        if self.checks_existence() {
            let record = self.query.record(&did).await?;
            if record.exists {
                return Err(Error::AlreadyExists(did));
            }
        }
        log::debug!("Registering {did}");
        self.transact(key, gas, &did, input).await
    }

    pub async fn get_hash(&self, did: &str) -> Result<B256> {
        self.query.get_hash(required(did)?).await
    }

    pub async fn get_uri(&self, did: &str) -> Result<String> {
        self.query.get_uri(required(did)?).await
    }

    /// The full registry entry of `did`. Absent DIDs are reported as `exists == false`.
    pub async fn get_record(&self, did: &str) -> Result<DidRecord> {
        self.query.record(required(did)?).await
    }

    /// Replaces the hash of an existing DID. The URI is left untouched.
    pub async fn update_hash(
        &self,
        key: &PrivateKey,
        gas: &GasSettings,
        did: &str,
        hash: &str,
    ) -> Result<Submission> {
        let input = self.descriptor.encode_str("updateHash", &[did, hash])?;
        self.change(key, gas, did, input).await
    }

    /// Replaces the URI of an existing DID. The hash is left untouched.
    pub async fn update_uri(
        &self,
        key: &PrivateKey,
        gas: &GasSettings,
        did: &str,
        uri: &str,
    ) -> Result<Submission> {
        let input = self.descriptor.encode_str("updateURI", &[did, uri])?;
        self.change(key, gas, did, input).await
    }

    pub async fn delete_did(&self, key: &PrivateKey, gas: &GasSettings, did: &str) -> Result<Submission> {
        let input = self.descriptor.encode_str("deleteDID", &[did])?;
        self.change(key, gas, did, input).await
    }

    /// Waits until a submitted transaction is confirmed.
    ///
    /// Without a token the wait is only bounded by the poller configuration.
    pub async fn wait_for_confirmation(
        &self,
        submission: &Submission,
        cancel: Option<&CancellationToken>,
    ) -> Result<Receipt> {
        match cancel {
            Some(cancel) => self.poller.wait(submission.tx_hash, cancel).await,
            None => {
                self.poller
                    .wait(submission.tx_hash, &CancellationToken::new())
                    .await
            }
        }
    }

    /// Reports the confirmation state instead of turning it into an error.
    pub async fn watch(&self, submission: &Submission, cancel: &CancellationToken) -> Result<PollState> {
        self.poller.watch(submission.tx_hash, cancel).await
    }

    /// The DID document of the key's own DID.
    pub fn document(&self, key: &PrivateKey) -> Result<DidDocument> {
        let did = Did::from_address(&self.config.did_method, key.address())?;
        Ok(DidDocument::new(&did, key.public_key_hex()?))
    }

    async fn change(
        &self,
        key: &PrivateKey,
        gas: &GasSettings,
        did: &str,
        input: Bytes,
    ) -> Result<Submission> {
        let did = self.resolve(did, key)?;
        if self.checks_existence() {
            self.query.existing_record(&did).await?;
        }
        self.transact(key, gas, &did, input).await
    }

    async fn transact(
        &self,
        key: &PrivateKey,
        gas: &GasSettings,
        did: &str,
        input: Bytes,
    ) -> Result<Submission> {
        if self.config.simulate_calls {
            self.query
                .simulate(key.address(), input.clone())
                .await
                .map_err(|e| refine_revert(e, did))?;
        }
        let credential = key.credential()?;
        self.submitter
            .send(&credential, self.contract, input, gas)
            .await
    }

    fn resolve(&self, input: &str, key: &PrivateKey) -> Result<String> {
        Ok(Did::resolve(input, &self.config.did_method, key.address())?.to_string())
    }

    fn checks_existence(&self) -> bool {
        self.config.preflight_checks && self.descriptor.has_function("dids")
    }
}

fn required(did: &str) -> Result<&str> {
    let did = did.trim();
    if did.is_empty() {
        return Err(Error::InvalidArgument("DID must not be empty".to_string()));
    }
    Ok(did)
}

/// Maps the registry's revert reasons onto the dedicated error kinds.
fn refine_revert(error: Error, did: &str) -> Error {
    match error {
        Error::Reverted(reason) => {
            let lower = reason.to_lowercase();
            if lower.contains("already exist") {
                Error::AlreadyExists(did.to_string())
            } else if lower.contains("not exist") {
                Error::NotFound(did.to_string())
            } else {
                Error::Reverted(reason)
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_did() {
        assert_eq!(required(" did:io:0xABC ").unwrap(), "did:io:0xABC");
        assert!(matches!(required("  "), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_refine_revert() {
        assert!(matches!(
            refine_revert(Error::Reverted("DID already exists".into()), "did:io:0xABC"),
            Error::AlreadyExists(did) if did == "did:io:0xABC"
        ));
        assert!(matches!(
            refine_revert(Error::Reverted("DID does not exist".into()), "did:io:0xABC"),
            Error::NotFound(_)
        ));
        assert!(matches!(
            refine_revert(Error::Reverted("caller is not DID owner".into()), "did:io:0xABC"),
            Error::Reverted(_)
        ));
        assert!(matches!(
            refine_revert(Error::Decoding("x".into()), "did:io:0xABC"),
            Error::Decoding(_)
        ));
    }
}
