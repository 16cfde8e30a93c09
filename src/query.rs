use std::sync::Arc;

use alloy::primitives::{Address, B256, Bytes};
use alloy::rpc::types::TransactionRequest;
use alloy_dyn_abi::DynSolValue;

use crate::abi::ContractDescriptor;
use crate::connector::Connector;
use crate::did::DidRecord;
use crate::error::{Error, Result};

/// JSON-RPC error code used by nodes for reverted calls.
const REVERT_CODE: i64 = 3;

/// Read-only access to a registry contract through `eth_call`.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    connector: Connector,
    contract: Address,
    descriptor: Arc<ContractDescriptor>,
}

impl QueryExecutor {
    pub fn new(connector: Connector, contract: Address, descriptor: Arc<ContractDescriptor>) -> Self {
        Self {
            connector,
            contract,
            descriptor,
        }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Calls a view function and decodes its return values.
    pub async fn call(&self, function: &str, args: &[DynSolValue]) -> Result<Vec<DynSolValue>> {
        let input = self.descriptor.encode(function, args)?;
        let output = self.execute(None, input).await?;
        self.descriptor.decode(function, &output)
    }

    /// Executes `input` as if sent by `from` without creating a transaction.
    ///
    /// Used to surface contract reverts before a transaction is signed.
    pub async fn simulate(&self, from: Address, input: Bytes) -> Result<()> {
        self.execute(Some(from), input).await.map(|_| ())
    }

    async fn execute(&self, from: Option<Address>, input: Bytes) -> Result<Bytes> {
        let mut request = TransactionRequest::default()
            .to(self.contract)
            .input(input.into());
        if let Some(from) = from {
            request = request.from(from);
        }
        self.connector.call(request).await.map_err(into_revert)
    }

    /// Reads the full registry entry of `did` from the `dids` accessor.
    pub async fn record(&self, did: &str) -> Result<DidRecord> {
        let values = self
            .call("dids", &[DynSolValue::String(did.to_string())])
            .await?;
        match values.as_slice() {
            [
                DynSolValue::Bool(exists),
                DynSolValue::FixedBytes(hash, 32),
                DynSolValue::String(uri),
            ] => Ok(DidRecord {
                exists: *exists,
                hash: *hash,
                uri: uri.clone(),
            }),
            other => Err(Error::Decoding(format!(
                "unexpected dids({did}) result: {other:?}"
            ))),
        }
    }

    /// Like [`QueryExecutor::record`], but an absent DID is an error.
    pub async fn existing_record(&self, did: &str) -> Result<DidRecord> {
        let record = self.record(did).await?;
        if record.exists {
            Ok(record)
        } else {
            Err(Error::NotFound(did.to_string()))
        }
    }

    pub async fn get_hash(&self, did: &str) -> Result<B256> {
        let values = self.read_existing("getHash", did).await?;
        match values.first() {
            Some(DynSolValue::FixedBytes(hash, 32)) => Ok(*hash),
            other => Err(Error::Decoding(format!(
                "unexpected getHash({did}) result: {other:?}"
            ))),
        }
    }

    pub async fn get_uri(&self, did: &str) -> Result<String> {
        let values = self.read_existing("getURI", did).await?;
        match values.into_iter().next() {
            Some(DynSolValue::String(uri)) => Ok(uri),
            other => Err(Error::Decoding(format!(
                "unexpected getURI({did}) result: {other:?}"
            ))),
        }
    }

    /// Calls the getter `function` of `did`. When the contract has a `dids`
    /// accessor its `exists` flag is read alongside, since deleted or unknown
    /// DIDs may still answer with stale or zero values.
    async fn read_existing(&self, function: &str, did: &str) -> Result<Vec<DynSolValue>> {
        let args = [DynSolValue::String(did.to_string())];
        let read = async {
            self.call(function, &args)
                .await
                .map_err(|e| not_found(e, did))
        };
        if !self.descriptor.has_function("dids") {
            return read.await;
        }
        let (values, _) = tokio::try_join!(read, self.existing_record(did))?;
        Ok(values)
    }
}

/// Turns node errors of reverted calls into [`Error::Reverted`] with the decoded reason.
fn into_revert(error: Error) -> Error {
    match error {
        Error::Rpc {
            code,
            message,
            data,
        } if code == REVERT_CODE || message.to_lowercase().contains("revert") => {
            let reason = data
                .as_deref()
                .and_then(decode_reason)
                .unwrap_or_else(|| strip_revert_prefix(&message).to_string());
            log::debug!("Call reverted: {reason}");
            Error::Reverted(reason)
        }
        other => other,
    }
}

fn decode_reason(data: &str) -> Option<String> {
    let bytes = hex::decode(data.trim_start_matches("0x")).ok()?;
    alloy_sol_types::decode_revert_reason(&bytes)
}

fn strip_revert_prefix(message: &str) -> &str {
    message
        .strip_prefix("execution reverted:")
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .unwrap_or(message)
}

fn not_found(error: Error, did: &str) -> Error {
    match error {
        Error::Reverted(reason) if reason.to_lowercase().contains("not exist") => {
            Error::NotFound(did.to_string())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use alloy_sol_types::{Revert, SolError};

    use super::*;

    #[test]
    fn test_revert_reason_from_data() {
        let revert = Revert {
            reason: "DID does not exist".to_string(),
        };
        let data = hex::encode(revert.abi_encode());
        let error = into_revert(Error::Rpc {
            code: 3,
            message: "execution reverted".into(),
            data: Some(format!("0x{data}")),
        });
        match error {
            Error::Reverted(reason) => assert!(reason.contains("DID does not exist")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_revert_reason_from_message() {
        let error = into_revert(Error::Rpc {
            code: -32000,
            message: "execution reverted: caller is not DID owner".into(),
            data: None,
        });
        assert!(matches!(error, Error::Reverted(reason) if reason == "caller is not DID owner"));
    }

    #[test]
    fn test_other_rpc_errors_untouched() {
        let error = into_revert(Error::Rpc {
            code: -32601,
            message: "method not found".into(),
            data: None,
        });
        assert!(matches!(error, Error::Rpc { code: -32601, .. }));
    }

    #[test]
    fn test_not_found_mapping() {
        let error = not_found(Error::Reverted("DID does not exist".into()), "did:io:0xABC");
        assert!(matches!(error, Error::NotFound(did) if did == "did:io:0xABC"));

        let error = not_found(Error::Reverted("paused".into()), "did:io:0xABC");
        assert!(matches!(error, Error::Reverted(_)));
    }
}
