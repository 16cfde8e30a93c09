//! JSON-RPC chain mock hosting an in-memory DID registry contract.
//!
//! The mock accepts signed raw transactions, validates them the way a node does
//! (chain id, nonce, balance), keeps them in a pool and mines them periodically.
//! A [`controller::MockController`] lets tests inject failures into any RPC method.

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, B256, Bytes, U64, U256};
use alloy::rpc::types::{BlockId, TransactionRequest};
use jsonrpsee::core::{RpcResult, async_trait};
use jsonrpsee::types::ErrorObjectOwned;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::api::EthRpcServer;
use crate::block::Transaction;
use crate::blockchain::Blockchain;
use crate::contract::ExecutionOutcome;
use crate::controller::{MockController, OverrideAction};
use crate::execution::{ExecutionConfig, ExecutionEngine};
use crate::transaction_pool::TransactionPool;

pub mod api;
pub mod block;
pub mod blockchain;
pub mod contract;
pub mod controller;
pub mod execution;
pub mod server;
pub mod transaction_pool;

pub use contract::{REGISTRY_ADDRESS, StorageMode};
pub use server::DidRegistryMockServer;

/// Chain id reported by default (IoTeX testnet)
pub const DEFAULT_CHAIN_ID: u64 = 4690;

/// Gas price reported by `eth_gasPrice`
pub const DEFAULT_GAS_PRICE: u128 = 1_000_000_000_000;

/// JSON-RPC error code of generic server errors
const SERVER_ERROR: i32 = -32000;

/// JSON-RPC error code of reverted calls
const REVERT_ERROR: i32 = 3;

fn rpc_error(message: impl Into<String>) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(SERVER_ERROR, message.into(), None::<()>)
}

/// Shared state of the mock node
#[derive(Clone, Debug)]
pub struct DidRegistryMock {
    pub blockchain: Blockchain,
    pub transaction_pool: TransactionPool,
    pub execution: ExecutionEngine,
    pub controller: MockController,
    chain_id: Arc<AtomicU64>,
}

impl Default for DidRegistryMock {
    fn default() -> Self {
        Self::new(ExecutionConfig::default())
    }
}

impl DidRegistryMock {
    pub fn new(config: ExecutionConfig) -> Self {
        let blockchain = Blockchain::new();
        let transaction_pool = TransactionPool::new();
        Self {
            execution: ExecutionEngine::new(blockchain.clone(), transaction_pool.clone(), config),
            blockchain,
            transaction_pool,
            controller: MockController::new(),
            chain_id: Arc::new(AtomicU64::new(DEFAULT_CHAIN_ID)),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id.load(Ordering::SeqCst)
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.chain_id.store(chain_id, Ordering::SeqCst);
    }

    /// Apply controller overrides registered for `rpc_name`
    fn intercept<T: DeserializeOwned>(&self, rpc_name: &str) -> RpcResult<Option<T>> {
        match self.controller.action(rpc_name) {
            OverrideAction::Proceed => Ok(None),
            OverrideAction::Fail(message) => {
                log::debug!("{rpc_name}: failing on request: {message}");
                Err(rpc_error(message))
            }
            OverrideAction::Respond(value) => value
                .decode()
                .map(Some)
                .map_err(|e| rpc_error(format!("invalid custom response: {e}"))),
        }
    }

    /// Validate a decoded transaction against chain and pool state, then pool it
    pub async fn accept_transaction(&self, transaction: Transaction) -> RpcResult<B256> {
        let hash = transaction.hash;
        if transaction.chain_id != Some(self.chain_id()) {
            return Err(rpc_error(format!(
                "invalid chain id: expected {}, got {:?}",
                self.chain_id(),
                transaction.chain_id
            )));
        }
        if transaction.intrinsic_gas() > transaction.gas_limit {
            return Err(rpc_error("intrinsic gas too low"));
        }

        let confirmed = self.blockchain.get_nonce(&transaction.from).await;
        if transaction.nonce < confirmed {
            return Err(rpc_error(format!(
                "nonce too low: next nonce {confirmed}, tx nonce {}",
                transaction.nonce
            )));
        }
        if self.transaction_pool.get_transaction(&hash).await.is_some() {
            return Err(rpc_error(format!("already known: 0x{hash:x}")));
        }
        let pending = self
            .transaction_pool
            .pending_nonce(&transaction.from, confirmed)
            .await;
        if transaction.nonce > pending {
            return Err(rpc_error(format!(
                "nonce too high: next nonce {pending}, tx nonce {}",
                transaction.nonce
            )));
        }

        let balance = self.blockchain.get_balance(&transaction.from).await;
        if balance < transaction.max_cost() {
            return Err(rpc_error(format!(
                "insufficient funds for gas * price + value: balance {balance}, tx cost {}",
                transaction.max_cost()
            )));
        }

        let replaced = self
            .transaction_pool
            .find_by_nonce(&transaction.from, transaction.nonce)
            .await;
        let transaction = Arc::new(transaction);
        match replaced {
            // Replacement needs a 10% higher gas price.
            Some(old) if transaction.gas_price * 10 < old.gas_price * 11 => {
                Err(rpc_error("replacement transaction underpriced"))
            }
            Some(old) => {
                self.transaction_pool
                    .replace_transaction(&old.hash, transaction)
                    .await;
                Ok(hash)
            }
            None => {
                self.transaction_pool.add_transaction(transaction).await;
                Ok(hash)
            }
        }
    }
}

#[async_trait]
impl EthRpcServer for DidRegistryMock {
    async fn chain_id(&self) -> RpcResult<U64> {
        if let Some(value) = self.intercept("eth_chainId")? {
            return Ok(value);
        }
        Ok(U64::from(self.chain_id()))
    }

    async fn block_number(&self) -> RpcResult<U64> {
        if let Some(value) = self.intercept("eth_blockNumber")? {
            return Ok(value);
        }
        Ok(U64::from(self.blockchain.get_latest_block_number().await))
    }

    async fn gas_price(&self) -> RpcResult<U256> {
        if let Some(value) = self.intercept("eth_gasPrice")? {
            return Ok(value);
        }
        Ok(U256::from(DEFAULT_GAS_PRICE))
    }

    async fn get_balance(&self, address: Address, _block: Option<BlockId>) -> RpcResult<U256> {
        if let Some(value) = self.intercept("eth_getBalance")? {
            return Ok(value);
        }
        Ok(self.blockchain.get_balance(&address).await)
    }

    async fn get_transaction_count(
        &self,
        address: Address,
        block: Option<BlockId>,
    ) -> RpcResult<U64> {
        if let Some(value) = self.intercept("eth_getTransactionCount")? {
            return Ok(value);
        }
        let confirmed = self.blockchain.get_nonce(&address).await;
        let count = match block {
            Some(BlockId::Number(BlockNumberOrTag::Pending)) => {
                self.transaction_pool.pending_nonce(&address, confirmed).await
            }
            _ => confirmed,
        };
        Ok(U64::from(count))
    }

    async fn send_raw_transaction(&self, data: Bytes) -> RpcResult<B256> {
        if let Some(value) = self.intercept("eth_sendRawTransaction")? {
            return Ok(value);
        }
        let transaction = Transaction::from_raw(&data).map_err(rpc_error)?;
        log::debug!(
            "Received transaction 0x{:x} from {} with nonce {}",
            transaction.hash,
            transaction.from,
            transaction.nonce
        );
        self.accept_transaction(transaction).await
    }

    async fn get_transaction_receipt(&self, hash: B256) -> RpcResult<Option<serde_json::Value>> {
        if let Some(value) = self.intercept("eth_getTransactionReceipt")? {
            return Ok(value);
        }
        Ok(self
            .blockchain
            .get_receipt(&hash)
            .await
            .map(|receipt| receipt.to_json()))
    }

    async fn call(
        &self,
        request: TransactionRequest,
        _block: Option<BlockId>,
        _state_overrides: Option<serde_json::Value>,
    ) -> RpcResult<Bytes> {
        if let Some(value) = self.intercept("eth_call")? {
            return Ok(value);
        }
        let to = request
            .to
            .and_then(|kind| kind.to().copied())
            .ok_or_else(|| rpc_error("call without destination"))?;
        let from = request.from.unwrap_or_default();
        let data = request.input.input().cloned().unwrap_or_default();

        match self.blockchain.call(from, to, &data).await {
            ExecutionOutcome::Success { output, .. } => Ok(output),
            ExecutionOutcome::Revert { reason } => Err(ErrorObjectOwned::owned(
                REVERT_ERROR,
                format!("execution reverted: {reason}"),
                Some(ExecutionOutcome::revert_data(&reason)),
            )),
        }
    }
}
