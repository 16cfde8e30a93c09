use alloy::primitives::{Address, B256, Bytes, U256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

use crate::block::{Block, BlockHeader, Transaction, TransactionReceipt};
use crate::contract::{ExecutionOutcome, REGISTRY_ADDRESS, RegistryContract, StorageMode};

/// Represents an account in the mock blockchain
#[derive(Clone, Debug)]
pub struct Account {
    pub address: Address,
    pub nonce: u64,
    pub balance: U256,
    pub transactions: Vec<B256>,
}

impl Account {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            nonce: 0,
            balance: U256::ZERO,
            transactions: Vec::new(),
        }
    }
}

/// Internal state of the blockchain
#[derive(Clone, Debug, Default)]
struct BlockchainState {
    blocks_by_number: HashMap<u64, Arc<Block>>,
    receipts: HashMap<B256, TransactionReceipt>,
    accounts: HashMap<Address, Account>,
    registry: RegistryContract,
    latest_block: Option<u64>,
}

/// Main mock blockchain structure
#[derive(Clone, Debug, Default)]
pub struct Blockchain {
    state: Arc<RwLock<BlockchainState>>,
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl Blockchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute `transactions` in order and append the resulting block
    pub async fn mine_block(&self, transactions: Vec<Arc<Transaction>>) -> Arc<Block> {
        let mut state = self.state.write().await;
        let block_number = state.latest_block.map(|n| n + 1).unwrap_or(0);
        let previous_block_hash = state
            .latest_block
            .and_then(|n| state.blocks_by_number.get(&n))
            .map(|block| block.header.block_hash)
            .unwrap_or(B256::ZERO);
        let block_hash = Block::compute_hash(block_number, previous_block_hash, &transactions);

        let mut receipts = Vec::with_capacity(transactions.len());
        let mut cumulative_gas_used = 0;
        let mut log_index_offset = 0;
        for (index, transaction) in transactions.into_iter().enumerate() {
            let (success, gas_used, logs) = Self::execute(&mut state, &transaction);
            cumulative_gas_used += gas_used;
            let receipt = TransactionReceipt {
                transaction,
                block_number,
                block_hash,
                transaction_index: index as u64,
                gas_used,
                cumulative_gas_used,
                success,
                log_index_offset,
                logs,
            };
            log_index_offset += receipt.logs.len() as u64;
            state
                .receipts
                .insert(receipt.transaction.hash, receipt.clone());
            receipts.push(receipt);
        }

        let block = Arc::new(Block {
            header: BlockHeader {
                block_number,
                previous_block_hash,
                block_hash,
                gas_used: cumulative_gas_used,
                timestamp: now(),
            },
            receipts,
        });
        state.blocks_by_number.insert(block_number, block.clone());
        state.latest_block = Some(block_number);
        block
    }

    /// Apply a transaction to account and contract state
    fn execute(
        state: &mut BlockchainState,
        transaction: &Transaction,
    ) -> (bool, u64, Vec<crate::block::TransactionLog>) {
        let sender = state
            .accounts
            .entry(transaction.from)
            .or_insert_with(|| Account::new(transaction.from));
        sender.nonce += 1;
        sender.transactions.push(transaction.hash);

        let intrinsic = transaction.intrinsic_gas();
        if intrinsic > transaction.gas_limit {
            log::warn!("Transaction 0x{:x} ran out of gas", transaction.hash);
            Self::charge(state, transaction, transaction.gas_limit);
            return (false, transaction.gas_limit, Vec::new());
        }

        let (success, logs) = match transaction.to {
            Some(to) if to == REGISTRY_ADDRESS => {
                match state.registry.execute(transaction.from, &transaction.data) {
                    ExecutionOutcome::Success { logs, .. } => (true, logs),
                    ExecutionOutcome::Revert { reason } => {
                        log::info!("Transaction 0x{:x} reverted: {reason}", transaction.hash);
                        (false, Vec::new())
                    }
                }
            }
            Some(to) => {
                let receiver = state
                    .accounts
                    .entry(to)
                    .or_insert_with(|| Account::new(to));
                receiver.balance += transaction.value;
                (true, Vec::new())
            }
            None => (false, Vec::new()),
        };
        // Fixed execution cost on top of the payload.
        let gas_used = (intrinsic + 20_000 * logs.len() as u64).min(transaction.gas_limit);
        Self::charge(state, transaction, gas_used);
        (success, gas_used, logs)
    }

    fn charge(state: &mut BlockchainState, transaction: &Transaction, gas_used: u64) {
        if let Some(sender) = state.accounts.get_mut(&transaction.from) {
            let cost = U256::from(gas_used) * U256::from(transaction.gas_price) + transaction.value;
            sender.balance = sender.balance.saturating_sub(cost);
        }
    }

    /// Run a call against the current contract state without persisting changes
    pub async fn call(&self, from: Address, to: Address, data: &Bytes) -> ExecutionOutcome {
        if to != REGISTRY_ADDRESS {
            return ExecutionOutcome::Success {
                output: Bytes::new(),
                logs: Vec::new(),
            };
        }
        let mut registry = self.state.read().await.registry.clone();
        registry.execute(from, data)
    }

    pub async fn get_receipt(&self, hash: &B256) -> Option<TransactionReceipt> {
        self.state.read().await.receipts.get(hash).cloned()
    }

    pub async fn get_block_by_number(&self, block_number: u64) -> Option<Arc<Block>> {
        self.state
            .read()
            .await
            .blocks_by_number
            .get(&block_number)
            .cloned()
    }

    pub async fn get_latest_block_number(&self) -> u64 {
        self.state.read().await.latest_block.unwrap_or(0)
    }

    pub async fn get_account(&self, address: &Address) -> Option<Account> {
        self.state.read().await.accounts.get(address).cloned()
    }

    pub async fn get_nonce(&self, address: &Address) -> u64 {
        self.state
            .read()
            .await
            .accounts
            .get(address)
            .map(|account| account.nonce)
            .unwrap_or(0)
    }

    pub async fn get_balance(&self, address: &Address) -> U256 {
        self.state
            .read()
            .await
            .accounts
            .get(address)
            .map(|account| account.balance)
            .unwrap_or(U256::ZERO)
    }

    pub async fn set_balance(&self, address: Address, balance: U256) {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .entry(address)
            .or_insert_with(|| Account::new(address));
        account.balance = balance;
    }

    /// Switch how the registry contract stores deleted and absent DIDs
    pub async fn set_registry_mode(&self, mode: StorageMode) {
        log::debug!("Registry storage mode set to {mode}");
        self.state.write().await.registry.set_mode(mode);
    }

    /// Number of live DIDs in the registry
    pub async fn did_count(&self) -> usize {
        self.state.read().await.registry.len()
    }

    /// Create and add genesis block
    pub async fn create_genesis_block(&self) {
        if self.state.read().await.latest_block.is_none() {
            self.mine_block(Vec::new()).await;
        }
    }
}
