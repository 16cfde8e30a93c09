use crate::block::Transaction;
use alloy::primitives::{Address, B256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Internal state of the transaction pool wrapped in RwLock
#[derive(Clone, Debug, Default)]
pub struct TransactionPoolState {
    transactions: HashMap<B256, Arc<Transaction>>,
    held_since: Option<Instant>,
    hold_duration: Duration,
}

impl TransactionPoolState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep transactions out of blocks for the given duration, starting now
    pub fn hold_transactions_for(&mut self, hold_duration: Duration) {
        self.hold_duration = hold_duration;
        self.held_since = Some(Instant::now());
    }

    /// Check if the hold period has passed
    pub fn is_hold_period_passed(&self) -> bool {
        match self.held_since {
            Some(held_since) => held_since.elapsed() >= self.hold_duration,
            None => true,
        }
    }

    pub fn add_transaction(&mut self, transaction: Arc<Transaction>) {
        let hash = transaction.hash;
        self.transactions.insert(hash, transaction);
        log::info!("Transaction 0x{hash:x} added to pool");
    }

    pub fn get_transaction(&self, hash: &B256) -> Option<Arc<Transaction>> {
        self.transactions.get(hash).cloned()
    }

    pub fn remove_transaction(&mut self, hash: &B256) -> Option<Arc<Transaction>> {
        self.transactions.remove(hash)
    }

    /// Pending transaction of `address` using `nonce`, if any
    pub fn find_by_nonce(&self, address: &Address, nonce: u64) -> Option<Arc<Transaction>> {
        self.transactions
            .values()
            .find(|tx| tx.from == *address && tx.nonce == nonce)
            .cloned()
    }

    /// Get a batch of transactions for mining. Empty while transactions are held.
    pub fn get_transaction_batch(&self, max_count: usize) -> Vec<Arc<Transaction>> {
        if !self.is_hold_period_passed() {
            return Vec::new();
        }
        self.transactions
            .values()
            .take(max_count)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Next nonce of `address` given its confirmed nonce and the pooled transactions
    pub fn pending_nonce(&self, address: &Address, confirmed: u64) -> u64 {
        let mut next = confirmed;
        while self.find_by_nonce(address, next).is_some() {
            next += 1;
        }
        next
    }
}

/// Transaction pool that holds pending transactions until they are mined
#[derive(Clone, Debug, Default)]
pub struct TransactionPool {
    state: Arc<RwLock<TransactionPoolState>>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep transactions out of blocks for the given duration
    pub async fn hold_transactions_for(&self, hold_duration: Duration) {
        self.state
            .write()
            .await
            .hold_transactions_for(hold_duration);
    }

    pub async fn add_transaction(&self, transaction: Arc<Transaction>) {
        self.state.write().await.add_transaction(transaction);
    }

    /// Add `transaction`, evicting the pending transaction it replaces
    pub async fn replace_transaction(&self, old: &B256, transaction: Arc<Transaction>) {
        let mut state = self.state.write().await;
        state.remove_transaction(old);
        log::info!(
            "Transaction 0x{old:x} replaced by 0x{:x}",
            transaction.hash
        );
        state.add_transaction(transaction);
    }

    pub async fn get_transaction(&self, hash: &B256) -> Option<Arc<Transaction>> {
        self.state.read().await.get_transaction(hash)
    }

    pub async fn find_by_nonce(&self, address: &Address, nonce: u64) -> Option<Arc<Transaction>> {
        self.state.read().await.find_by_nonce(address, nonce)
    }

    /// Remove a transaction from the pool (when it gets mined)
    pub async fn remove_transaction(&self, hash: &B256) -> Option<Arc<Transaction>> {
        self.state.write().await.remove_transaction(hash)
    }

    pub async fn get_transaction_batch(&self, max_count: usize) -> Vec<Arc<Transaction>> {
        self.state.read().await.get_transaction_batch(max_count)
    }

    pub async fn count(&self) -> usize {
        self.state.read().await.count()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.is_empty()
    }

    pub async fn pending_nonce(&self, address: &Address, confirmed: u64) -> u64 {
        self.state.read().await.pending_nonce(address, confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, U256};

    fn transaction(byte: u8, nonce: u64) -> Arc<Transaction> {
        Arc::new(Transaction {
            hash: B256::repeat_byte(byte),
            from: Address::repeat_byte(1),
            to: None,
            value: U256::ZERO,
            gas_limit: 21_000,
            gas_price: 1,
            nonce,
            chain_id: Some(1337),
            data: Bytes::new(),
        })
    }

    #[test]
    fn test_pending_nonce_counts_contiguous_transactions() {
        let mut pool = TransactionPoolState::new();
        pool.add_transaction(transaction(1, 3));
        pool.add_transaction(transaction(2, 4));
        pool.add_transaction(transaction(3, 6));
        assert_eq!(pool.pending_nonce(&Address::repeat_byte(1), 3), 5);
        assert_eq!(pool.pending_nonce(&Address::repeat_byte(2), 0), 0);
    }

    #[test]
    fn test_hold_blocks_batches() {
        let mut pool = TransactionPoolState::new();
        pool.add_transaction(transaction(1, 0));
        pool.hold_transactions_for(Duration::from_secs(60));
        assert!(pool.get_transaction_batch(10).is_empty());
        pool.hold_transactions_for(Duration::ZERO);
        assert_eq!(pool.get_transaction_batch(10).len(), 1);
    }
}
