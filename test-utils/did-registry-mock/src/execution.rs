use crate::block::Transaction;
use crate::blockchain::Blockchain;
use crate::transaction_pool::TransactionPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::{Duration, MissedTickBehavior, interval};

/// Configuration for the execution engine
#[derive(Clone, Debug)]
pub struct ExecutionConfig {
    pub block_frequency: Duration,
    pub max_transactions_per_block: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            block_frequency: Duration::from_secs(1),
            max_transactions_per_block: 100,
        }
    }
}

/// Execution engine that mines blocks from the transaction pool
#[derive(Clone, Debug)]
pub struct ExecutionEngine {
    blockchain: Blockchain,
    transaction_pool: TransactionPool,
    running: Arc<AtomicBool>,
    config: Arc<ExecutionConfig>,
}

impl ExecutionEngine {
    pub fn new(
        blockchain: Blockchain,
        transaction_pool: TransactionPool,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            blockchain,
            transaction_pool,
            running: Arc::new(AtomicBool::new(false)),
            config: Arc::new(config),
        }
    }

    /// Start producing blocks in a background task
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run().await;
        });
    }

    /// Stop producing blocks after the current one
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run(&self) {
        let mut interval = interval(self.config.block_frequency);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.is_running() {
            interval.tick().await;
            self.mine_block().await;
        }
    }

    /// Mine a block with the transactions ready for inclusion
    pub async fn mine_block(&self) {
        let transactions = self
            .transaction_pool
            .get_transaction_batch(self.config.max_transactions_per_block)
            .await;
        let transactions = self.order_by_nonce(&transactions).await;
        for transaction in &transactions {
            self.transaction_pool
                .remove_transaction(&transaction.hash)
                .await;
        }

        let block = self.blockchain.mine_block(transactions).await;
        if block.receipts.is_empty() {
            log::trace!("Mined empty block #{}", block.header.block_number);
        } else {
            log::info!(
                "Mined block #{} (0x{:x}) with {} transactions",
                block.header.block_number,
                block.header.block_hash,
                block.receipts.len()
            );
        }
    }

    /// Keep transactions that continue their sender's nonce sequence, in nonce order
    async fn order_by_nonce(&self, transactions: &[Arc<Transaction>]) -> Vec<Arc<Transaction>> {
        let mut sender_txs: HashMap<_, Vec<Arc<Transaction>>> = HashMap::new();
        for tx in transactions {
            sender_txs.entry(tx.from).or_default().push(tx.clone());
        }

        let mut result = Vec::new();
        for (sender, mut txs) in sender_txs {
            let mut expected_nonce = self.blockchain.get_nonce(&sender).await;
            txs.sort_by_key(|tx| tx.nonce);
            for tx in txs {
                if tx.nonce == expected_nonce {
                    result.push(tx);
                    expected_nonce += 1;
                } else {
                    log::debug!(
                        "Transaction 0x{:x} from {sender} waits for nonce {expected_nonce}, has {}",
                        tx.hash,
                        tx.nonce
                    );
                }
            }
        }
        result
    }
}
