use alloy::consensus::transaction::SignerRecoverable;
use alloy::consensus::{Transaction as _, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{Address, B256, Bloom, Bytes, U256};
use serde_json::json;
use std::sync::Arc;

/// Represents a signed transaction accepted by the mock node
#[derive(Clone, Debug)]
pub struct Transaction {
    pub hash: B256,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub nonce: u64,
    pub chain_id: Option<u64>,
    pub data: Bytes,
}

impl Transaction {
    /// Decode an EIP-2718 encoded transaction and recover its sender
    pub fn from_raw(raw: &[u8]) -> Result<Self, String> {
        let envelope = TxEnvelope::decode_2718(&mut &raw[..])
            .map_err(|e| format!("failed to decode transaction: {e}"))?;
        let from = envelope
            .recover_signer()
            .map_err(|e| format!("invalid sender: {e}"))?;

        Ok(Self {
            hash: *envelope.tx_hash(),
            from,
            to: envelope.to(),
            value: envelope.value(),
            gas_limit: envelope.gas_limit(),
            gas_price: envelope.gas_price().unwrap_or_else(|| envelope.max_fee_per_gas()),
            nonce: envelope.nonce(),
            chain_id: envelope.chain_id(),
            data: envelope.input().clone(),
        })
    }

    /// Maximum amount the transaction may spend
    pub fn max_cost(&self) -> U256 {
        U256::from(self.gas_limit) * U256::from(self.gas_price) + self.value
    }

    /// Gas charged for the payload before any execution
    pub fn intrinsic_gas(&self) -> u64 {
        let data_gas: u64 = self
            .data
            .iter()
            .map(|byte| if *byte == 0 { 4 } else { 16 })
            .sum();
        21_000 + data_gas
    }
}

/// A log emitted while executing a transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// Outcome of an executed transaction
#[derive(Clone, Debug)]
pub struct TransactionReceipt {
    pub transaction: Arc<Transaction>,
    pub block_number: u64,
    pub block_hash: B256,
    pub transaction_index: u64,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    pub success: bool,
    pub logs: Vec<TransactionLog>,
    /// First log index of this transaction within the block
    pub log_index_offset: u64,
}

fn quantity(value: u64) -> String {
    format!("0x{value:x}")
}

impl TransactionReceipt {
    /// Render the receipt the way `eth_getTransactionReceipt` returns it
    pub fn to_json(&self) -> serde_json::Value {
        let tx = &self.transaction;
        let logs: Vec<_> = self
            .logs
            .iter()
            .enumerate()
            .map(|(i, log)| {
                json!({
                    "address": log.address,
                    "topics": log.topics,
                    "data": log.data,
                    "blockHash": self.block_hash,
                    "blockNumber": quantity(self.block_number),
                    "transactionHash": tx.hash,
                    "transactionIndex": quantity(self.transaction_index),
                    "logIndex": quantity(self.log_index_offset + i as u64),
                    "removed": false,
                })
            })
            .collect();

        json!({
            "type": "0x0",
            "status": if self.success { "0x1" } else { "0x0" },
            "cumulativeGasUsed": quantity(self.cumulative_gas_used),
            "logs": logs,
            "logsBloom": Bloom::ZERO,
            "transactionHash": tx.hash,
            "transactionIndex": quantity(self.transaction_index),
            "blockHash": self.block_hash,
            "blockNumber": quantity(self.block_number),
            "gasUsed": quantity(self.gas_used),
            "effectiveGasPrice": format!("0x{:x}", tx.gas_price),
            "from": tx.from,
            "to": tx.to,
            "contractAddress": serde_json::Value::Null,
        })
    }
}

/// Represents the header of a block
#[derive(Clone, Debug)]
pub struct BlockHeader {
    pub block_number: u64,
    pub previous_block_hash: B256,
    pub block_hash: B256,
    pub gas_used: u64,
    pub timestamp: u64,
}

/// Represents a block in the mock blockchain
#[derive(Clone, Debug)]
pub struct Block {
    pub header: BlockHeader,
    pub receipts: Vec<TransactionReceipt>,
}

impl Block {
    /// Compute block hash based on block content and previous block hash
    pub fn compute_hash(
        block_number: u64,
        previous_block_hash: B256,
        transactions: &[Arc<Transaction>],
    ) -> B256 {
        let mut hash_bytes = [0u8; 32];
        hash_bytes[0..8].copy_from_slice(&block_number.to_le_bytes());
        for (byte, prev) in hash_bytes.iter_mut().zip(previous_block_hash.as_slice()) {
            *byte ^= prev;
        }
        hash_bytes[8..16].copy_from_slice(&(transactions.len() as u64).to_le_bytes());
        for tx in transactions {
            for (byte, tx_byte) in hash_bytes.iter_mut().zip(tx.hash.as_slice()) {
                *byte ^= tx_byte;
            }
        }
        B256::from(hash_bytes)
    }
}
