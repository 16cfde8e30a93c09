use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use alloy::rpc::types::TransactionReceipt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::abi::ContractDescriptor;
use crate::config::PollerConfig;
use crate::connector::Connector;
use crate::error::{Error, Result};
use crate::events::{RegistryEvent, decode_logs};

/// A transaction included in a block.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    /// Execution status: `false` when the transaction reverted.
    pub success: bool,
    pub gas_used: u64,
    pub events: Vec<RegistryEvent>,
}

/// Progress of a confirmation wait.
#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    /// Not included yet.
    Pending { attempts: u32 },
    /// Included and executed successfully.
    Confirmed(Receipt),
    /// Included, but execution failed.
    Reverted(Receipt),
    /// Gave up waiting. The transaction may still be included later.
    TimedOut { attempts: u32, elapsed: Duration },
    /// The caller stopped waiting.
    Cancelled,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Pending { .. })
    }
}

/// Waits for transaction receipts with exponential backoff.
#[derive(Debug, Clone)]
pub struct ConfirmationPoller {
    connector: Connector,
    config: PollerConfig,
    descriptor: Option<Arc<ContractDescriptor>>,
}

impl ConfirmationPoller {
    pub fn new(connector: Connector, config: PollerConfig) -> Self {
        Self {
            connector,
            config,
            descriptor: None,
        }
    }

    /// Decode receipt logs with the given contract interface.
    pub fn with_descriptor(mut self, descriptor: Arc<ContractDescriptor>) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Polls until the transaction reaches a terminal state.
    ///
    /// Transport failures and "indexing in progress" answers are retried within the
    /// configured bounds. Other errors end the wait. Cancelling `cancel` drops the
    /// outstanding request; the transaction itself is not affected.
    pub async fn watch(&self, tx_hash: B256, cancel: &CancellationToken) -> Result<PollState> {
        let started = Instant::now();
        let mut state = PollState::Pending { attempts: 0 };

        while let PollState::Pending { attempts } = state {
            let elapsed = started.elapsed();
            let remaining = self.config.timeout.saturating_sub(elapsed);
            if remaining.is_zero() || attempts >= self.config.max_attempts {
                log::debug!(
                    "Giving up on transaction 0x{tx_hash:x} after {attempts} attempts ({elapsed:?})"
                );
                state = PollState::TimedOut { attempts, elapsed };
                break;
            }

            let lookup = tokio::time::timeout(remaining, self.connector.transaction_receipt(tx_hash));
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    state = PollState::Cancelled;
                    break;
                }
                outcome = lookup => outcome,
            };
            let attempts = attempts + 1;

            match outcome {
                Ok(Ok(Some(receipt))) => {
                    state = self.terminal_state(receipt);
                    break;
                }
                Ok(Ok(None)) => {
                    log::trace!("No receipt yet for transaction 0x{tx_hash:x} (attempt {attempts})");
                }
                Ok(Err(e)) if is_transient(&e) => {
                    log::debug!(
                        "Receipt lookup for 0x{tx_hash:x} failed (attempt {attempts}), retrying: {e}"
                    );
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    log::debug!("Receipt lookup for 0x{tx_hash:x} did not finish in time");
                }
            }
            state = PollState::Pending { attempts };

            let delay = self
                .config
                .delay_for_attempt(attempts - 1)
                .min(self.config.timeout.saturating_sub(started.elapsed()));
            tokio::select! {
                _ = cancel.cancelled() => {
                    state = PollState::Cancelled;
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        Ok(state)
    }

    /// Waits for a successful confirmation.
    ///
    /// A reverted transaction is reported as [`Error::Reverted`], running out of time as
    /// [`Error::Timeout`] and cancellation as [`Error::Cancelled`].
    pub async fn wait(&self, tx_hash: B256, cancel: &CancellationToken) -> Result<Receipt> {
        match self.watch(tx_hash, cancel).await? {
            PollState::Confirmed(receipt) => Ok(receipt),
            PollState::Reverted(receipt) => Err(Error::Reverted(format!(
                "transaction 0x{tx_hash:x} failed in block {}",
                receipt
                    .block_number
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            ))),
            PollState::TimedOut { elapsed, .. } => Err(Error::Timeout {
                tx_hash,
                elapsed: elapsed.into(),
            }),
            PollState::Cancelled => Err(Error::Cancelled(tx_hash)),
            PollState::Pending { .. } => Err(Error::Timeout {
                tx_hash,
                elapsed: Duration::ZERO.into(),
            }),
        }
    }

    fn terminal_state(&self, receipt: TransactionReceipt) -> PollState {
        let events = self
            .descriptor
            .as_ref()
            .map(|descriptor| decode_logs(descriptor, receipt.inner.logs()))
            .unwrap_or_default();
        let receipt = Receipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            success: receipt.inner.status(),
            gas_used: receipt.gas_used,
            events,
        };
        if receipt.success {
            log::info!(
                "Transaction 0x{:x} confirmed in block {:?}",
                receipt.tx_hash,
                receipt.block_number
            );
            PollState::Confirmed(receipt)
        } else {
            log::info!(
                "Transaction 0x{:x} reverted in block {:?}",
                receipt.tx_hash,
                receipt.block_number
            );
            PollState::Reverted(receipt)
        }
    }
}

fn is_transient(error: &Error) -> bool {
    match error {
        Error::Connection(_) => true,
        Error::Rpc { message, .. } => message.contains("transaction indexing is in progress"),
        _ => false,
    }
}
