use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, B256, Bytes, TxKind, U256};
use tokio::sync::{Mutex, OnceCell};

use crate::connector::{Connector, NonceTag};
use crate::error::{Error, Result, SubmissionError};
use crate::signer::TransactionSigner;

/// How the nonce of a new transaction is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Nonce {
    /// Next nonce after everything the node knows about, pending transactions included.
    #[default]
    Pending,
    /// A caller-managed nonce. It must be the next free one.
    Explicit(u64),
    /// Deliberately replace the pending transaction that uses this nonce.
    Replace(u64),
}

/// Gas parameters of a state-changing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasSettings {
    /// Gas price in the chain's smallest unit.
    pub gas_price: u128,
    pub gas_limit: u64,
    pub nonce: Nonce,
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            gas_price: 1_000_000_000_000,
            gas_limit: 1_000_000,
            nonce: Nonce::Pending,
        }
    }
}

impl GasSettings {
    pub fn new(gas_price: u128, gas_limit: u64) -> Self {
        Self {
            gas_price,
            gas_limit,
            nonce: Nonce::Pending,
        }
    }

    /// Builds settings from a decimal gas price string.
    pub fn parse(gas_price: &str, gas_limit: u64) -> Result<Self> {
        let gas_price = gas_price.trim().parse::<u128>().map_err(|e| {
            Error::InvalidArgument(format!("gas price '{gas_price}' is not a decimal integer: {e}"))
        })?;
        if gas_limit == 0 {
            return Err(Error::InvalidArgument("gas limit must be positive".to_string()));
        }
        Ok(Self::new(gas_price, gas_limit))
    }

    pub fn with_nonce(mut self, nonce: Nonce) -> Self {
        self.nonce = nonce;
        self
    }
}

/// A contract call ready to be signed. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractTransaction {
    pub chain_id: u64,
    pub from: Address,
    pub to: Address,
    pub input: Bytes,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub nonce: u64,
}

/// A signed, EIP-2718 encoded transaction.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedEnvelope {
    pub hash: B256,
    pub from: Address,
    pub nonce: u64,
    pub raw: Bytes,
}

impl fmt::Debug for SignedEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedEnvelope")
            .field("hash", &self.hash)
            .field("from", &self.from)
            .field("nonce", &self.nonce)
            .finish_non_exhaustive()
    }
}

impl ContractTransaction {
    /// Signs the transaction as an EIP-155 legacy transaction.
    ///
    /// Signing is deterministic: the same transaction and key always give the same envelope.
    pub async fn sign(&self, signer: &dyn TransactionSigner) -> Result<SignedEnvelope> {
        if signer.address() != self.from {
            return Err(Error::InvalidArgument(format!(
                "transaction from {} cannot be signed by {}",
                self.from,
                signer.address()
            )));
        }

        let tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: TxKind::Call(self.to),
            value: U256::ZERO,
            input: self.input.clone(),
        };
        let payload = tx.encoded_for_signing();
        let signature = signer
            .sign(&payload)
            .await
            .map_err(|e| Error::Key(format!("failed to sign transaction: {e}")))?;

        let signed = tx.into_signed(signature);
        let hash = *signed.hash();
        let raw = TxEnvelope::from(signed).encoded_2718();
        log::trace!("Signed transaction 0x{hash:x} ({} bytes)", raw.len());

        Ok(SignedEnvelope {
            hash,
            from: self.from,
            nonce: self.nonce,
            raw: raw.into(),
        })
    }
}

/// A transaction accepted by the node. Confirmation is checked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub tx_hash: B256,
    pub from: Address,
    pub nonce: u64,
}

impl fmt::Display for Submission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tx_hash)
    }
}

/// Assigns nonces and broadcasts signed transactions. Never waits for inclusion.
#[derive(Debug, Clone)]
pub struct Submitter {
    connector: Connector,
    chain_id: Arc<OnceCell<u64>>,
    /// Held per sender from nonce resolution until the node accepted the transaction.
    senders: Arc<Mutex<HashMap<Address, Arc<Mutex<()>>>>>,
}

impl Submitter {
    pub fn new(connector: Connector) -> Self {
        Self {
            connector,
            chain_id: Arc::new(OnceCell::new()),
            senders: Arc::default(),
        }
    }

    async fn sender_lock(&self, from: Address) -> Arc<Mutex<()>> {
        self.senders.lock().await.entry(from).or_default().clone()
    }

    /// Chain id of the endpoint, fetched on first use.
    pub async fn chain_id(&self) -> Result<u64> {
        self.chain_id
            .get_or_try_init(|| self.connector.chain_id())
            .await
            .copied()
    }

    /// Picks the nonce for a new transaction from `from`.
    pub async fn resolve_nonce(&self, from: Address, nonce: Nonce) -> Result<u64> {
        if let Nonce::Pending = nonce {
            return self.connector.transaction_count(from, NonceTag::Pending).await;
        }

        let (latest, pending) = tokio::try_join!(
            self.connector.transaction_count(from, NonceTag::Latest),
            self.connector.transaction_count(from, NonceTag::Pending),
        )?;
        log::debug!("Nonces of {from}: latest {latest}, pending {pending}, requested {nonce:?}");
        match nonce {
            Nonce::Explicit(n) | Nonce::Replace(n) if n < latest => {
                Err(SubmissionError::NonceTooLow(format!(
                    "nonce {n} is below the account nonce {latest}"
                ))
                .into())
            }
            Nonce::Explicit(n) | Nonce::Replace(n) if n > pending => {
                Err(SubmissionError::NonceTooHigh(format!(
                    "nonce {n} leaves a gap, next free nonce is {pending}"
                ))
                .into())
            }
            Nonce::Explicit(n) if n < pending => Err(SubmissionError::NonceConflict(format!(
                "nonce {n} is used by a pending transaction, use Nonce::Replace to replace it"
            ))
            .into()),
            Nonce::Explicit(n) | Nonce::Replace(n) => Ok(n),
            Nonce::Pending => Ok(pending),
        }
    }

    /// Assembles a transaction to `to` carrying `input`.
    pub async fn prepare(
        &self,
        from: Address,
        to: Address,
        input: Bytes,
        gas: &GasSettings,
    ) -> Result<ContractTransaction> {
        let (chain_id, nonce) = tokio::try_join!(self.chain_id(), self.resolve_nonce(from, gas.nonce))?;
        Ok(ContractTransaction {
            chain_id,
            from,
            to,
            input,
            gas_price: gas.gas_price,
            gas_limit: gas.gas_limit,
            nonce,
        })
    }

    /// Broadcasts a signed transaction.
    ///
    /// Sending an envelope the node already holds is not an error and returns the same hash.
    pub async fn submit(&self, envelope: &SignedEnvelope) -> Result<Submission> {
        let submission = Submission {
            tx_hash: envelope.hash,
            from: envelope.from,
            nonce: envelope.nonce,
        };
        match self.connector.send_raw_transaction(&envelope.raw).await {
            Ok(hash) => {
                if hash != envelope.hash {
                    log::warn!(
                        "Node reported hash {hash} for transaction 0x{:x}",
                        envelope.hash
                    );
                }
                log::info!(
                    "Submitted transaction 0x{:x} from {} with nonce {}",
                    envelope.hash,
                    envelope.from,
                    envelope.nonce
                );
                Ok(submission)
            }
            Err(Error::Rpc { message, .. }) if is_already_known(&message) => {
                log::debug!(
                    "Transaction 0x{:x} is already known to the node",
                    envelope.hash
                );
                Ok(submission)
            }
            Err(Error::Rpc { message, .. }) => {
                let error = classify_rejection(&message);
                log::debug!("Transaction 0x{:x} rejected: {error}", envelope.hash);
                Err(error.into())
            }
            Err(e) => Err(e),
        }
    }

    /// Prepares, signs and broadcasts a call in one step.
    ///
    /// Concurrent calls for the same signer are serialized, so each one sees the
    /// pending nonce left by the previous.
    pub async fn send(
        &self,
        signer: &dyn TransactionSigner,
        to: Address,
        input: Bytes,
        gas: &GasSettings,
    ) -> Result<Submission> {
        let lock = self.sender_lock(signer.address()).await;
        let _guard = lock.lock().await;
        let tx = self.prepare(signer.address(), to, input, gas).await?;
        let envelope = tx.sign(signer).await?;
        self.submit(&envelope).await
    }
}

fn is_already_known(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("already known") || lower.contains("known transaction")
}

/// Maps a node's rejection message to a submission error.
pub fn classify_rejection(message: &str) -> SubmissionError {
    let lower = message.to_lowercase();
    let message = message.to_string();
    if lower.contains("nonce too low") {
        SubmissionError::NonceTooLow(message)
    } else if lower.contains("nonce too high") || lower.contains("nonce gap") {
        SubmissionError::NonceTooHigh(message)
    } else if lower.contains("replacement transaction underpriced")
        || lower.contains("already imported")
    {
        SubmissionError::NonceConflict(message)
    } else if lower.contains("insufficient funds") {
        SubmissionError::InsufficientFunds(message)
    } else if lower.contains("intrinsic gas")
        || lower.contains("invalid chain id")
        || lower.contains("invalid sender")
        || lower.contains("rlp")
        || lower.contains("failed to decode")
        || lower.contains("exceeds block gas limit")
        || lower.contains("oversized data")
    {
        SubmissionError::Malformed(message)
    } else {
        SubmissionError::Rejected(message)
    }
}

#[cfg(test)]
mod tests {
    use alloy::consensus::Transaction;
    use alloy::consensus::transaction::SignerRecoverable;
    use alloy::eips::eip2718::Decodable2718;
    use alloy::primitives::address;

    use super::*;
    use crate::signer::PrivateKey;

    const KEY: &str = "414efa99dfac6f4095d6954713fb0085268d400d6a05a8ae8a69b5b1c10b4bed";

    fn transaction(from: Address) -> ContractTransaction {
        ContractTransaction {
            chain_id: 4690,
            from,
            to: address!("0x1234567890123456789012345678901234567890"),
            input: Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]),
            gas_price: 1_000_000_000_000,
            gas_limit: 1_000_000,
            nonce: 7,
        }
    }

    #[test]
    fn test_parse_gas_settings() {
        let gas = GasSettings::parse("1000000000000", 1_000_000).unwrap();
        assert_eq!(gas.gas_price, 1_000_000_000_000);
        assert_eq!(gas.nonce, Nonce::Pending);

        assert!(matches!(
            GasSettings::parse("1e12", 1_000_000),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            GasSettings::parse("-1", 1_000_000),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            GasSettings::parse("1", 0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_classify_rejection() {
        assert!(matches!(
            classify_rejection("nonce too low: next nonce 5, tx nonce 3"),
            SubmissionError::NonceTooLow(_)
        ));
        assert!(matches!(
            classify_rejection("Nonce too high"),
            SubmissionError::NonceTooHigh(_)
        ));
        assert!(matches!(
            classify_rejection("replacement transaction underpriced"),
            SubmissionError::NonceConflict(_)
        ));
        assert!(matches!(
            classify_rejection("insufficient funds for gas * price + value"),
            SubmissionError::InsufficientFunds(_)
        ));
        assert!(matches!(
            classify_rejection("intrinsic gas too low"),
            SubmissionError::Malformed(_)
        ));
        assert!(matches!(
            classify_rejection("txpool is full"),
            SubmissionError::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn test_sign_is_deterministic_and_recoverable() {
        let key = PrivateKey::parse(KEY).unwrap();
        let tx = transaction(key.address());

        let first = tx.sign(&key.credential().unwrap()).await.unwrap();
        let second = tx.sign(&key.credential().unwrap()).await.unwrap();
        assert_eq!(first, second);

        let decoded = TxEnvelope::decode_2718(&mut first.raw.as_ref()).unwrap();
        assert_eq!(*decoded.tx_hash(), first.hash);
        assert_eq!(decoded.recover_signer().unwrap(), key.address());
        assert_eq!(decoded.nonce(), 7);
        assert_eq!(decoded.chain_id(), Some(4690));
        assert_eq!(decoded.gas_limit(), 1_000_000);
    }

    #[tokio::test]
    async fn test_sign_rejects_foreign_signer() {
        let key = PrivateKey::parse(KEY).unwrap();
        let tx = transaction(address!("0x0000000000000000000000000000000000000001"));
        let err = tx.sign(&key.credential().unwrap()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
