//! # DID Registry SDK
//!
//! Client for decentralized identifier registries deployed as smart contracts on
//! EVM compatible chains such as IoTeX. A registry maps a DID string to a 32 byte
//! document hash and a URI pointing at the DID document.
//!
//! The SDK supports the registry's six operations: creating, reading the hash,
//! reading the URI, updating the hash, updating the URI and deleting a DID.
//!
//! ```no_run
//! # async fn run() -> did_registry_sdk::Result<()> {
//! use did_registry_sdk::{DidRegistryClient, Endpoint, GasSettings, PrivateKey, parse_address};
//!
//! # let abi = "[]";
//! let client = DidRegistryClient::builder()
//!     .endpoint(Endpoint::parse("api.testnet.iotex.one:443")?)
//!     .build()?;
//! let registry = client.registry(parse_address("0x1234567890123456789012345678901234567890")?, abi)?;
//!
//! let key: PrivateKey = "414efa99dfac6f4095d6954713fb0085268d400d6a05a8ae8a69b5b1c10b4bed".parse()?;
//! let gas = GasSettings::parse("1000000000000", 1_000_000)?;
//! let submission = registry
//!     .create_did(&key, &gas, "", "0x414efa99dfac6f4095d6954713fb0085268d400d6a05a8ae8a69b5b1c10b4bed", "urixxx")
//!     .await?;
//! registry.wait_for_confirmation(&submission, None).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Layers
//!
//! - [`DidRegistryClient`] and [`Registry`] for the registry operations.
//! - [`Submitter`], [`ConfirmationPoller`] and [`QueryExecutor`] for lower level control
//!   over nonces, confirmation and reads.
//! - [`Connector`] for raw JSON-RPC access.

pub use alloy::primitives::{Address, B256, keccak256};
pub use alloy::signers::Signature;
pub use tokio_util::sync::CancellationToken;

pub use abi::{ContractDescriptor, DecodedEvent, DescriptorCache};
pub use client::{DidRegistryClient, parse_address};
pub use config::{ClientConfig, ConnectorConfig, PollerConfig};
pub use connector::{Connector, Endpoint, NonceTag};
pub use did::{Did, DidDocument, DidRecord};
pub use error::{ConnectionError, Error, ErrorCode, OperationResult, Result, SubmissionError};
pub use events::RegistryEvent;
pub use poller::{ConfirmationPoller, PollState, Receipt};
pub use query::QueryExecutor;
pub use registry::Registry;
pub use signer::{Credential, PrivateKey, TransactionSigner};
pub use transaction::{ContractTransaction, GasSettings, Nonce, SignedEnvelope, Submission, Submitter};

/// Encoding and decoding of contract calls against a runtime ABI descriptor.
pub mod abi;

/// The client entry point and registry binding.
pub mod client;

/// Client configuration.
pub mod config;

/// Connection to the chain endpoint.
pub mod connector;

/// DID strings, registry records and DID documents.
pub mod did;

/// Error types and status codes.
pub mod error;

/// Registry events decoded from receipts.
pub mod events;

/// Waiting for transaction confirmation.
pub mod poller;

/// Read-only contract calls.
pub mod query;

/// The registry operations.
pub mod registry;

/// Private keys and transaction signers.
pub mod signer;

/// Building, signing and broadcasting transactions.
pub mod transaction;
