use std::sync::Arc;

use alloy::primitives::Address;
use bech32::Hrp;
use bon::bon;

use crate::abi::{ContractDescriptor, DescriptorCache};
use crate::config::ClientConfig;
use crate::connector::{Connector, Endpoint};
use crate::error::{Error, Result};
use crate::poller::ConfirmationPoller;
use crate::query::QueryExecutor;
use crate::registry::Registry;
use crate::transaction::Submitter;

/// Functions a descriptor must declare to be bound as a registry.
const REGISTRY_FUNCTIONS: [&str; 6] = [
    "createDID",
    "deleteDID",
    "updateHash",
    "updateURI",
    "getHash",
    "getURI",
];

/// A client for DID registry contracts on one chain endpoint.
///
/// Cloning is cheap. All clones and all registries bound from them share one connection.
#[derive(Debug, Clone)]
pub struct DidRegistryClient {
    connector: Connector,
    submitter: Submitter,
    config: Arc<ClientConfig>,
}

#[bon]
impl DidRegistryClient {
    /// Creates a new builder for `DidRegistryClient`.
    /// Connects to `endpoint` using the given configuration, or the default one.
    #[builder]
    pub fn new(endpoint: Endpoint, config: Option<ClientConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();
        let connector = Connector::connect(endpoint, &config.connector)?;
        Ok(Self {
            submitter: Submitter::new(connector.clone()),
            connector,
            config: Arc::new(config),
        })
    }

    /// Replaces the configuration. The connection is re-established with the new timeouts.
    pub fn override_config(&mut self, config: ClientConfig) -> Result<()> {
        let connector = Connector::connect(self.connector.endpoint().clone(), &config.connector)?;
        self.submitter = Submitter::new(connector.clone());
        self.connector = connector;
        self.config = Arc::new(config);
        Ok(())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.connector.endpoint()
    }

    /// Gets the underlying connection for raw JSON-RPC access.
    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Gets the submitter used for state-changing calls.
    pub fn submitter(&self) -> &Submitter {
        &self.submitter
    }

    /// A poller without event decoding, for transactions sent outside a registry.
    pub fn poller(&self) -> ConfirmationPoller {
        ConfirmationPoller::new(self.connector.clone(), self.config.poller.clone())
    }

    /// Binds the registry contract at `contract`, described by the JSON ABI `descriptor_json`.
    ///
    /// Descriptors are parsed once per contract address and shared process-wide.
    pub fn registry(&self, contract: Address, descriptor_json: &str) -> Result<Registry> {
        let descriptor = DescriptorCache::global().get_or_parse(contract, descriptor_json)?;
        check_registry_interface(&descriptor)?;
        log::debug!("Bound DID registry at {contract} on {}", self.endpoint());

        Ok(Registry::new(
            contract,
            descriptor.clone(),
            self.submitter.clone(),
            QueryExecutor::new(self.connector.clone(), contract, descriptor.clone()),
            self.poller().with_descriptor(descriptor),
            self.config.clone(),
        ))
    }
}

fn check_registry_interface(descriptor: &ContractDescriptor) -> Result<()> {
    let missing: Vec<_> = REGISTRY_FUNCTIONS
        .into_iter()
        .filter(|name| !descriptor.has_function(name))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "descriptor is not a DID registry, missing: {}",
            missing.join(", ")
        )))
    }
}

/// Human-readable part of IoTeX bech32 addresses.
const IOTEX_HRP: &str = "io";

/// Parses a 20 byte contract or account address, either `0x` prefixed hex or
/// IoTeX `io1` bech32.
pub fn parse_address(value: &str) -> Result<Address> {
    let value = value.trim();
    if value.starts_with("0x") {
        return value
            .parse()
            .map_err(|e| Error::InvalidArgument(format!("invalid address '{value}': {e}")));
    }
    if value.starts_with("io1") {
        return parse_iotex_address(value);
    }
    Err(Error::InvalidArgument(format!(
        "address '{value}' must be 0x prefixed hex or io1 bech32"
    )))
}

fn parse_iotex_address(value: &str) -> Result<Address> {
    let (hrp, payload) = bech32::decode(value)
        .map_err(|e| Error::InvalidArgument(format!("invalid address '{value}': {e}")))?;
    if hrp != Hrp::parse_unchecked(IOTEX_HRP) {
        return Err(Error::InvalidArgument(format!(
            "address '{value}' is not an IoTeX address"
        )));
    }
    Address::try_from(payload.as_slice()).map_err(|_| {
        Error::InvalidArgument(format!("address '{value}' is not a 20 byte IoTeX address"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert!(parse_address("0x1234567890123456789012345678901234567890").is_ok());
        assert!(parse_address(" 0x1234567890123456789012345678901234567890 ").is_ok());
        for value in [
            "",
            "1234567890123456789012345678901234567890",
            "0x1234",
            "io14gnqxf9dpkn05g337rl7eyt2nxasphf5m6n0rx",
        ] {
            assert!(
                matches!(parse_address(value), Err(Error::InvalidArgument(_))),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_iotex_address() {
        assert!(parse_address("io14gnqxf9dpkn05g337rl7eyt2nxasphf5m6n0rd").is_ok());
        assert!(parse_address(" io1zgs5gqjl679qlj4gqqpa9t329r8f5gr8xc9lr0 ").is_ok());

        let address = Address::repeat_byte(0x5a);
        let encoded =
            bech32::encode::<bech32::Bech32>(Hrp::parse_unchecked("io"), address.as_slice()).unwrap();
        assert!(encoded.starts_with("io1"));
        assert_eq!(parse_address(&encoded).unwrap(), address);

        let short = bech32::encode::<bech32::Bech32>(Hrp::parse_unchecked("io"), &[0x5a; 19]).unwrap();
        assert!(matches!(parse_address(&short), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_incomplete_descriptor_rejected() {
        let descriptor = ContractDescriptor::parse(
            r#"[{"type":"function","name":"getHash","inputs":[{"name":"did","type":"string"}],"outputs":[{"name":"","type":"bytes32"}],"stateMutability":"view"}]"#,
        )
        .unwrap();
        let err = check_registry_interface(&descriptor).unwrap_err();
        assert!(err.to_string().contains("createDID"));
        assert!(!err.to_string().contains("getHash"));
    }
}
