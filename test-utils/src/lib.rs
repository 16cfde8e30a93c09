use alloy::primitives::U256;
use anyhow::Result;
use did_registry_mock::{DidRegistryMockServer, REGISTRY_ADDRESS};
use did_registry_sdk::{
    ClientConfig, DidRegistryClient, Endpoint, GasSettings, PollerConfig, PrivateKey, Registry,
};
use std::time::Duration;

/// ABI of the DID registry contract
pub const REGISTRY_ABI: &str = include_str!("../abi/did_registry.json");

/// Private key of the funded test account
pub const TEST_PRIVATE_KEY: &str =
    "414efa99dfac6f4095d6954713fb0085268d400d6a05a8ae8a69b5b1c10b4bed";

/// A second key, used for ownership checks
pub const OTHER_PRIVATE_KEY: &str =
    "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub const TEST_DID: &str = "did:io:0xABC";
pub const TEST_HASH: &str = "0x414efa99dfac6f4095d6954713fb0085268d400d6a05a8ae8a69b5b1c10b4bed";
pub const UPDATED_HASH: &str = "414efa99dfac6f4095d6954713fb0085268d400d6a05a8ae8a69b5b1c10eeeee";
pub const TEST_URI: &str = "urixxx";
pub const UPDATED_URI: &str = "urixxxupdated";

/// Gas price used by tests, in the smallest unit
pub const TEST_GAS_PRICE: &str = "1000000000000";
pub const TEST_GAS_LIMIT: u64 = 1_000_000;

/// Balance given to test accounts: enough for a thousand transactions at the test gas settings
pub const TEST_BALANCE: u128 = 1_000_000_000_000_000_000_000;

pub fn init_logger(should_be_debug: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if should_be_debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.is_test(true);
    let _ = builder.try_init();
}

/// Poller settings matching the mock's block interval
pub fn fast_poller() -> PollerConfig {
    PollerConfig {
        initial_interval: Duration::from_millis(50),
        max_interval: Duration::from_millis(400),
        multiplier: 2.0,
        max_attempts: 100,
        timeout: Duration::from_secs(10),
    }
}

pub fn test_gas() -> GasSettings {
    GasSettings::parse(TEST_GAS_PRICE, TEST_GAS_LIMIT).expect("valid test gas settings")
}

pub fn test_key() -> PrivateKey {
    PrivateKey::parse(TEST_PRIVATE_KEY).expect("valid test key")
}

pub fn other_key() -> PrivateKey {
    PrivateKey::parse(OTHER_PRIVATE_KEY).expect("valid test key")
}

/// Builds a client for the mock server, with fast polling
pub fn client_for(server: &DidRegistryMockServer, config: Option<ClientConfig>) -> Result<DidRegistryClient> {
    let config = config.unwrap_or_else(|| ClientConfig {
        poller: fast_poller(),
        ..Default::default()
    });
    let client = DidRegistryClient::builder()
        .endpoint(Endpoint::insecure(server.url().clone()))
        .config(config)
        .build()?;
    Ok(client)
}

/// Starts a mock chain, funds the test accounts and binds the registry on it
pub async fn create_test_registry() -> Result<(DidRegistryMockServer, Registry)> {
    let server = DidRegistryMockServer::create_test_mock_server().await?;
    for key in [test_key(), other_key()] {
        server.fund(key.address(), U256::from(TEST_BALANCE)).await;
    }
    let registry = client_for(&server, None)?.registry(REGISTRY_ADDRESS, REGISTRY_ABI)?;
    Ok((server, registry))
}
