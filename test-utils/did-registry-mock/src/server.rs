use alloy::primitives::{Address, U256};
use jsonrpsee::server::{RpcModule, ServerBuilder, ServerHandle};
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

use crate::DidRegistryMock;
use crate::api::EthRpcServer;
use crate::contract::StorageMode;
use crate::controller::MockController;
use crate::execution::ExecutionConfig;

/// Block interval used by [`DidRegistryMockServer::create_test_mock_server`]
pub const TEST_BLOCK_FREQUENCY: Duration = Duration::from_millis(200);

/// DID registry mock server
#[derive(Clone)]
pub struct DidRegistryMockServer {
    pub state: DidRegistryMock,
    url: Url,
    server: ServerHandle,
}

impl DidRegistryMockServer {
    /// Serve `state` on `addr`. Port `0` picks a free port.
    pub async fn start(state: DidRegistryMock, addr: SocketAddr) -> anyhow::Result<Self> {
        let mut module = RpcModule::new(());
        module.merge(EthRpcServer::into_rpc(state.clone()))?;

        let server = ServerBuilder::default().build(addr).await?;
        let actual_addr = server.local_addr()?;
        let url = Url::parse(&format!("http://{actual_addr}"))?;
        log::info!("DID registry mock server listening on {actual_addr}");

        // Start the execution engine to produce blocks
        state.blockchain.create_genesis_block().await;
        state.execution.start();

        let server = server.start(module);
        Ok(Self { state, url, server })
    }

    /// Create a test mock server on a free local port, mining every 200ms
    pub async fn create_test_mock_server() -> anyhow::Result<Self> {
        let state = DidRegistryMock::new(ExecutionConfig {
            block_frequency: TEST_BLOCK_FREQUENCY,
            ..Default::default()
        });
        Self::start(state, SocketAddr::from(([127, 0, 0, 1], 0))).await
    }

    /// Get the server URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn controller(&self) -> &MockController {
        &self.state.controller
    }

    /// Set the balance of `address`
    pub async fn fund(&self, address: Address, amount: U256) {
        self.state.blockchain.set_balance(address, amount).await;
    }

    /// Keep submitted transactions out of blocks for `duration`
    pub async fn hold_transactions_for(&self, duration: Duration) {
        self.state
            .transaction_pool
            .hold_transactions_for(duration)
            .await;
    }

    /// Switch the storage behavior of the hosted registry contract
    pub async fn set_registry_mode(&self, mode: StorageMode) {
        self.state.blockchain.set_registry_mode(mode).await;
    }

    /// Stop serving requests and producing blocks
    pub async fn stop(self) -> anyhow::Result<()> {
        self.state.execution.stop();
        self.server.stop()?;
        self.server.stopped().await;
        Ok(())
    }
}
