use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use alloy::network::Ethereum;
use alloy::primitives::{Address, B256, Bytes};
use alloy::providers::{DynProvider, Provider, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::rpc::json_rpc::{RpcError, RpcRecv, RpcSend};
use alloy::rpc::types::{TransactionReceipt, TransactionRequest};
use alloy::transports::TransportErrorKind;
use alloy::transports::http::{Http, reqwest};
use url::Url;

use crate::config::ConnectorConfig;
use crate::error::{ConnectionError, Error, Result};

/// Address of a chain JSON-RPC endpoint.
///
/// Endpoints must use an encrypted transport. Plain `http` is only accepted
/// through [`Endpoint::insecure`], meant for local nodes and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Parses `host:port` (resolved to `https://host:port`) or a full `https` URL.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::InvalidArgument("endpoint must not be empty".to_string()));
        }
        let url = if value.contains("://") {
            Url::parse(value)
        } else {
            Url::parse(&format!("https://{value}"))
        }
        .map_err(|e| Error::InvalidArgument(format!("invalid endpoint '{value}': {e}")))?;

        if url.scheme() != "https" {
            return Err(Error::InvalidArgument(format!(
                "endpoint '{value}' does not use TLS, only https endpoints are accepted"
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::InvalidArgument(format!("endpoint '{value}' has no host")));
        }
        Ok(Self { url })
    }

    /// Accepts any URL, including plain `http`.
    pub fn insecure(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "https"
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Which state a transaction count is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceTag {
    /// Confirmed transactions only.
    Latest,
    /// Confirmed plus transactions waiting in the node's pool.
    Pending,
}

/// Connection to a chain endpoint.
///
/// Cloning is cheap and clones share the underlying HTTP connection pool.
/// Requests are not retried here; failures are classified and returned.
#[derive(Clone)]
pub struct Connector {
    provider: DynProvider,
    endpoint: Arc<Endpoint>,
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("endpoint", &self.endpoint.to_string())
            .finish()
    }
}

impl Connector {
    pub fn connect(endpoint: Endpoint, config: &ConnectorConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConnectionError::Transport(format!("failed to build HTTP client: {e}")))?;
        let transport = Http::with_client(http_client, endpoint.url().clone());
        let client = RpcClient::new(transport, false);
        let provider = RootProvider::<Ethereum>::new(client).erased();

        log::debug!("Connected to endpoint {endpoint}");
        Ok(Self {
            provider,
            endpoint: Arc::new(endpoint),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Sends a raw JSON-RPC request.
    pub async fn request<P: RpcSend, R: RpcRecv>(
        &self,
        method: impl Into<Cow<'static, str>>,
        params: P,
    ) -> Result<R> {
        let method = method.into();
        log::trace!("RPC call {method} with {params:?}");
        self.provider
            .client()
            .request(method.clone(), params)
            .await
            .inspect(|res| log::trace!("RPC response to {method}: {res:?}"))
            .map_err(|e| self.classify(e))
    }

    pub async fn chain_id(&self) -> Result<u64> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| self.classify(e))
    }

    pub async fn transaction_count(&self, address: Address, tag: NonceTag) -> Result<u64> {
        let count = self.provider.get_transaction_count(address);
        match tag {
            NonceTag::Latest => count.latest().await,
            NonceTag::Pending => count.pending().await,
        }
        .map_err(|e| self.classify(e))
    }

    pub async fn gas_price(&self) -> Result<u128> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| self.classify(e))
    }

    /// Broadcasts an EIP-2718 encoded signed transaction and returns the hash reported by the node.
    pub async fn send_raw_transaction(&self, encoded: &[u8]) -> Result<B256> {
        self.provider
            .send_raw_transaction(encoded)
            .await
            .map(|pending| *pending.tx_hash())
            .map_err(|e| self.classify(e))
    }

    pub async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TransactionReceipt>> {
        self.provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| self.classify(e))
    }

    /// Executes a read-only call against the latest state.
    pub async fn call(&self, request: TransactionRequest) -> Result<Bytes> {
        self.provider
            .call(request)
            .await
            .map_err(|e| self.classify(e))
    }

    fn classify(&self, error: RpcError<TransportErrorKind>) -> Error {
        match error {
            RpcError::ErrorResp(payload) => Error::Rpc {
                code: payload.code,
                message: payload.message.to_string(),
                data: payload
                    .data
                    .as_ref()
                    .map(|data| data.get().trim_matches('"').to_string()),
            },
            RpcError::Transport(kind) => {
                let error = classify_transport(&kind);
                log::debug!("Transport error talking to {}: {error}", self.endpoint);
                Error::Connection(error)
            }
            RpcError::NullResp => Error::Decoding("endpoint returned a null response".to_string()),
            RpcError::SerError(e) => Error::Encoding(format!("failed to serialize request: {e}")),
            RpcError::DeserError { err, text } => {
                log::debug!("Deserialization error: {err}, response text: {text}");
                Error::Decoding(format!("unexpected response: {err}"))
            }
            other => Error::Connection(ConnectionError::Transport(other.to_string())),
        }
    }
}

/// Full message of an error including all of its sources.
fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

pub(crate) fn classify_transport(kind: &TransportErrorKind) -> ConnectionError {
    let message = match kind {
        TransportErrorKind::HttpError(http) => {
            return ConnectionError::Transport(format!(
                "HTTP status {}: {}",
                http.status, http.body
            ));
        }
        TransportErrorKind::Custom(inner) => {
            if let Some(e) = inner.downcast_ref::<reqwest::Error>() {
                let message = error_chain(e);
                if e.is_timeout() {
                    return ConnectionError::Timeout(message);
                }
                message
            } else {
                error_chain(&**inner)
            }
        }
        other => other.to_string(),
    };
    classify_message(message)
}

fn classify_message(message: String) -> ConnectionError {
    let lower = message.to_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        ConnectionError::Timeout(message)
    } else if lower.contains("certificate")
        || lower.contains("tls")
        || lower.contains("ssl")
        || lower.contains("handshake")
    {
        ConnectionError::Tls(message)
    } else if lower.contains("error sending request")
        || lower.contains("connection refused")
        || lower.contains("dns")
        || lower.contains("failed to lookup")
        || lower.contains("no route to host")
        || lower.contains("no backend is currently healthy")
    {
        ConnectionError::Unreachable(message)
    } else {
        ConnectionError::Transport(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_port_resolves_to_https() {
        let endpoint = Endpoint::parse("api.testnet.iotex.one:443").unwrap();
        assert_eq!(endpoint.url().scheme(), "https");
        assert_eq!(endpoint.url().host_str(), Some("api.testnet.iotex.one"));
        assert!(endpoint.is_secure());

        let endpoint = Endpoint::parse("node.example.org:8443").unwrap();
        assert_eq!(endpoint.url().port(), Some(8443));
    }

    #[test]
    fn test_plaintext_rejected() {
        for value in ["http://localhost:8545", "ws://localhost:8546", "", "https://"] {
            assert!(
                matches!(Endpoint::parse(value), Err(Error::InvalidArgument(_))),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn test_insecure_endpoint() {
        let endpoint = Endpoint::insecure(Url::parse("http://127.0.0.1:8545").unwrap());
        assert!(!endpoint.is_secure());
    }

    #[test]
    fn test_classify_messages() {
        assert!(matches!(
            classify_message("error sending request for url (http://127.0.0.1:1/)".into()),
            ConnectionError::Unreachable(_)
        ));
        assert!(matches!(
            classify_message("operation timed out".into()),
            ConnectionError::Timeout(_)
        ));
        assert!(matches!(
            classify_message("invalid peer certificate: UnknownIssuer".into()),
            ConnectionError::Tls(_)
        ));
        assert!(matches!(
            classify_message("backend connection task has stopped".into()),
            ConnectionError::Transport(_)
        ));
    }
}
