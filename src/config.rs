use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::did::DEFAULT_DID_METHOD;

/// Timeouts applied to every request sent to the chain endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Time allowed to establish a connection.
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Time allowed for a single request, including the response body.
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Backoff schedule and bounds used while waiting for a transaction receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Delay before the second receipt lookup.
    #[serde(with = "duration_ms")]
    pub initial_interval: Duration,
    /// Upper bound for a single delay.
    #[serde(with = "duration_ms")]
    pub max_interval: Duration,
    /// Factor applied to the delay after each attempt.
    pub multiplier: f64,
    /// Maximum number of receipt lookups.
    pub max_attempts: u32,
    /// Total time allowed before the outcome is reported as unknown.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            multiplier: 2.0,
            max_attempts: 60,
            timeout: Duration::from_secs(60),
        }
    }
}

impl PollerConfig {
    /// Delay to wait after the given (zero based) attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(64) as i32);
        let delay = self.initial_interval.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_interval.as_secs_f64()))
    }
}

/// Configuration of the DID registry client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub connector: ConnectorConfig,
    pub poller: PollerConfig,
    /// DID method used when an identifier has to be expanded, e.g. `io` in `did:io:0x..`.
    pub did_method: String,
    /// Read the registry before sending a state-changing transaction, so that
    /// duplicates and missing DIDs are reported without spending gas.
    pub preflight_checks: bool,
    /// Dry-run every state-changing call with `eth_call` before signing it.
    pub simulate_calls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connector: ConnectorConfig::default(),
            poller: PollerConfig::default(),
            did_method: DEFAULT_DID_METHOD.to_string(),
            preflight_checks: true,
            simulate_calls: true,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
