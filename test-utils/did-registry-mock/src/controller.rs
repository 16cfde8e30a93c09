use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Wrapper for JSON-serialized data that can be encoded and decoded.
#[derive(Debug, Clone, derive_more::Display)]
#[display("JSON object: {dtype}")]
pub struct JsonObject {
    dtype: String,
    data: String,
}

impl JsonObject {
    /// Create a JSON object from any serializable value.
    pub fn from<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(JsonObject {
            dtype: std::any::type_name::<T>().to_string(),
            data: serde_json::to_string(value)?,
        })
    }

    /// Deserialize the JSON data to a specific type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}

/// Identifier for global overrides that apply to all RPC calls
const GLOBAL_OVERRIDE_KEY: &str = "global";

/// Result of waiting for an endpoint to be triggered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResult {
    /// The endpoint was triggered and a response was sent
    Triggered,
    /// The notification channel was dropped
    ChannelDropped,
}

/// Wrapper object that provides an await function to wait for endpoint trigger
pub struct EndpointCallback {
    receiver: UnboundedReceiver<()>,
}

impl EndpointCallback {
    /// Wait for the endpoint to be triggered with a timeout
    pub async fn wait_for_trigger(&mut self, timeout: Duration) -> anyhow::Result<CallbackResult> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(())) => Ok(CallbackResult::Triggered),
            Ok(None) => Ok(CallbackResult::ChannelDropped),
            Err(_elapsed) => Err(anyhow::anyhow!(
                "Timeout {} waiting for endpoint",
                humantime::format_duration(timeout)
            )),
        }
    }

    /// Returns an error if the callback wasn't triggered within the timeout
    pub async fn triggered(&mut self, timeout: Duration) -> anyhow::Result<()> {
        match self.wait_for_trigger(timeout).await? {
            CallbackResult::Triggered => Ok(()),
            CallbackResult::ChannelDropped => Err(anyhow::anyhow!("Callback channel was dropped")),
        }
    }
}

/// Generic wrapper for any response type that can include notification.
/// It sends a notification on drop.
#[derive(Debug, Clone)]
pub struct WithCallback<T: Display> {
    pub response: T,
    pub callback: Option<UnboundedSender<()>>,
    pub endpoint_name: String,
    pub call_count: usize,
}

impl<T: Display> WithCallback<T> {
    pub fn new(response: T, sender: UnboundedSender<()>, endpoint_name: String) -> Self {
        Self {
            response,
            callback: Some(sender),
            endpoint_name,
            call_count: 0,
        }
    }

    pub fn increment_call_count(&mut self) {
        self.call_count += 1;
    }

    /// Clean up the callback to prevent unwanted message sending
    pub fn cleanup_callback(&mut self) {
        self.callback = None;
    }
}

impl<T: Display> Drop for WithCallback<T> {
    fn drop(&mut self) {
        // Notify on drop, so that handlers returning early still trigger the callback.
        if let Some(sender) = self.callback.take() {
            log::debug!(
                "{}: sending callback ({}-th time) for triggered response: {}",
                self.endpoint_name,
                self.call_count,
                self.response
            );

            if let Err(e) = sender.send(()) {
                log::trace!("Callback for {} not delivered: {e}", self.endpoint_name);
            }
        }
    }
}

impl WithCallback<CallOverride> {
    /// Check if this override is already outdated.
    pub fn should_remove_override(&self) -> bool {
        match &self.response {
            CallOverride::Once(_) => self.call_count >= 1,
            CallOverride::Until { until, .. } => Instant::now() >= *until,
            CallOverride::NTimes { n, .. } => self.call_count >= *n,
            CallOverride::Always(_) => false,
        }
    }

    /// Check if this override should be used
    pub fn should_use_override(&self) -> bool {
        match &self.response {
            CallOverride::Once(_) => true,
            CallOverride::Until { until, .. } => Instant::now() < *until,
            CallOverride::NTimes { n, .. } => self.call_count < *n,
            CallOverride::Always(_) => true,
        }
    }

    pub fn response(&self) -> &CallResponse {
        match &self.response {
            CallOverride::Once(response)
            | CallOverride::Until { response, .. }
            | CallOverride::NTimes { response, .. }
            | CallOverride::Always(response) => response,
        }
    }
}

/// Response types that can be forced for RPC calls.
#[derive(Debug, derive_more::Display, Clone)]
pub enum CallResponse {
    /// Return a JSON-RPC error with this message.
    #[display("Error: {_0}")]
    Error(String),
    /// Execute normal handler logic. Allows waiting for the call in tests.
    Success,
    /// RPC call will fail every Nth request based on the frequency value.
    /// For example, frequency 3 means every 3rd request fails.
    #[display("FailEachNth: {error} every {frequency} requests")]
    FailEachNth { error: String, frequency: usize },
    /// Return a custom non-error response with JSON-serialized data.
    #[display("Custom JSON response")]
    Custom(JsonObject),
}

impl CallResponse {
    /// Create a custom response from any JSON-serializable type.
    pub fn custom<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(CallResponse::Custom(JsonObject::from(value)?))
    }
}

#[derive(Debug, derive_more::Display, Clone)]
pub enum CallOverride {
    #[display("Override: once -> {_0}")]
    Once(CallResponse),
    #[display(
        "Override: for {} -> {response}",
        humantime::format_duration(until.saturating_duration_since(Instant::now()))
    )]
    Until { response: CallResponse, until: Instant },
    #[display("Override: {n} times -> {response}")]
    NTimes { response: CallResponse, n: usize },
    #[display("Override: always -> {_0}")]
    Always(CallResponse),
}

/// What a handler should do after consulting the controller
#[derive(Debug, Clone)]
pub enum OverrideAction {
    /// Run the regular handler
    Proceed,
    /// Fail with the given message
    Fail(String),
    /// Return this value instead of running the handler
    Respond(JsonObject),
}

/// Inner state of the mock controller
#[derive(Debug, Default)]
struct MockControllerInner {
    /// All overrides organized by key, with "global" having priority over RPC-specific keys.
    overrides: HashMap<String, Vec<WithCallback<CallOverride>>>,
}

impl MockControllerInner {
    /// Get the first valid override for a given key (RPC name or "global")
    fn get_first_valid_override(&mut self, key: &str) -> Option<WithCallback<CallOverride>> {
        let wrapper = self.overrides.get_mut(key)?.first_mut()?;
        if wrapper.should_use_override() {
            wrapper.increment_call_count();
            // The returned copy notifies the test when the handler drops it.
            return Some(wrapper.clone());
        }
        None
    }

    /// Clean up all outdated entries from overrides
    fn cleanup_outdated_overrides(&mut self) {
        for queue in self.overrides.values_mut() {
            queue.retain_mut(|override_wrapper| {
                if override_wrapper.should_remove_override() {
                    override_wrapper.cleanup_callback();
                    false
                } else {
                    true
                }
            });
        }
    }
}

/// Controller for injecting responses into the mock RPC handlers
#[derive(Debug, Default, Clone)]
pub struct MockController {
    inner: Arc<Mutex<MockControllerInner>>,
}

impl MockController {
    pub fn new() -> Self {
        Default::default()
    }

    fn push(&self, key: &str, rpc_override: CallOverride) -> EndpointCallback {
        let (sender, receiver) = mpsc::unbounded_channel();
        let wrapper = WithCallback::new(rpc_override, sender, key.to_string());

        let mut lock = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        lock.overrides.entry(key.to_string()).or_default().push(wrapper);

        EndpointCallback { receiver }
    }

    /// Add a global override response that will be used for any RPC call
    /// Returns a notifier that can be used to wait for the endpoint to be triggered
    pub fn global_override(&self, rpc_override: CallOverride) -> EndpointCallback {
        log::debug!("Adding global override: {rpc_override}");
        self.push(GLOBAL_OVERRIDE_KEY, rpc_override)
    }

    /// Add a response override for a specific RPC call, e.g. `eth_getTransactionReceipt`
    /// Returns a notifier that can be used to wait for the endpoint to be triggered
    pub fn override_rpc(&self, rpc_name: &str, rpc_override: CallOverride) -> EndpointCallback {
        log::debug!("Adding RPC override for '{rpc_name}': {rpc_override}");
        self.push(rpc_name, rpc_override)
    }

    /// Get the next override response for a specific RPC call (prioritizes global overrides)
    pub fn take_next_override(&self, rpc_name: &str) -> Option<WithCallback<CallOverride>> {
        let mut controller = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        // Drop expired entries first, so only applicable overrides are left.
        controller.cleanup_outdated_overrides();

        if let Some(mut override_wrapper) = controller.get_first_valid_override(GLOBAL_OVERRIDE_KEY)
        {
            override_wrapper.endpoint_name = format!("{GLOBAL_OVERRIDE_KEY}: {rpc_name}");
            controller.cleanup_outdated_overrides();
            return Some(override_wrapper);
        }

        let override_wrapper = controller.get_first_valid_override(rpc_name);
        controller.cleanup_outdated_overrides();
        override_wrapper
    }

    /// Decide how the handler of `rpc_name` should respond
    pub fn action(&self, rpc_name: &str) -> OverrideAction {
        let Some(wrapper) = self.take_next_override(rpc_name) else {
            return OverrideAction::Proceed;
        };
        match wrapper.response() {
            CallResponse::Success => OverrideAction::Proceed,
            CallResponse::Error(error) => OverrideAction::Fail(error.clone()),
            CallResponse::FailEachNth { error, frequency } => {
                if should_fail(*frequency, wrapper.call_count) {
                    OverrideAction::Fail(error.clone())
                } else {
                    OverrideAction::Proceed
                }
            }
            CallResponse::Custom(value) => OverrideAction::Respond(value.clone()),
        }
    }

    /// Remove all overrides
    pub fn clear(&self) {
        let mut lock = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        for queue in lock.overrides.values_mut() {
            for wrapper in queue.iter_mut() {
                wrapper.cleanup_callback();
            }
        }
        lock.overrides.clear();
    }
}

/// Determines if a request should fail based on frequency
/// For frequency 3, every 3rd request fails
pub fn should_fail(frequency: usize, call_count: usize) -> bool {
    frequency > 0 && call_count > 0 && call_count % frequency == 0
}

/// Shorthand for an override that expires after `duration`
pub fn until(response: CallResponse, duration: Duration) -> CallOverride {
    CallOverride::Until {
        response,
        until: Instant::now() + duration,
    }
}
