//! Mock transport for testing
//!
//! Answers requests from a per-method script and records everything it was
//! sent, so tests can assert on what reached a backend (and what did not).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hub_core::{methods, JsonRpcResponse, RequestId, RpcError, PROTOCOL_VERSION};
use parking_lot::RwLock;
use serde_json::{json, Value};

use super::{Transport, TransportError};

/// Scripted answer for one method
#[derive(Debug, Clone)]
pub enum MockReply {
    Result(Value),
    Error(RpcError),
    /// Transport-level failure (the backend is unreachable)
    Fail(String),
}

/// A message the mock received
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub method: String,
    pub params: Option<Value>,
    pub notification: bool,
}

#[derive(Default)]
struct Counters {
    starts: AtomicUsize,
    closes: AtomicUsize,
    failing_starts: AtomicUsize,
}

/// Mock transport; cheap to clone, clones share state
#[derive(Clone)]
pub struct MockTransport {
    name: String,
    replies: Arc<RwLock<HashMap<String, MockReply>>>,
    recorded: Arc<RwLock<Vec<Recorded>>>,
    counters: Arc<Counters>,
    started: Arc<RwLock<bool>>,
    delay: Arc<RwLock<Option<Duration>>>,
    next_id: Arc<AtomicUsize>,
}

impl MockTransport {
    /// A backend called `name` that declares tools, prompts and resources
    pub fn new(name: &str) -> Self {
        let transport = Self {
            name: name.to_string(),
            replies: Arc::new(RwLock::new(HashMap::new())),
            recorded: Arc::new(RwLock::new(Vec::new())),
            counters: Arc::new(Counters::default()),
            started: Arc::new(RwLock::new(false)),
            delay: Arc::new(RwLock::new(None)),
            next_id: Arc::new(AtomicUsize::new(1)),
        };
        transport.with_capabilities(json!({"tools": {}, "prompts": {}, "resources": {}}))
    }

    /// Replace the capabilities announced in the `initialize` reply
    pub fn with_capabilities(self, capabilities: Value) -> Self {
        let init = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": capabilities,
            "serverInfo": {"name": self.name, "version": "0.0.1"}
        });
        self.on(methods::INITIALIZE, init)
    }

    /// Answer `method` with `result`
    pub fn on(self, method: &str, result: Value) -> Self {
        self.set_reply(method, MockReply::Result(result));
        self
    }

    /// Answer `method` with a protocol-level error
    pub fn on_error(self, method: &str, error: RpcError) -> Self {
        self.set_reply(method, MockReply::Error(error));
        self
    }

    /// Fail `method` at the transport level
    pub fn on_failure(self, method: &str, message: &str) -> Self {
        self.set_reply(method, MockReply::Fail(message.to_string()));
        self
    }

    /// Make the first `n` calls to `start` fail
    pub fn fail_starts(self, n: usize) -> Self {
        self.counters.failing_starts.store(n, Ordering::SeqCst);
        self
    }

    /// Delay every request by `delay`
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.write() = Some(delay);
        self
    }

    pub fn set_reply(&self, method: &str, reply: MockReply) {
        self.replies.write().insert(method.to_string(), reply);
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.recorded.read().clone()
    }

    /// Recorded requests and notifications for one method
    pub fn calls_to(&self, method: &str) -> Vec<Recorded> {
        self.recorded
            .read()
            .iter()
            .filter(|r| r.method == method)
            .cloned()
            .collect()
    }

    pub fn starts(&self) -> usize {
        self.counters.starts.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        *self.started.read()
    }

    fn record(&self, method: &str, params: &Option<Value>, notification: bool) {
        self.recorded.write().push(Recorded {
            method: method.to_string(),
            params: params.clone(),
            notification,
        });
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn start(&self) -> Result<(), TransportError> {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.counters.failing_starts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.counters
                .failing_starts
                .store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::StartFailed(format!(
                "{} refused to start",
                self.name
            )));
        }
        *self.started.write() = true;
        Ok(())
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        if !self.is_started() {
            return Err(TransportError::NotStarted);
        }
        self.record(method, &params, false);

        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let id = Some(RequestId::Number(
            self.next_id.fetch_add(1, Ordering::SeqCst) as i64,
        ));
        let reply = self.replies.read().get(method).cloned();
        match reply {
            Some(MockReply::Result(result)) => Ok(JsonRpcResponse::success(id, result)),
            Some(MockReply::Error(error)) => Ok(JsonRpcResponse::failure(id, error)),
            Some(MockReply::Fail(message)) => Err(TransportError::SendFailed(message)),
            None => Ok(JsonRpcResponse::failure(
                id,
                RpcError::new(
                    hub_core::error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {}", method),
                ),
            )),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        if !self.is_started() {
            return Err(TransportError::NotStarted);
        }
        self.record(method, &params, true);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        *self.started.write() = false;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("mock:{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_replies() {
        let mock = MockTransport::new("A")
            .on("tools/list", json!({"tools": []}))
            .on_error("prompts/get", RpcError::new(-32000, "no such prompt"));
        mock.start().await.unwrap();

        let ok = mock.request("tools/list", None).await.unwrap();
        assert_eq!(ok.into_result().unwrap(), json!({"tools": []}));

        let err = mock.request("prompts/get", None).await.unwrap();
        assert_eq!(err.into_result().unwrap_err().code, -32000);

        assert_eq!(mock.calls_to("tools/list").len(), 1);
    }

    #[tokio::test]
    async fn failing_starts_are_counted() {
        let mock = MockTransport::new("A").fail_starts(2);
        assert!(mock.start().await.is_err());
        assert!(mock.start().await.is_err());
        assert!(mock.start().await.is_ok());
        assert_eq!(mock.starts(), 3);
    }
}
