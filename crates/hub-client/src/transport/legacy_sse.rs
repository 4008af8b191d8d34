//! Legacy SSE transport
//!
//! The backend is reached in two halves. A long-lived `GET` on the
//! configured URL opens an event stream; its first `endpoint` event names
//! the URL every JSON-RPC message is then POSTed to. Responses come back
//! as `message` events on the stream, matched to requests by id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use hub_core::{IncomingMessage, JsonRpcRequest, JsonRpcResponse};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

use super::sse::{SseEvent, SseParser};
use super::{reply_to_server_request, Transport, TransportError, DEFAULT_REQUEST_TIMEOUT};

type PendingMap = Arc<parking_lot::Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>;

/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

struct Running {
    endpoint: Url,
    reader: JoinHandle<()>,
}

/// Transport for backends serving the SSE protocol
pub struct SseTransport {
    client: Client,
    url: Url,
    request_timeout: Duration,
    running: Mutex<Option<Running>>,
    pending: PendingMap,
    next_id: AtomicU64,
}

impl SseTransport {
    /// Create a transport for the event stream at `url`
    pub fn new(url: &str) -> Result<Self, TransportError> {
        Self::with_timeout(url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// `request_timeout` also bounds the wait for the `endpoint` event
    pub fn with_timeout(url: &str, request_timeout: Duration) -> Result<Self, TransportError> {
        let url = Url::parse(url)
            .map_err(|e| TransportError::InvalidConfig(format!("invalid URL {}: {}", url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransportError::InvalidConfig(format!(
                "unsupported URL scheme: {}",
                url.scheme()
            )));
        }

        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            url,
            request_timeout,
            running: Mutex::new(None),
            pending: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Where messages are POSTed, once the stream announced it
    pub async fn endpoint(&self) -> Option<Url> {
        self.running.lock().await.as_ref().map(|r| r.endpoint.clone())
    }

    async fn require_endpoint(&self) -> Result<Url, TransportError> {
        self.endpoint().await.ok_or(TransportError::NotStarted)
    }
}

/// Resolve the `endpoint` event against the stream URL; it must stay on the
/// same origin
fn resolve_endpoint(base: &Url, data: &str) -> Result<Url, TransportError> {
    let endpoint = base
        .join(data.trim())
        .map_err(|e| TransportError::Protocol(format!("invalid endpoint {}: {}", data, e)))?;
    if endpoint.origin() != base.origin() {
        return Err(TransportError::Protocol(format!(
            "endpoint origin does not match stream: {}",
            endpoint
        )));
    }
    Ok(endpoint)
}

async fn post_message<T: Serialize>(
    client: &Client,
    endpoint: &Url,
    message: &T,
) -> Result<(), TransportError> {
    let response = client
        .post(endpoint.clone())
        .header(CONTENT_TYPE, "application/json")
        .json(message)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::HttpStatus {
            status: status.as_u16(),
            body,
        });
    }
    Ok(())
}

struct StreamReader {
    client: Client,
    base: Url,
    pending: PendingMap,
    label: String,
    endpoint: Option<Url>,
    announce: Option<oneshot::Sender<Result<Url, TransportError>>>,
}

impl StreamReader {
    async fn run(mut self, response: Response) {
        let mut parser = SseParser::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    for event in parser.feed(&chunk) {
                        self.handle(event).await;
                    }
                }
                Err(e) => {
                    warn!(backend = %self.label, error = %e, "Error reading backend event stream");
                    break;
                }
            }
        }
        if let Some(event) = parser.finish() {
            self.handle(event).await;
        }
        debug!(backend = %self.label, "Backend event stream closed");

        if let Some(announce) = self.announce.take() {
            let _ = announce.send(Err(TransportError::ConnectionClosed));
        }
        // Dropping the senders wakes every waiter with ConnectionClosed
        self.pending.lock().clear();
    }

    async fn handle(&mut self, event: SseEvent) {
        match event.event.as_deref() {
            Some("endpoint") => {
                let resolved = resolve_endpoint(&self.base, &event.data);
                if let Ok(endpoint) = &resolved {
                    debug!(backend = %self.label, endpoint = %endpoint, "Backend announced endpoint");
                    self.endpoint = Some(endpoint.clone());
                }
                match self.announce.take() {
                    Some(announce) => {
                        let _ = announce.send(resolved);
                    }
                    None => warn!(backend = %self.label, "Ignoring repeated endpoint event"),
                }
            }
            None | Some("message") => self.handle_message(&event.data).await,
            Some(other) => trace!(backend = %self.label, event = %other, "Ignoring SSE event"),
        }
    }

    async fn handle_message(&self, data: &str) {
        trace!(backend = %self.label, raw = %data, "backend -> hub");
        let value: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                warn!(backend = %self.label, error = %e, "Ignoring non-JSON event from backend");
                return;
            }
        };

        match IncomingMessage::classify(value) {
            Some(IncomingMessage::Response(resp)) => {
                let key = resp.id.as_ref().map(ToString::to_string).unwrap_or_default();
                match self.pending.lock().remove(&key) {
                    Some(tx) => {
                        let _ = tx.send(resp);
                    }
                    None => warn!(backend = %self.label, id = %key, "Response for unknown request id"),
                }
            }
            Some(IncomingMessage::Request(req)) => {
                let Some(endpoint) = &self.endpoint else {
                    warn!(backend = %self.label, method = %req.method, "Backend request before endpoint");
                    return;
                };
                let reply = reply_to_server_request(&req);
                if let Err(e) = post_message(&self.client, endpoint, &reply).await {
                    warn!(backend = %self.label, error = %e, "Failed to answer backend request");
                }
            }
            Some(IncomingMessage::Notification(note)) => {
                debug!(backend = %self.label, method = %note.method, "Backend notification");
            }
            None => warn!(backend = %self.label, "Ignoring unrecognised message from backend"),
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::StartFailed(format!("{}: {}", self.url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::StartFailed(format!(
                "{} answered the event stream with HTTP {}",
                self.url, status
            )));
        }

        let (announce, announced) = oneshot::channel();
        let reader = StreamReader {
            client: self.client.clone(),
            base: self.url.clone(),
            pending: Arc::clone(&self.pending),
            label: self.describe(),
            endpoint: None,
            announce: Some(announce),
        };
        let reader = tokio::spawn(reader.run(response));

        let endpoint = match tokio::time::timeout(self.request_timeout, announced).await {
            Ok(Ok(Ok(endpoint))) => endpoint,
            Ok(Ok(Err(e))) => {
                reader.abort();
                return Err(TransportError::StartFailed(format!(
                    "no usable endpoint from {}: {}",
                    self.url, e
                )));
            }
            Ok(Err(_)) => {
                reader.abort();
                return Err(TransportError::StartFailed(format!(
                    "event stream from {} ended before the endpoint event",
                    self.url
                )));
            }
            Err(_) => {
                reader.abort();
                return Err(TransportError::StartFailed(format!(
                    "no endpoint event from {} within {:?}",
                    self.url, self.request_timeout
                )));
            }
        };

        debug!(url = %self.url, endpoint = %endpoint, "Opened backend event stream");
        *running = Some(Running { endpoint, reader });
        Ok(())
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        let endpoint = self.require_endpoint().await?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);
        let key = id.to_string();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(key.clone(), tx);

        trace!(method = %method, id = %id, endpoint = %endpoint, "hub -> backend");
        if let Err(e) = post_message(&self.client, &endpoint, &request).await {
            self.pending.lock().remove(&key);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().remove(&key);
                Err(TransportError::Timeout(self.request_timeout))
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        let endpoint = self.require_endpoint().await?;
        trace!(method = %method, "hub -> backend (notification)");
        post_message(
            &self.client,
            &endpoint,
            &JsonRpcRequest::notification(method, params),
        )
        .await
    }

    async fn close(&self) -> Result<(), TransportError> {
        if let Some(running) = self.running.lock().await.take() {
            running.reader.abort();
            debug!(url = %self.url, "Closed backend event stream");
        }
        self.pending.lock().clear();
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sse:{}", self.url)
    }
}
