//! Streamable HTTP transport
//!
//! Every JSON-RPC message is POSTed to one endpoint. The backend answers
//! either with a plain `application/json` body or with a
//! `text/event-stream` body carrying the response as an SSE event. A
//! session id handed out in the `Mcp-Session-Id` header is echoed on every
//! later request.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use hub_core::{IncomingMessage, JsonRpcRequest, JsonRpcResponse, RequestId};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, trace, warn};
use url::Url;

use super::sse::SseParser;
use super::{Transport, TransportError, DEFAULT_REQUEST_TIMEOUT};

/// Header carrying the server-assigned session id
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport for backends reachable over HTTP
pub struct StreamableHttpTransport {
    client: Client,
    url: Url,
    request_timeout: Duration,
    session_id: RwLock<Option<String>>,
    started: AtomicBool,
    next_id: AtomicU64,
}

impl StreamableHttpTransport {
    /// Create a transport for `url`. Only `http` and `https` are accepted.
    pub fn new(url: &str) -> Result<Self, TransportError> {
        Self::with_timeout(url, DEFAULT_REQUEST_TIMEOUT)
    }

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
            session_id: RwLock::new(None),
            started: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Session id assigned by the backend, if any
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(id) = self.session_id.read().as_deref() {
            if let Ok(value) = HeaderValue::from_str(id) {
                headers.insert(SESSION_HEADER, value);
            }
        }
        headers
    }

    fn ensure_started(&self) -> Result<(), TransportError> {
        if self.started.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::NotStarted)
        }
    }

    async fn post(&self, message: &JsonRpcRequest) -> Result<Response, TransportError> {
        let response = self
            .client
            .post(self.url.clone())
            .headers(self.headers())
            .json(message)
            .send()
            .await?;

        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.write();
            if current.as_deref() != Some(id) {
                debug!(url = %self.url, session_id = %id, "Backend assigned session");
                *current = Some(id.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Read SSE events until the response with `id` arrives
    async fn read_event_stream(
        &self,
        response: Response,
        id: &RequestId,
    ) -> Result<JsonRpcResponse, TransportError> {
        let mut parser = SseParser::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for event in parser.feed(&chunk) {
                if let Some(found) = match_response(&event.data, id) {
                    return Ok(found);
                }
            }
        }
        if let Some(event) = parser.finish() {
            if let Some(found) = match_response(&event.data, id) {
                return Ok(found);
            }
        }

        Err(TransportError::Protocol(format!(
            "event stream ended without a response to request {}",
            id
        )))
    }

    async fn exchange(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let id = request
            .id
            .clone()
            .ok_or_else(|| TransportError::Protocol("request without id".into()))?;

        let response = self.post(&request).await?;
        if response.status() == StatusCode::ACCEPTED {
            return Err(TransportError::Protocol(
                "backend accepted a request without answering it".into(),
            ));
        }

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        if is_stream {
            return self.read_event_stream(response, &id).await;
        }

        let body = response.bytes().await?;
        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| TransportError::Protocol(format!("invalid JSON body: {}", e)))?;
        match_value(value, &id).ok_or_else(|| {
            TransportError::Protocol(format!("body did not contain a response to request {}", id))
        })
    }
}

fn match_response(data: &str, id: &RequestId) -> Option<JsonRpcResponse> {
    match serde_json::from_str::<Value>(data) {
        Ok(value) => match_value(value, id),
        Err(e) => {
            warn!(error = %e, "Ignoring non-JSON SSE event");
            None
        }
    }
}

/// Pick the response for `id` out of a single message or a batch
fn match_value(value: Value, id: &RequestId) -> Option<JsonRpcResponse> {
    let candidates = match value {
        Value::Array(items) => items,
        single => vec![single],
    };
    candidates.into_iter().find_map(|item| match IncomingMessage::classify(item) {
        Some(IncomingMessage::Response(resp)) if resp.id.as_ref() == Some(id) => Some(resp),
        Some(other) => {
            trace!(message = ?other, "Skipping unrelated message in HTTP reply");
            None
        }
        None => None,
    })
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn start(&self) -> Result<(), TransportError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        self.ensure_started()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);
        trace!(method = %method, id = %id, url = %self.url, "hub -> backend");

        match tokio::time::timeout(self.request_timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.request_timeout)),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        self.ensure_started()?;
        let note = JsonRpcRequest::notification(method, params);
        self.post(&note).await.map(|_| ())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let session = self.session_id.write().take();
        if let Some(id) = session {
            let result = self
                .client
                .delete(self.url.clone())
                .header(SESSION_HEADER, id)
                .send()
                .await;
            if let Err(e) = result {
                debug!(url = %self.url, error = %e, "Session termination request failed");
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("http:{}", self.url)
    }
}
