//! Stdio transport: spawn a child process and exchange newline-delimited
//! JSON-RPC over its stdin/stdout.

use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hub_core::{IncomingMessage, JsonRpcRequest, JsonRpcResponse};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{reply_to_server_request, Transport, TransportError, DEFAULT_REQUEST_TIMEOUT};

type PendingMap = Arc<parking_lot::Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>;

/// What to spawn
#[derive(Debug, Clone)]
pub struct StdioConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Complete environment for the child; the parent's is not inherited
    pub env: BTreeMap<String, String>,
    pub request_timeout: Duration,
}

impl StdioConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

struct Running {
    child: Child,
    stdin: Arc<Mutex<ChildStdin>>,
    reader: JoinHandle<()>,
}

/// Stdio-based transport for a backend process
pub struct StdioTransport {
    config: StdioConfig,
    running: Mutex<Option<Running>>,
    pending: PendingMap,
    next_id: AtomicU64,
}

impl StdioTransport {
    pub fn new(config: StdioConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
            pending: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &StdioConfig {
        &self.config
    }

    /// Whether the child process is still running
    pub async fn is_alive(&self) -> bool {
        let mut running = self.running.lock().await;
        match running.as_mut() {
            Some(r) => matches!(r.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn stdin(&self) -> Result<Arc<Mutex<ChildStdin>>, TransportError> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| Arc::clone(&r.stdin))
            .ok_or(TransportError::NotStarted)
    }
}

async fn write_line<T: Serialize>(
    stdin: &Mutex<ChildStdin>,
    message: &T,
) -> Result<(), TransportError> {
    let mut payload =
        serde_json::to_string(message).map_err(|e| TransportError::Protocol(e.to_string()))?;
    payload.push('\n');

    let mut stdin = stdin.lock().await;
    stdin
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))?;
    stdin
        .flush()
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))
}

async fn read_loop(
    stdout: ChildStdout,
    stdin: Arc<Mutex<ChildStdin>>,
    pending: PendingMap,
    label: String,
) {
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!(backend = %label, "Backend stdout closed");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                trace!(backend = %label, raw = %trimmed, "backend -> hub");

                let value: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(backend = %label, error = %e, "Ignoring non-JSON line from backend");
                        continue;
                    }
                };

                match IncomingMessage::classify(value) {
                    Some(IncomingMessage::Response(resp)) => {
                        let key = resp.id.as_ref().map(ToString::to_string).unwrap_or_default();
                        match pending.lock().remove(&key) {
                            Some(tx) => {
                                let _ = tx.send(resp);
                            }
                            None => warn!(backend = %label, id = %key, "Response for unknown request id"),
                        }
                    }
                    Some(IncomingMessage::Request(req)) => {
                        let reply = reply_to_server_request(&req);
                        if let Err(e) = write_line(&stdin, &reply).await {
                            warn!(backend = %label, error = %e, "Failed to answer backend request");
                        }
                    }
                    Some(IncomingMessage::Notification(note)) => {
                        debug!(backend = %label, method = %note.method, "Backend notification");
                    }
                    None => warn!(backend = %label, "Ignoring unrecognised message from backend"),
                }
            }
            Err(e) => {
                warn!(backend = %label, error = %e, "Error reading backend stdout");
                break;
            }
        }
    }

    // Dropping the senders wakes every waiter with ConnectionClosed
    pending.lock().clear();
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        if self.config.command.trim().is_empty() {
            return Err(TransportError::InvalidConfig("empty command".into()));
        }

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .env_clear()
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            TransportError::StartFailed(format!("failed to spawn {}: {}", self.config.command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::StartFailed("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::StartFailed("failed to capture stdout".into()))?;

        let stdin = Arc::new(Mutex::new(stdin));
        let reader = tokio::spawn(read_loop(
            stdout,
            Arc::clone(&stdin),
            Arc::clone(&self.pending),
            self.describe(),
        ));

        debug!(command = %self.config.command, args = ?self.config.args, "Spawned backend process");
        *running = Some(Running {
            child,
            stdin,
            reader,
        });
        Ok(())
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        let stdin = self.stdin().await?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);
        let key = id.to_string();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(key.clone(), tx);

        trace!(method = %method, id = %id, "hub -> backend");
        if let Err(e) = write_line(&stdin, &request).await {
            self.pending.lock().remove(&key);
            return Err(e);
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().remove(&key);
                Err(TransportError::Timeout(self.config.request_timeout))
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        let stdin = self.stdin().await?;
        trace!(method = %method, "hub -> backend (notification)");
        write_line(&stdin, &JsonRpcRequest::notification(method, params)).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        let running = self.running.lock().await.take();
        if let Some(mut running) = running {
            running.reader.abort();
            if let Err(e) = running.child.kill().await {
                debug!(command = %self.config.command, error = %e, "Backend process already gone");
            }
        }
        self.pending.lock().clear();
        Ok(())
    }

    fn describe(&self) -> String {
        format!("stdio:{}", self.config.command)
    }
}
