//! Connection establisher: handshake with bounded, fixed-delay retry

use std::time::Duration;

use hub_client::{ClientError, McpClient};
use hub_core::{BackendDescriptor, GatewayError, GatewayResult};
use tracing::{debug, info, warn};

use super::Session;

/// How many handshakes to try and how long to wait between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(2500),
        }
    }
}

impl RetryPolicy {
    /// At least one attempt is always made
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Per-connection state while establishing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Connecting { attempt: u32 },
    Connected,
    Failed,
}

impl ConnectState {
    pub fn initial() -> Self {
        ConnectState::Connecting { attempt: 1 }
    }

    /// Transition after a successful handshake
    pub fn on_success(self) -> Self {
        match self {
            ConnectState::Connecting { .. } => ConnectState::Connected,
            other => other,
        }
    }

    /// Transition after a failed handshake
    pub fn on_failure(self, policy: &RetryPolicy) -> Self {
        match self {
            ConnectState::Connecting { attempt } if attempt < policy.max_attempts => {
                ConnectState::Connecting {
                    attempt: attempt + 1,
                }
            }
            ConnectState::Connecting { .. } => ConnectState::Failed,
            other => other,
        }
    }
}

/// Drives a client through [`ConnectState`] until it is connected or failed
#[derive(Debug, Clone, Default)]
pub struct Establisher {
    policy: RetryPolicy,
}

impl Establisher {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Connect `client`, retrying per policy.
    ///
    /// Each failed attempt closes the half-open client before the delay.
    /// When the budget is spent the last cause is wrapped in
    /// [`GatewayError::ConnectFailed`].
    pub async fn establish(
        &self,
        descriptor: &BackendDescriptor,
        client: McpClient,
    ) -> GatewayResult<Session> {
        let max = self.policy.max_attempts;
        let mut state = ConnectState::initial();
        let mut last_error: Option<ClientError> = None;

        loop {
            match state {
                ConnectState::Connecting { attempt } => {
                    debug!(backend_id = %descriptor.id, attempt, max, "Connecting to backend");
                    match client.connect().await {
                        Ok(()) => state = state.on_success(),
                        Err(e) => {
                            warn!(backend_id = %descriptor.id, attempt, max, error = %e, "Connection attempt failed");
                            if let Err(close_err) = client.close().await {
                                debug!(backend_id = %descriptor.id, error = %close_err, "Close after failed attempt");
                            }
                            last_error = Some(e);
                            state = state.on_failure(&self.policy);
                            if matches!(state, ConnectState::Connecting { .. }) {
                                tokio::time::sleep(self.policy.delay).await;
                            }
                        }
                    }
                }
                ConnectState::Connected => {
                    info!(backend_id = %descriptor.id, name = %descriptor.name, "Backend connected");
                    return Ok(Session::new(descriptor, client));
                }
                ConnectState::Failed => {
                    warn!(backend_id = %descriptor.id, attempts = max, "Connection failed after {} attempts", max);
                    let source: Box<dyn std::error::Error + Send + Sync> = match last_error {
                        Some(e) => Box::new(e),
                        None => "no connection attempt was made".into(),
                    };
                    return Err(GatewayError::ConnectFailed {
                        attempts: max,
                        source,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_client::MockTransport;
    use hub_core::methods;
    use std::sync::Arc;

    fn descriptor() -> BackendDescriptor {
        BackendDescriptor::stdio("a", "A", "unused")
    }

    #[test]
    fn state_machine_is_bounded() {
        let policy = RetryPolicy::default();
        let mut state = ConnectState::initial();
        state = state.on_failure(&policy);
        assert_eq!(state, ConnectState::Connecting { attempt: 2 });
        state = state.on_failure(&policy);
        assert_eq!(state, ConnectState::Connecting { attempt: 3 });
        state = state.on_failure(&policy);
        assert_eq!(state, ConnectState::Failed);
        // Failed is terminal
        assert_eq!(state.on_success(), ConnectState::Failed);
    }

    #[test]
    fn zero_attempts_is_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let mock = MockTransport::new("A").fail_starts(2);
        let client = McpClient::new(Arc::new(mock.clone()));

        let started = tokio::time::Instant::now();
        let session = Establisher::default()
            .establish(&descriptor(), client)
            .await
            .unwrap();

        assert_eq!(mock.starts(), 3);
        assert_eq!(session.backend_id(), "a");
        // Two fixed delays between three attempts
        assert_eq!(started.elapsed(), Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let mock = MockTransport::new("A").fail_starts(10);
        let client = McpClient::new(Arc::new(mock.clone()));

        let err = Establisher::default()
            .establish(&descriptor(), client)
            .await
            .unwrap_err();

        assert_eq!(mock.starts(), 3);
        let message = err.to_string();
        assert!(message.contains("after 3 attempts"), "{}", message);
        assert!(message.contains("refused to start"), "{}", message);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_close_the_client() {
        let mock = MockTransport::new("A").fail_starts(1);
        let client = McpClient::new(Arc::new(mock.clone()));

        Establisher::new(RetryPolicy::new(2, Duration::from_millis(10)))
            .establish(&descriptor(), client)
            .await
            .unwrap();

        assert_eq!(mock.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn every_failed_handshake_restarts_from_scratch() {
        let mock = MockTransport::new("A").on_failure(methods::INITIALIZE, "Broken pipe");
        let client = McpClient::new(Arc::new(mock.clone()));

        let err = Establisher::default()
            .establish(&descriptor(), client)
            .await
            .unwrap_err();

        assert_eq!(mock.starts(), 3);
        assert_eq!(mock.closes(), 3);
        assert_eq!(mock.calls_to(methods::INITIALIZE).len(), 3);
        assert!(!mock.is_started());
        assert!(err.to_string().contains("after 3 attempts"), "{}", err);
    }
}
