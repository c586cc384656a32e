//! Bounded retry loop that turns a freshly launched renderer into an open
//! control channel.

use std::{fmt, time::Duration};

use metrics::counter;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{RenderError, Stage};
use crate::infra::cdp::{AttemptError, Connector, ControlChannel};

const METRIC_CONNECT_ATTEMPTS: &str = "pressroom_connect_attempts_total";

/// Attempt budget and pacing for [`connect`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Pause after a successful connect before the first command.
    pub settle: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            initial_delay: Duration::from_millis(100),
            multiplier: 1.5,
            max_delay: Duration::from_secs(1),
            settle: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Wait before attempt `attempt + 1`, after `attempt` failures.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.initial_delay.as_nanos() as f64 * self.multiplier.max(1.0).powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_nanos() as f64 {
            self.max_delay
        } else {
            Duration::from_nanos(scaled as u64)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Idle,
    Connecting { attempt: u32 },
    Connected { attempt: u32 },
    Failed,
}

impl fmt::Display for ConnectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectState::Idle => f.write_str("idle"),
            ConnectState::Connecting { attempt } => write!(f, "connecting (attempt {attempt})"),
            ConnectState::Connected { attempt } => write!(f, "connected (attempt {attempt})"),
            ConnectState::Failed => f.write_str("failed"),
        }
    }
}

fn enter(state: ConnectState, host: &str, port: u16) {
    debug!(
        target = "pressroom::application::connect",
        host,
        port,
        state = %state,
        "Connection state changed"
    );
}

/// Open a control channel to `host:port`, retrying while the renderer is
/// still coming up.
pub async fn connect(
    connector: &dyn Connector,
    host: &str,
    port: u16,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Box<dyn ControlChannel>, RenderError> {
    enter(ConnectState::Idle, host, port);
    let mut last_error = String::from("no attempt made");

    for attempt in 1..=policy.max_attempts {
        enter(ConnectState::Connecting { attempt }, host, port);
        counter!(METRIC_CONNECT_ATTEMPTS).increment(1);

        let outcome = tokio::select! {
            outcome = connector.connect(host, port) => outcome,
            _ = cancel.cancelled() => {
                enter(ConnectState::Failed, host, port);
                return Err(RenderError::Cancelled { stage: Stage::Connect });
            }
        };

        match outcome {
            Ok(mut channel) => {
                enter(ConnectState::Connected { attempt }, host, port);
                info!(
                    target = "pressroom::application::connect",
                    host,
                    port,
                    attempt,
                    "Connected to renderer"
                );
                tokio::select! {
                    _ = time::sleep(policy.settle) => return Ok(channel),
                    _ = cancel.cancelled() => {
                        channel.close().await;
                        return Err(RenderError::Cancelled { stage: Stage::Connect });
                    }
                }
            }
            Err(AttemptError::Fatal(err)) => {
                enter(ConnectState::Failed, host, port);
                warn!(
                    target = "pressroom::application::connect",
                    host,
                    port,
                    attempt,
                    error = %err,
                    "Connection attempt failed fatally"
                );
                return Err(err);
            }
            Err(AttemptError::Retryable(reason)) => {
                debug!(
                    target = "pressroom::application::connect",
                    host,
                    port,
                    attempt,
                    reason = %reason,
                    "Renderer not ready"
                );
                last_error = reason;
            }
        }

        if attempt < policy.max_attempts {
            tokio::select! {
                _ = time::sleep(policy.delay_after(attempt)) => {}
                _ = cancel.cancelled() => {
                    enter(ConnectState::Failed, host, port);
                    return Err(RenderError::Cancelled { stage: Stage::Connect });
                }
            }
        }
    }

    enter(ConnectState::Failed, host, port);
    warn!(
        target = "pressroom::application::connect",
        host,
        port,
        attempts = policy.max_attempts,
        error = %last_error,
        "Could not connect to renderer"
    );
    Err(RenderError::Connection {
        host: host.to_string(),
        port,
        attempts: policy.max_attempts,
        last_error,
    })
}
