//! Control-port selection for freshly launched renderers.

use std::{io::ErrorKind, net::TcpListener, ops::Range};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{RenderError, Stage};

/// Candidate range for remote-debugging ports.
pub const PORT_RANGE: Range<u16> = 9222..65_000;

/// Pick a random port in [`PORT_RANGE`] that can currently be bound on `host`.
///
/// The probe listener is closed before returning, so another process may
/// still claim the port before the renderer binds it. That race shows up as
/// refused connections, which the connection stage retries.
pub fn allocate(host: &str, max_attempts: u32) -> Result<u16, RenderError> {
    for attempt in 1..=max_attempts {
        let candidate = random_port();
        match TcpListener::bind((host, candidate)) {
            Ok(listener) => {
                drop(listener);
                debug!(
                    target = "pressroom::infra::port",
                    host,
                    port = candidate,
                    attempt,
                    "Allocated control port"
                );
                return Ok(candidate);
            }
            Err(err) if err.kind() == ErrorKind::AddrInUse => {
                debug!(
                    target = "pressroom::infra::port",
                    host,
                    port = candidate,
                    attempt,
                    "Candidate port in use; retrying"
                );
            }
            Err(err) => {
                warn!(
                    target = "pressroom::infra::port",
                    host,
                    port = candidate,
                    error = %err,
                    "Failed to probe control port"
                );
                return Err(RenderError::io(Stage::AllocatePort)(err));
            }
        }
    }

    Err(RenderError::PortAllocation {
        host: host.to_string(),
        attempts: max_attempts,
    })
}

// Randomness comes from the v4 UUID generator; no RNG crate is a dependency.
fn random_port() -> u16 {
    let span = u128::from(PORT_RANGE.end - PORT_RANGE.start);
    let offset = Uuid::new_v4().as_u128() % span;
    // offset < span <= u16::MAX, so the narrowing is lossless.
    PORT_RANGE.start + offset as u16
}
