//! Connectivity probing and bounded retries.
//!
//! Remote state transitions (sshd coming up, the controller RPC
//! binding its port) are only observable by polling. Both polls share
//! the same shape: a bounded number of attempts with a fixed delay
//! between them.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

/// Per-attempt TCP connect timeout. Attempts that hang count the same
/// as attempts that are refused.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// The probed endpoint never accepted a connection.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{node}:{port} not reachable after {attempts} attempts")]
    Timeout {
        node: String,
        port: u16,
        attempts: u32,
    },
}

/// Wait until `node:port` accepts a TCP connection.
///
/// Makes up to `max_attempts` connection attempts, sleeping
/// `retry_delay` between consecutive failures. The connection is
/// closed immediately on success; the only observable side effect is
/// the connect itself.
pub async fn wait_for_port(
    node: &str,
    port: u16,
    max_attempts: u32,
    retry_delay: Duration,
) -> Result<(), ProbeError> {
    wait_for_port_via(node, port, max_attempts, retry_delay, move || async move {
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((node, port))).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(node = %node, port, error = %e, "Connect failed");
                false
            }
            Err(_) => {
                debug!(node = %node, port, "Connect attempt timed out");
                false
            }
        }
    })
    .await
}

/// Attempt loop behind [`wait_for_port`], with the connect itself
/// injectable so the attempt accounting is testable.
async fn wait_for_port_via<F, Fut>(
    node: &str,
    port: u16,
    max_attempts: u32,
    retry_delay: Duration,
    mut connect: F,
) -> Result<(), ProbeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 1..=max_attempts {
        if connect().await {
            debug!(node = %node, port, attempt, "Port is reachable");
            return Ok(());
        }
        if attempt < max_attempts {
            tokio::time::sleep(retry_delay).await;
        }
    }

    Err(ProbeError::Timeout {
        node: node.to_string(),
        port,
        attempts: max_attempts,
    })
}

/// Run `op` up to `max_attempts` times, sleeping `delay` between
/// failed attempts.
///
/// An error for which `is_retryable` returns false is returned
/// immediately without consuming the remaining budget; the last
/// attempt's error is returned when the budget runs out.
pub async fn retry_bounded<T, E, F, Fut, R>(
    max_attempts: u32,
    delay: Duration,
    mut op: F,
    is_retryable: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                debug!(attempt, max_attempts, "Retryable failure, backing off");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
