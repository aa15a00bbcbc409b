// Direct-path probe: reach the sender's listener or give up quickly

use std::time::Duration;
use tokio::time::Instant;

use crate::conn::WsClientConn;
use crate::error::TransferError;

/// Connect to `url`, retrying with doubling delays until `budget` is spent.
pub(crate) async fn probe_direct(
    url: &str,
    initial_backoff: Duration,
    budget: Duration,
) -> Result<WsClientConn, TransferError> {
    let until = Instant::now() + budget;
    let mut backoff = initial_backoff;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let remaining = until.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, WsClientConn::connect(url)).await {
            Ok(Ok(conn)) => {
                tracing::debug!("Direct probe attempt {} reached {}", attempt, url);
                return Ok(conn);
            }
            Ok(Err(e)) => tracing::debug!("Direct probe attempt {} failed: {}", attempt, e),
            Err(_) => break,
        }

        let remaining = until.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        tokio::time::sleep(backoff.min(remaining)).await;
        backoff *= 2;
    }

    tracing::debug!("Direct probe gave up after {} attempt(s)", attempt);
    Err(TransferError::DirectProbeFailed)
}
