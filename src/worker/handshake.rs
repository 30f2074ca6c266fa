//! One-time readiness negotiation with a freshly spawned worker.

use std::time::Duration;

use super::protocol::RequestEnvelope;
use super::transport::ChannelTransport;
use crate::error::{Error, Result, TransportError};

/// Run the handshake on `transport`.
///
/// Posts the uncorrelated start signal and waits for the worker's ready
/// signal. Other messages arriving meanwhile go to the correlation registry
/// as usual. Fails if the worker reports a startup error, hangs up, or stays
/// silent for longer than `startup_timeout`.
pub async fn start(transport: &ChannelTransport, startup_timeout: Duration) -> Result<()> {
    let ready = transport.begin_handshake()?;
    transport.post(&RequestEnvelope::start())?;
    tracing::debug!(timeout_ms = startup_timeout.as_millis() as u64, "waiting for worker");

    match tokio::time::timeout(startup_timeout, ready).await {
        Ok(Ok(Ok(()))) => {
            transport.mark_ready()?;
            tracing::debug!("worker ready");
            Ok(())
        }
        Ok(Ok(Err(e))) => Err(e),
        Ok(Err(_)) => Err(TransportError::WorkerExited.into()),
        Err(_) => Err(Error::Timeout(startup_timeout)),
    }
}
