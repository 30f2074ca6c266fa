//! Caller side of the worker channel.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as Json;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::host::{WorkerChannel, WorkerHandle};
use super::protocol::{Inbound, OperationKind, RequestEnvelope};
use super::registry::CorrelationRegistry;
use crate::error::{Error, Result, TransportError};

/// Lifecycle of a [`ChannelTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Created; the handshake has not begun.
    Uninitialized,
    /// Start signal sent, waiting for the worker's ready signal.
    Handshaking,
    /// Requests may be sent.
    Ready,
    /// Closed by the caller or abandoned by the worker.
    Closed,
}

type ReadySignal = oneshot::Receiver<Result<()>>;

/// Owns one worker and multiplexes requests to it by correlation ID.
///
/// A background reader task decodes every inbound message once and settles
/// the matching pending request. Responses may arrive in any order.
#[derive(Debug)]
pub struct ChannelTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<Json>>>,
    registry: CorrelationRegistry,
    state: Arc<Mutex<TransportState>>,
    ready: Mutex<Option<ReadySignal>>,
    handle: Box<dyn WorkerHandle>,
    reader: JoinHandle<()>,
}

impl ChannelTransport {
    /// Take ownership of a spawned worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(channel: WorkerChannel, request_timeout: Duration) -> Self {
        let WorkerChannel {
            outbound,
            inbound,
            handle,
        } = channel;

        let registry = CorrelationRegistry::new(request_timeout);
        let state = Arc::new(Mutex::new(TransportState::Uninitialized));
        let (ready_tx, ready_rx) = oneshot::channel();
        let reader = tokio::spawn(read_loop(
            inbound,
            registry.clone(),
            Arc::clone(&state),
            ready_tx,
        ));

        Self {
            outbound: Mutex::new(Some(outbound)),
            registry,
            state,
            ready: Mutex::new(Some(ready_rx)),
            handle,
            reader,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransportState {
        *lock(&self.state)
    }

    /// Number of requests awaiting a response.
    pub fn pending(&self) -> usize {
        self.registry.len()
    }

    /// Send a request and wait for its result.
    pub async fn send(&self, kind: OperationKind, args: Json) -> Result<Json> {
        self.ensure_ready()?;

        let (id, rx) = self.registry.register();
        let envelope = RequestEnvelope {
            kind,
            args,
            message_id: Some(id.clone()),
        };
        match self.post(&envelope) {
            Ok(()) => tracing::trace!(message_id = %id, operation = kind.as_str(), "sent request"),
            Err(e) => {
                self.registry.settle(&id, Err(e));
            }
        }

        rx.await
            .unwrap_or_else(|_| Err(TransportError::Closed.into()))
    }

    /// Send typed arguments and decode the typed result.
    pub async fn request<P, R>(&self, kind: OperationKind, params: &P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let args = serde_json::to_value(params).map_err(|e| {
            Error::Validation(format!("cannot encode {} arguments: {e}", kind.as_str()))
        })?;
        let result = self.send(kind, args).await?;
        serde_json::from_value(result).map_err(Error::Decode)
    }

    /// Close the transport and terminate the worker.
    ///
    /// Pending requests are rejected with [`TransportError::Closed`].
    /// Returns `false` if the transport was already closed.
    pub fn close(&self) -> bool {
        let previous = std::mem::replace(&mut *lock(&self.state), TransportState::Closed);
        if previous == TransportState::Closed {
            return false;
        }

        lock(&self.outbound).take();
        self.handle.terminate();
        self.reader.abort();
        let rejected = self.registry.reject_all(|| TransportError::Closed.into());
        tracing::debug!(rejected, "transport closed");
        true
    }

    /// Move from `Uninitialized` to `Handshaking` and hand out the ready signal.
    pub(crate) fn begin_handshake(&self) -> Result<ReadySignal> {
        let mut state = lock(&self.state);
        match *state {
            TransportState::Uninitialized => {}
            TransportState::Closed => return Err(TransportError::Closed.into()),
            TransportState::Handshaking | TransportState::Ready => {
                return Err(Error::Validation("handshake already started".to_string()))
            }
        }
        let ready = lock(&self.ready)
            .take()
            .ok_or(TransportError::WorkerExited)?;
        *state = TransportState::Handshaking;
        Ok(ready)
    }

    /// Move from `Handshaking` to `Ready`.
    pub(crate) fn mark_ready(&self) -> Result<()> {
        let mut state = lock(&self.state);
        match *state {
            TransportState::Handshaking => {
                *state = TransportState::Ready;
                Ok(())
            }
            TransportState::Closed => Err(TransportError::Closed.into()),
            _ => Err(TransportError::NotReady.into()),
        }
    }

    /// Write an envelope to the worker without correlating it.
    pub(crate) fn post(&self, envelope: &RequestEnvelope) -> Result<()> {
        let message = serde_json::to_value(envelope)
            .map_err(|e| Error::Validation(format!("cannot encode request: {e}")))?;
        let outbound = lock(&self.outbound);
        let Some(sender) = outbound.as_ref() else {
            return Err(TransportError::Closed.into());
        };
        sender
            .send(message)
            .map_err(|_| TransportError::WorkerExited.into())
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            TransportState::Ready => Ok(()),
            TransportState::Closed => Err(TransportError::Closed.into()),
            TransportState::Uninitialized | TransportState::Handshaking => {
                Err(TransportError::NotReady.into())
            }
        }
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_loop(
    mut inbound: mpsc::UnboundedReceiver<Json>,
    registry: CorrelationRegistry,
    state: Arc<Mutex<TransportState>>,
    ready_tx: oneshot::Sender<Result<()>>,
) {
    let mut ready_tx = Some(ready_tx);

    while let Some(raw) = inbound.recv().await {
        match Inbound::decode(raw) {
            Ok(Inbound::Response { message_id, result }) => {
                registry.settle(&message_id, Ok(result));
            }
            Ok(Inbound::ErrorResponse { message_id, error }) => {
                registry.settle(&message_id, Err(Error::Engine(error)));
            }
            Ok(Inbound::Ready) => match ready_tx.take() {
                Some(tx) => {
                    let _ = tx.send(Ok(()));
                }
                None => tracing::trace!("ignoring repeated ready signal"),
            },
            Ok(Inbound::StartupFailed(error)) => match ready_tx.take() {
                Some(tx) => {
                    let _ = tx.send(Err(TransportError::StartupFailed(error.to_string()).into()));
                }
                None => tracing::warn!(error = %error, "worker reported an uncorrelated error"),
            },
            Err(e) => tracing::warn!(error = %e, "dropping message from worker"),
        }
    }

    // The worker hung up.
    if let Some(tx) = ready_tx.take() {
        let _ = tx.send(Err(TransportError::WorkerExited.into()));
    }
    let previous = std::mem::replace(&mut *lock(&state), TransportState::Closed);
    let rejected = registry.reject_all(|| TransportError::WorkerExited.into());
    if previous != TransportState::Closed {
        tracing::warn!(rejected, "worker exited");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
