//! In-process channel backed by tokio queues.
//!
//! The host half implements [`Channel`]; the [`ProviderEndpoint`] half is
//! handed to a provider running in the same process (tests, demos,
//! embedded providers).

use bytes::Bytes;
use tokio::sync::{mpsc, Notify};

use super::channel::{Channel, ChannelProvisioner, Exchange};
use crate::config::ChannelConfig;
use crate::dispatch::BoxFuture;
use crate::error::{FsvirtError, Result};
use crate::protocol::{RequestFrame, ResponseFrame};
use crate::provider::ProviderSession;

/// Host half of a loopback channel.
pub struct LoopbackChannel {
    requests: Option<mpsc::UnboundedSender<Bytes>>,
    responses: mpsc::UnboundedReceiver<Bytes>,
}

/// Provider half of a loopback channel.
pub struct ProviderEndpoint {
    requests: mpsc::UnboundedReceiver<Bytes>,
    responses: mpsc::UnboundedSender<Bytes>,
}

/// Create a connected loopback pair.
pub fn loopback() -> (LoopbackChannel, ProviderEndpoint) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    (
        LoopbackChannel {
            requests: Some(request_tx),
            responses: response_rx,
        },
        ProviderEndpoint {
            requests: request_rx,
            responses: response_tx,
        },
    )
}

impl Channel for LoopbackChannel {
    fn exchange<'a>(
        &'a mut self,
        outbound: Bytes,
        inbound_capacity: usize,
        wake: &'a Notify,
    ) -> BoxFuture<'a, Result<Exchange>> {
        Box::pin(async move {
            let consumed = outbound.len();
            if !outbound.is_empty() {
                let requests = self.requests.as_ref().ok_or(FsvirtError::ChannelClosed)?;
                requests
                    .send(outbound)
                    .map_err(|_| FsvirtError::ChannelClosed)?;
            }

            tokio::select! {
                biased;
                batch = self.responses.recv() => match batch {
                    Some(batch) if batch.len() > inbound_capacity => {
                        Err(FsvirtError::Protocol(format!(
                            "Response batch of {} bytes exceeds capacity {}",
                            batch.len(),
                            inbound_capacity
                        )))
                    }
                    Some(batch) => Ok(Exchange { inbound: batch, consumed }),
                    None => Err(FsvirtError::ChannelClosed),
                },
                _ = wake.notified() => Ok(Exchange::idle(consumed)),
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        self.requests = None;
        Box::pin(async { Ok(()) })
    }
}

impl ProviderEndpoint {
    /// Wait for the next request batch. `None` once the host closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.requests.recv().await
    }

    /// Send one response batch.
    pub fn send(&self, batch: Bytes) -> Result<()> {
        self.responses
            .send(batch)
            .map_err(|_| FsvirtError::ChannelClosed)
    }

    /// Answer every request synchronously with `handler` until the host
    /// closes the channel.
    pub async fn serve<F>(mut self, max_response_bytes: usize, mut handler: F) -> Result<()>
    where
        F: FnMut(RequestFrame) -> ResponseFrame,
    {
        let mut session = ProviderSession::new(max_response_bytes);
        while let Some(batch) = self.recv().await {
            for response_batch in session.handle_batch(batch, &mut handler) {
                self.send(response_batch)?;
            }
        }
        Ok(())
    }
}

/// Provisions loopback channels and hands each provider endpoint out
/// through a queue.
pub struct LoopbackProvisioner {
    endpoints: mpsc::UnboundedSender<(String, ProviderEndpoint)>,
}

impl LoopbackProvisioner {
    /// Create a provisioner and the receiver of its provider endpoints.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, ProviderEndpoint)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { endpoints: tx }, rx)
    }
}

impl ChannelProvisioner for LoopbackProvisioner {
    fn provision<'a>(
        &'a self,
        identity: &'a str,
        _config: &'a ChannelConfig,
    ) -> BoxFuture<'a, Result<Box<dyn Channel>>> {
        Box::pin(async move {
            let (channel, endpoint) = loopback();
            // Nobody collecting endpoints means nobody can serve the volume.
            self.endpoints
                .send((identity.to_string(), endpoint))
                .map_err(|_| {
                    FsvirtError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotConnected,
                        "no provider is accepting loopback endpoints",
                    ))
                })?;
            Ok(Box::new(channel) as Box<dyn Channel>)
        })
    }
}
