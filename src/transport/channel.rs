//! The exchange primitive between a volume and its provider.
//!
//! A [`Channel`] moves one outbound request batch to the provider and
//! brings back one inbound response batch per call. How the bytes travel
//! (in-process queue, socket, pipe, device handle) is the implementation's
//! business; the exchange loop only sees whole batches.

use bytes::Bytes;
use tokio::sync::Notify;

use crate::config::ChannelConfig;
use crate::dispatch::BoxFuture;
use crate::error::Result;

/// Result of one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Response frames received, possibly empty.
    pub inbound: Bytes,
    /// How many outbound bytes the channel accepted.
    ///
    /// Frames past this offset were not delivered and are sent again on
    /// the next exchange.
    pub consumed: usize,
}

impl Exchange {
    /// An exchange that delivered `consumed` bytes and received nothing.
    pub fn idle(consumed: usize) -> Self {
        Self {
            inbound: Bytes::new(),
            consumed,
        }
    }
}

/// A bidirectional, batch-oriented link to one provider.
pub trait Channel: Send + 'static {
    /// Send `outbound` (which may be empty), then wait for one response
    /// batch of at most `inbound_capacity` bytes.
    ///
    /// Must return early with an empty inbound buffer when `wake` is
    /// notified, so newly queued requests are not held up behind slow
    /// responses. Waiting for responses must be cancel-safe.
    fn exchange<'a>(
        &'a mut self,
        outbound: Bytes,
        inbound_capacity: usize,
        wake: &'a Notify,
    ) -> BoxFuture<'a, Result<Exchange>>;

    /// Release the channel. The provider observes end of stream.
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Creates the channel for a new volume.
pub trait ChannelProvisioner: Send + Sync + 'static {
    /// Provision a channel for `identity`. I/O errors propagate unchanged.
    fn provision<'a>(
        &'a self,
        identity: &'a str,
        config: &'a ChannelConfig,
    ) -> BoxFuture<'a, Result<Box<dyn Channel>>>;
}
