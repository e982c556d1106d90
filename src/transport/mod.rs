//! Transport module - channels between a volume and its provider.
//!
//! - [`Channel`] / [`ChannelProvisioner`]: the exchange primitive
//! - [`Outbox`]: queued requests awaiting the next batch
//! - exchange loop: one task per volume driving the channel
//! - Reference channels: in-process loopback, Unix socket / Named Pipe

mod channel;
pub(crate) mod exchange_loop;
mod loopback;
mod outbox;
mod pipe;
mod stream;

pub use channel::{Channel, ChannelProvisioner, Exchange};
pub use loopback::{loopback, LoopbackChannel, LoopbackProvisioner, ProviderEndpoint};
pub use outbox::{outbox, OutboundBatch, Outbox, OutboxHandle};
pub use pipe::{
    generate_pipe_path, Announcer, PipeChannel, PipeListener, PipeProvisioner, PipeStream,
};
pub use stream::BatchStream;
