//! Per-volume exchange loop.
//!
//! One task per volume owns the channel and repeats:
//!
//! ```text
//! ┌─► assemble pending requests ──► channel.exchange(outbound, wake)
//! │                                        │
//! │   deliver responses ◄── take(token) ◄──┘
//! └──────────────┘
//! ```
//!
//! With nothing to send and nothing in flight the loop parks on the
//! outbox notifier instead of calling the channel. It stops when the
//! volume leaves the active states or the channel fails, and hands the
//! channel back to whoever awaits the task.

use std::sync::Arc;

use bytes::Bytes;

use super::channel::Channel;
use super::outbox::Outbox;
use crate::correlation::Completion;
use crate::protocol::{FrameReader, ResponseFrame};
use crate::status::Status;
use crate::volume::Volume;

/// Run the exchange loop for `volume` until teardown or channel failure.
pub(crate) async fn run(
    volume: Arc<Volume>,
    mut channel: Box<dyn Channel>,
    mut outbox: Outbox,
) -> Box<dyn Channel> {
    let wake = outbox.wake_handle();
    let max_request_bytes = volume.config().max_request_bytes;
    let max_response_bytes = volume.config().max_response_bytes;

    tracing::debug!(volume = volume.identity(), "exchange loop started");

    while volume.state().accepts_operations() {
        let table = volume.table();
        let batch = outbox.assemble(max_request_bytes, |token| table.contains(token));

        for frame in batch.oversized {
            if let Some(op) = table.take(frame.token) {
                tracing::warn!(
                    volume = volume.identity(),
                    token = frame.token,
                    payload = frame.payload.len(),
                    limit = max_request_bytes,
                    "request too large for the channel"
                );
                volume
                    .registry()
                    .complete(op, Completion::from_status(Status::INSUFFICIENT_RESOURCES));
            }
        }

        if batch.frames == 0 && table.is_empty() {
            if outbox.is_empty() {
                wake.notified().await;
            }
            continue;
        }

        let outbound = batch.bytes;
        let exchange = match channel
            .exchange(outbound.clone(), max_response_bytes, &wake)
            .await
        {
            Ok(exchange) => exchange,
            Err(e) => {
                if volume.state().accepts_operations() {
                    tracing::error!(volume = volume.identity(), error = %e, "channel failed");
                } else {
                    tracing::debug!(
                        volume = volume.identity(),
                        error = %e,
                        "channel closed during teardown"
                    );
                }
                break;
            }
        };

        if exchange.consumed < outbound.len() {
            outbox.requeue_unsent(&outbound, exchange.consumed);
        }
        if batch.frames > 0 {
            tracing::debug!(
                volume = volume.identity(),
                frames = batch.frames,
                bytes = exchange.consumed.min(outbound.len()),
                "request batch sent"
            );
        }

        deliver(&volume, exchange.inbound);
    }

    tracing::debug!(
        volume = volume.identity(),
        state = volume.state().as_str(),
        "exchange loop stopped"
    );
    channel
}

/// Complete the caller of every well-formed response in `inbound`.
fn deliver(volume: &Volume, inbound: Bytes) {
    if inbound.is_empty() {
        return;
    }

    let mut responses = FrameReader::<ResponseFrame>::new(inbound);
    for response in responses.by_ref() {
        let token = response.token;
        let Some(op) = volume.table().take(token) else {
            tracing::debug!(
                volume = volume.identity(),
                token,
                "response for unknown token discarded"
            );
            continue;
        };
        if op.kind() != response.kind {
            tracing::warn!(
                volume = volume.identity(),
                token,
                expected = op.kind(),
                got = response.kind,
                "response kind does not match request"
            );
        }
        volume.registry().complete(op, Completion::from(response));
    }

    if !responses.is_exhausted() {
        tracing::warn!(
            volume = volume.identity(),
            offset = responses.offset(),
            trailing = responses.trailing(),
            "malformed response bytes discarded"
        );
    }
}
