//! Outbound request queue feeding a volume's exchange loop.
//!
//! Submitting callers push request frames through a cloneable
//! [`OutboxHandle`]; the exchange loop owns the receiving [`Outbox`] and
//! packs as many queued frames as fit into each request batch.
//!
//! # Architecture
//!
//! ```text
//! Caller 1 ─┐
//! Caller 2 ─┼─► mpsc::UnboundedSender<RequestFrame> ─► Outbox::assemble ─► request batch
//! Caller N ─┘          │
//!                      └─► wake.notify_one() ─► interrupts a waiting exchange
//! ```
//!
//! The queue has its own synchronization, independent of the correlation
//! table lock. Frames that do not fit in the current batch stay in the
//! outbox (in order) for the next one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Notify};

use crate::error::{FsvirtError, Result};
use crate::protocol::{FrameReader, FrameWriter, RequestFrame};

/// Handle for queueing request frames.
///
/// This is cheaply cloneable and can be shared across callers.
#[derive(Clone)]
pub struct OutboxHandle {
    tx: mpsc::UnboundedSender<RequestFrame>,
    queued: Arc<AtomicUsize>,
    wake: Arc<Notify>,
}

impl OutboxHandle {
    /// Queue a frame and wake the exchange loop.
    ///
    /// Fails with `ChannelClosed` once the exchange loop has stopped.
    pub fn send(&self, frame: RequestFrame) -> Result<()> {
        // Count before sending so the loop never sees a negative balance.
        self.queued.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(frame).is_err() {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(FsvirtError::ChannelClosed);
        }
        self.wake.notify_one();
        Ok(())
    }

    /// Wake the exchange loop without queueing anything.
    #[inline]
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Frames queued but not yet picked up by the loop.
    #[inline]
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Check whether the exchange loop has dropped its receiver.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One request batch produced by [`Outbox::assemble`].
#[derive(Debug, Default)]
pub struct OutboundBatch {
    /// Packed request frames.
    pub bytes: Bytes,
    /// Number of frames in `bytes`.
    pub frames: usize,
    /// Frames too large for even an empty batch.
    pub oversized: Vec<RequestFrame>,
}

impl OutboundBatch {
    /// Check if no frame was packed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }
}

/// Receiving side, owned by the exchange loop.
pub struct Outbox {
    rx: mpsc::UnboundedReceiver<RequestFrame>,
    deferred: VecDeque<RequestFrame>,
    queued: Arc<AtomicUsize>,
    wake: Arc<Notify>,
}

/// Create a connected handle/outbox pair.
pub fn outbox() -> (OutboxHandle, Outbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let queued = Arc::new(AtomicUsize::new(0));
    let wake = Arc::new(Notify::new());

    let handle = OutboxHandle {
        tx,
        queued: queued.clone(),
        wake: wake.clone(),
    };
    let outbox = Outbox {
        rx,
        deferred: VecDeque::new(),
        queued,
        wake,
    };
    (handle, outbox)
}

impl Outbox {
    /// The notifier that queueing (and teardown) signals.
    pub fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    /// Check if nothing is waiting to be sent.
    pub fn is_empty(&self) -> bool {
        self.deferred.is_empty() && self.queued.load(Ordering::Acquire) == 0
    }

    fn next_frame(&mut self) -> Option<RequestFrame> {
        if let Some(frame) = self.deferred.pop_front() {
            return Some(frame);
        }
        let frame = self.rx.try_recv().ok()?;
        self.queued.fetch_sub(1, Ordering::AcqRel);
        Some(frame)
    }

    /// Pack queued frames into a batch of at most `capacity` bytes.
    ///
    /// Frames for which `is_pending` is false (cancelled or abandoned
    /// operations) are dropped. Packing stops at the first frame that does
    /// not fit; it and everything behind it wait for the next batch.
    pub fn assemble<P>(&mut self, capacity: usize, is_pending: P) -> OutboundBatch
    where
        P: Fn(u64) -> bool,
    {
        let mut writer = FrameWriter::<RequestFrame>::new(capacity);
        let mut oversized = Vec::new();

        while let Some(frame) = self.next_frame() {
            if !is_pending(frame.token) {
                tracing::debug!(token = frame.token, "skipping request no longer pending");
                continue;
            }
            if writer.push(&frame) {
                continue;
            }
            if writer.is_empty() {
                oversized.push(frame);
                continue;
            }
            self.deferred.push_front(frame);
            break;
        }

        OutboundBatch {
            frames: writer.frame_count(),
            bytes: writer.finish(),
            oversized,
        }
    }

    /// Put back the frames of `sent` that lie past `consumed`, ahead of
    /// anything still queued.
    pub fn requeue_unsent(&mut self, sent: &Bytes, consumed: usize) {
        let mut reader = FrameReader::<RequestFrame>::new(sent.clone());
        let mut unsent = Vec::new();
        while let Some(frame) = reader.next() {
            if reader.offset() > consumed {
                unsent.push(frame);
            }
        }
        tracing::debug!(frames = unsent.len(), "requeueing undelivered requests");
        for frame in unsent.into_iter().rev() {
            self.deferred.push_front(frame);
        }
    }
}
