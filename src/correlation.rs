//! Per-volume correlation of pending operations.
//!
//! Every operation a caller submits is parked here under a correlation
//! token until exactly one of three things happens:
//!
//! ```text
//!                 register
//!   caller ────────────────► [ table ] ──take(token)──► completion path ──► Ok/Err status
//!      ▲                        │  │
//!      │        cancel(token) ──┘  └── drain_for_cancellation() ──► CANCELLED
//!      │                                    (volume teardown)
//!      └── Submission dropped: entry forgotten, nobody is resumed
//! ```
//!
//! Whoever removes an entry from the map owns its [`PendingOperation`] and
//! is the only party that can resume the caller, so every operation has
//! exactly one outcome. The map lock is never held while a caller is
//! resumed.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::{oneshot, OwnedSemaphorePermit};

use crate::codec::MsgPackCodec;
use crate::error::{FsvirtError, Result};
use crate::protocol::{RequestFrame, ResponseFrame};
use crate::status::Status;

/// The outcome delivered to a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Result status.
    pub status: Status,
    /// Secondary result value (typically a byte count).
    pub information: u64,
    /// Response payload.
    pub payload: Bytes,
}

impl Completion {
    /// Create a completion.
    pub fn new(status: Status, information: u64, payload: Bytes) -> Self {
        Self {
            status,
            information,
            payload,
        }
    }

    /// A completion with only a status.
    pub fn from_status(status: Status) -> Self {
        Self::new(status, 0, Bytes::new())
    }

    /// The completion delivered to cancelled callers.
    pub fn cancelled() -> Self {
        Self::from_status(Status::CANCELLED)
    }

    /// Check the status severity.
    #[inline]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Decode the payload as MsgPack.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        MsgPackCodec::decode(&self.payload)
    }
}

impl From<ResponseFrame> for Completion {
    fn from(frame: ResponseFrame) -> Self {
        Self::new(frame.status, frame.information, frame.payload)
    }
}

impl From<&FsvirtError> for Completion {
    fn from(err: &FsvirtError) -> Self {
        Self::from_status(err.status())
    }
}

/// One in-flight caller request.
#[derive(Debug)]
pub struct PendingOperation {
    token: u64,
    kind: u8,
    payload: Bytes,
    created_at: Instant,
    volume: Arc<str>,
    completer: oneshot::Sender<Completion>,
}

impl PendingOperation {
    /// Create an operation for `volume` and the receiver its caller waits on.
    ///
    /// The token is assigned when the operation enters a table.
    pub fn new(
        volume: Arc<str>,
        kind: u8,
        payload: Bytes,
    ) -> (Self, oneshot::Receiver<Completion>) {
        let (completer, rx) = oneshot::channel();
        let op = Self {
            token: 0,
            kind,
            payload,
            created_at: Instant::now(),
            volume,
            completer,
        };
        (op, rx)
    }

    /// Correlation token.
    #[inline]
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Raw operation kind.
    #[inline]
    pub fn kind(&self) -> u8 {
        self.kind
    }

    /// Request payload.
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Identity of the owning volume.
    #[inline]
    pub fn volume(&self) -> &str {
        &self.volume
    }

    pub(crate) fn identity(&self) -> Arc<str> {
        self.volume.clone()
    }

    /// Time since the operation was created.
    #[inline]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// The request frame carrying this operation.
    pub fn request_frame(&self) -> RequestFrame {
        RequestFrame::with_raw_kind(self.token, self.kind, self.payload.clone())
    }

    /// Whether the caller has stopped waiting.
    #[inline]
    pub fn is_abandoned(&self) -> bool {
        self.completer.is_closed()
    }

    /// Resume the caller. Returns `false` if it was no longer waiting.
    pub fn complete(self, completion: Completion) -> bool {
        self.completer.send(completion).is_ok()
    }
}

struct TableInner {
    entries: HashMap<u64, PendingOperation>,
    next_token: u64,
    closed: bool,
}

/// Map from correlation token to pending operation for one volume.
pub struct CorrelationTable {
    inner: Mutex<TableInner>,
}

impl CorrelationTable {
    /// Create an empty, open table. The first issued token is 1.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TableInner {
                entries: HashMap::new(),
                next_token: 1,
                closed: false,
            }),
        }
    }

    /// Insert an operation under a caller-chosen token.
    ///
    /// # Errors
    ///
    /// `DuplicateToken` if the token is already pending, `Unavailable` once
    /// the table has been drained. The operation is dropped in both cases,
    /// which its caller observes as a closed completion channel.
    pub fn insert(&self, token: u64, mut op: PendingOperation) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(FsvirtError::Unavailable);
        }
        if inner.entries.contains_key(&token) {
            return Err(FsvirtError::DuplicateToken(token));
        }
        op.token = token;
        inner.entries.insert(token, op);
        Ok(())
    }

    /// Insert an operation under the next unused token and return it.
    ///
    /// Tokens increase monotonically and are never reused; 0 is never issued.
    pub fn register(&self, mut op: PendingOperation) -> Result<u64> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(FsvirtError::Unavailable);
        }
        let mut token = inner.next_token;
        // Skip tokens claimed through `insert`.
        while token == 0 || inner.entries.contains_key(&token) {
            token = token.wrapping_add(1);
        }
        inner.next_token = token.wrapping_add(1);
        op.token = token;
        inner.entries.insert(token, op);
        Ok(token)
    }

    /// Remove and return the operation for `token`.
    pub fn take(&self, token: u64) -> Option<PendingOperation> {
        self.inner.lock().entries.remove(&token)
    }

    /// Remove the operation and resume its caller with `CANCELLED`.
    ///
    /// Returns whether an operation was pending under `token`.
    pub fn cancel(&self, token: u64) -> bool {
        let Some(op) = self.take(token) else {
            return false;
        };
        tracing::debug!(volume = %op.volume, token, "operation cancelled");
        op.complete(Completion::cancelled());
        true
    }

    /// Remove an entry whose caller already gave up. Nobody is resumed.
    pub(crate) fn forget(&self, token: u64) -> bool {
        self.take(token).is_some()
    }

    /// Close the table and hand back every pending operation, oldest token
    /// first. Later inserts fail with `Unavailable`.
    ///
    /// The caller is responsible for resuming each returned operation.
    pub fn drain_for_cancellation(&self) -> Vec<PendingOperation> {
        let mut drained: Vec<PendingOperation> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.entries.drain().map(|(_, op)| op).collect()
        };
        drained.sort_by_key(|op| op.token);
        drained
    }

    /// Whether the table has been drained.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Check whether `token` is pending.
    pub fn contains(&self, token: u64) -> bool {
        self.inner.lock().entries.contains_key(&token)
    }

    /// Number of pending operations.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check if no operation is pending.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Age of the longest-waiting operation.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.inner
            .lock()
            .entries
            .values()
            .map(|op| op.created_at)
            .min()
            .map(|created| created.elapsed())
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Future resolving to the completion of one submitted operation.
///
/// Dropping it before it resolves removes the operation from its table,
/// so a late response for the token is discarded.
pub struct Submission {
    token: u64,
    rx: oneshot::Receiver<Completion>,
    table: Arc<CorrelationTable>,
    done: bool,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Submission {
    pub(crate) fn new(
        token: u64,
        rx: oneshot::Receiver<Completion>,
        table: Arc<CorrelationTable>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            token,
            rx,
            table,
            done: false,
            _permit: permit,
        }
    }

    /// Correlation token of the operation.
    #[inline]
    pub fn token(&self) -> u64 {
        self.token
    }
}

impl Future for Submission {
    type Output = Completion;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Completion> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(result) => {
                self.done = true;
                // A dropped sender means the operation was discarded unanswered.
                Poll::Ready(result.unwrap_or_else(|_| Completion::cancelled()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Submission {
    fn drop(&mut self) {
        if !self.done && self.table.forget(self.token) {
            tracing::debug!(token = self.token, "submission dropped before completion");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(kind: u8) -> (PendingOperation, oneshot::Receiver<Completion>) {
        PendingOperation::new(Arc::from("V1"), kind, Bytes::from_static(b"payload"))
    }

    #[test]
    fn test_register_issues_monotonic_nonzero_tokens() {
        let table = CorrelationTable::new();
        let tokens: Vec<u64> = (0..4).map(|_| table.register(op(4).0).unwrap()).collect();

        assert_eq!(tokens, vec![1, 2, 3, 4]);
        assert!(table.take(2).is_some());
        // Freed tokens are not reissued.
        assert_eq!(table.register(op(4).0).unwrap(), 5);
    }

    #[test]
    fn test_register_skips_inserted_tokens() {
        let table = CorrelationTable::new();
        table.insert(1, op(4).0).unwrap();
        table.insert(2, op(4).0).unwrap();

        assert_eq!(table.register(op(4).0).unwrap(), 3);
    }

    #[test]
    fn test_take_succeeds_exactly_once() {
        let table = CorrelationTable::new();
        let token = table.register(op(5).0).unwrap();

        let taken = table.take(token).unwrap();
        assert_eq!(taken.token(), token);
        assert_eq!(taken.kind(), 5);
        assert_eq!(taken.volume(), "V1");
        assert!(table.take(token).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let table = CorrelationTable::new();
        table.insert(7, op(4).0).unwrap();

        let result = table.insert(7, op(4).0);
        assert!(matches!(result, Err(FsvirtError::DuplicateToken(7))));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_resumes_caller_and_late_take_misses() {
        let table = CorrelationTable::new();
        let (pending, rx) = op(4);
        let token = table.register(pending).unwrap();

        assert!(table.cancel(token));
        assert_eq!(rx.await.unwrap().status, Status::CANCELLED);

        // The response arriving afterwards finds nothing to complete.
        assert!(table.take(token).is_none());
        assert!(!table.cancel(token));
    }

    #[tokio::test]
    async fn test_drain_returns_all_and_closes() {
        let table = CorrelationTable::new();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (pending, rx) = op(4);
            table.register(pending).unwrap();
            receivers.push(rx);
        }

        let drained = table.drain_for_cancellation();
        assert_eq!(
            drained.iter().map(|op| op.token()).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(table.is_empty());
        assert!(table.is_closed());
        assert!(matches!(
            table.register(op(4).0),
            Err(FsvirtError::Unavailable)
        ));

        for pending in drained {
            assert!(pending.complete(Completion::cancelled()));
        }
        for rx in receivers {
            assert_eq!(rx.await.unwrap(), Completion::cancelled());
        }
    }

    #[test]
    fn test_complete_reports_abandoned_caller() {
        let table = CorrelationTable::new();
        let (pending, rx) = op(4);
        let token = table.register(pending).unwrap();
        drop(rx);

        let taken = table.take(token).unwrap();
        assert!(taken.is_abandoned());
        assert!(!taken.complete(Completion::from_status(Status::SUCCESS)));
    }

    #[test]
    fn test_oldest_age_tracks_earliest_entry() {
        let table = CorrelationTable::new();
        assert!(table.oldest_age().is_none());

        table.register(op(4).0).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        table.register(op(4).0).unwrap();

        assert!(table.oldest_age().unwrap() >= Duration::from_millis(5));
    }

    #[test]
    fn test_request_frame_carries_token_and_payload() {
        let table = CorrelationTable::new();
        let token = table.register(op(3).0).unwrap();
        let frame = table.take(token).unwrap().request_frame();

        assert_eq!(frame.token, token);
        assert_eq!(frame.kind, 3);
        assert_eq!(frame.payload(), b"payload");
    }

    #[tokio::test]
    async fn test_dropped_submission_forgets_entry() {
        let table = Arc::new(CorrelationTable::new());
        let (pending, rx) = op(4);
        let token = table.register(pending).unwrap();

        let submission = Submission::new(token, rx, table.clone(), None);
        assert_eq!(submission.token(), token);
        drop(submission);

        assert!(!table.contains(token));
    }

    #[tokio::test]
    async fn test_submission_resolves_with_completion() {
        let table = Arc::new(CorrelationTable::new());
        let (pending, rx) = op(4);
        let token = table.register(pending).unwrap();
        let submission = Submission::new(token, rx, table.clone(), None);

        let taken = table.take(token).unwrap();
        taken.complete(Completion::new(Status::SUCCESS, 3, Bytes::from_static(b"abc")));

        let completion = submission.await;
        assert!(completion.is_success());
        assert_eq!(completion.information, 3);
    }
}
