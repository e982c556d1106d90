//! Provider-side helpers.
//!
//! A provider receives request batches and answers with response batches
//! bounded by the host's inbound capacity. [`ProviderSession`] walks
//! requests with the same checked cursor the host uses and packs
//! responses, carrying over whatever does not fit into the next batch.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use fsvirt::protocol::{FrameWriter, OperationKind, RequestFrame, ResponseFrame};
//! use fsvirt::provider::ProviderSession;
//! use fsvirt::Status;
//!
//! let mut requests = FrameWriter::new(4096);
//! requests.push(&RequestFrame::new(1, OperationKind::Read, Bytes::new()));
//!
//! let mut session = ProviderSession::new(4096);
//! let batches = session.handle_batch(requests.finish(), |request| {
//!     ResponseFrame::answering(&request, Status::SUCCESS, 0, Bytes::new())
//! });
//! assert_eq!(batches.len(), 1);
//! ```

use std::collections::VecDeque;

use bytes::Bytes;

use crate::protocol::{FrameReader, FrameWriter, RequestFrame, ResponseFrame};
use crate::status::Status;

/// Response packing state for one provider connection.
pub struct ProviderSession {
    max_response_bytes: usize,
    backlog: VecDeque<ResponseFrame>,
}

impl ProviderSession {
    /// Create a session whose batches never exceed `max_response_bytes`.
    pub fn new(max_response_bytes: usize) -> Self {
        Self {
            max_response_bytes,
            backlog: VecDeque::new(),
        }
    }

    /// Iterate the well-formed requests of a batch.
    pub fn requests(batch: Bytes) -> FrameReader<RequestFrame> {
        FrameReader::new(batch)
    }

    /// Queue a response for the next batch.
    pub fn push(&mut self, response: ResponseFrame) {
        self.backlog.push_back(response);
    }

    /// Responses queued but not yet packed.
    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    /// Pack queued responses into one batch, or `None` if nothing is queued.
    ///
    /// A response too large for any batch is replaced by a bare
    /// `INSUFFICIENT_RESOURCES` answer so its caller is not left waiting.
    pub fn next_batch(&mut self) -> Option<Bytes> {
        if self.backlog.is_empty() {
            return None;
        }

        let mut writer = FrameWriter::<ResponseFrame>::new(self.max_response_bytes);
        while let Some(response) = self.backlog.pop_front() {
            if writer.push(&response) {
                continue;
            }
            if writer.is_empty() {
                tracing::warn!(
                    token = response.token,
                    payload = response.payload.len(),
                    limit = self.max_response_bytes,
                    "response too large for any batch"
                );
                let refusal = ResponseFrame::new(
                    response.token,
                    response.kind,
                    Status::INSUFFICIENT_RESOURCES,
                    0,
                    Bytes::new(),
                );
                if writer.push(&refusal) {
                    continue;
                }
                // Limits below one header are rejected by config validation.
                break;
            }
            self.backlog.push_front(response);
            break;
        }
        Some(writer.finish())
    }

    /// Answer every request in `batch` with `handler` and return the
    /// response batches, in order.
    pub fn handle_batch<F>(&mut self, batch: Bytes, mut handler: F) -> Vec<Bytes>
    where
        F: FnMut(RequestFrame) -> ResponseFrame,
    {
        let mut requests = Self::requests(batch);
        for request in requests.by_ref() {
            let response = handler(request);
            self.push(response);
        }
        if !requests.is_exhausted() {
            tracing::warn!(
                offset = requests.offset(),
                trailing = requests.trailing(),
                "malformed request bytes discarded"
            );
        }

        let mut batches = Vec::new();
        while let Some(batch) = self.next_batch() {
            batches.push(batch);
        }
        batches
    }
}
