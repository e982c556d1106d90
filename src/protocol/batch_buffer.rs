//! Batch reassembly for byte-stream channels.
//!
//! Over a pipe or socket, one exchange buffer travels as a batch: a `u32`
//! little-endian length followed by that many bytes of packed frames.
//! Reads can split a batch anywhere, so incoming bytes are accumulated
//! here until whole batches are available.
//!
//! Implements a state machine for handling fragmented batches:
//! - `WaitingForLength`: Need at least 4 bytes
//! - `WaitingForBody`: Length parsed, need N more bytes

use bytes::{Bytes, BytesMut};

use crate::error::{FsvirtError, Result};

/// Size of the batch length prefix.
pub const BATCH_PREFIX_SIZE: usize = 4;

/// State machine for batch parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for the 4-byte length prefix.
    WaitingForLength,
    /// Length parsed, waiting for the batch body.
    WaitingForBody { remaining: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete batches.
pub struct BatchBuffer {
    /// Accumulated bytes from stream reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Largest batch the peer is allowed to send.
    max_batch_size: usize,
}

impl BatchBuffer {
    /// Create a batch buffer that rejects batches above `max_batch_size`.
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_batch_size.min(64 * 1024) + BATCH_PREFIX_SIZE),
            state: State::WaitingForLength,
            max_batch_size,
        }
    }

    /// Length prefix for a batch of `len` bytes.
    pub fn prefix(len: usize) -> Result<[u8; BATCH_PREFIX_SIZE]> {
        let len = u32::try_from(len).map_err(|_| {
            FsvirtError::Protocol(format!("Batch of {} bytes cannot be framed", len))
        })?;
        Ok(len.to_le_bytes())
    }

    /// Encode `batch` with its length prefix.
    pub fn frame_batch(batch: &[u8]) -> Result<Vec<u8>> {
        let prefix = Self::prefix(batch.len())?;
        let mut out = Vec::with_capacity(BATCH_PREFIX_SIZE + batch.len());
        out.extend_from_slice(&prefix);
        out.extend_from_slice(batch);
        Ok(out)
    }

    /// Push data into the buffer and extract all complete batches.
    ///
    /// # Errors
    ///
    /// Returns error if a batch exceeds the configured maximum. The stream
    /// cannot be resynchronized after that and should be closed.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut batches = Vec::new();
        while let Some(batch) = self.try_extract_one()? {
            batches.push(batch);
        }
        Ok(batches)
    }

    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::WaitingForLength => {
                    if self.buffer.len() < BATCH_PREFIX_SIZE {
                        return Ok(None);
                    }
                    let prefix = self.buffer.split_to(BATCH_PREFIX_SIZE);
                    let len =
                        u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
                    if len > self.max_batch_size {
                        return Err(FsvirtError::Protocol(format!(
                            "Batch size {} exceeds maximum {}",
                            len, self.max_batch_size
                        )));
                    }
                    self.state = State::WaitingForBody { remaining: len };
                }
                State::WaitingForBody { remaining } => {
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }
                    let body = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForLength;
                    return Ok(Some(body));
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Whether a batch has been started but not finished.
    pub fn in_progress(&self) -> bool {
        !self.buffer.is_empty() || matches!(self.state, State::WaitingForBody { .. })
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}
