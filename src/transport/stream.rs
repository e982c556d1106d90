//! Length-prefixed batches over any async byte stream.
//!
//! Both ends of a pipe channel use [`BatchStream`]: the host writes request
//! batches and reads response batches, the provider does the opposite.
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │ len: u32 LE  │ len bytes of packed frames   │
//! └──────────────┴──────────────────────────────┘
//! ```

use std::collections::VecDeque;
use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{FsvirtError, Result};
use crate::protocol::{BatchBuffer, BATCH_PREFIX_SIZE};

/// Read buffer size for a single stream read.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// A byte stream carrying whole batches in both directions.
pub struct BatchStream<S> {
    stream: S,
    batches: BatchBuffer,
    ready: VecDeque<Bytes>,
    read_buf: Box<[u8]>,
}

impl<S> BatchStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap `stream`, rejecting inbound batches above `max_inbound_batch`.
    pub fn new(stream: S, max_inbound_batch: usize) -> Self {
        Self {
            stream,
            batches: BatchBuffer::new(max_inbound_batch),
            ready: VecDeque::new(),
            read_buf: vec![0u8; READ_CHUNK_SIZE].into_boxed_slice(),
        }
    }

    /// Read the next complete batch. `None` means the peer closed the
    /// stream between batches.
    ///
    /// Cancel-safe: bytes already read stay buffered for the next call.
    pub async fn read_batch(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(batch) = self.ready.pop_front() {
                return Ok(Some(batch));
            }
            let n = self.stream.read(&mut self.read_buf).await?;
            if n == 0 {
                if self.batches.in_progress() {
                    return Err(FsvirtError::Protocol(format!(
                        "Stream ended inside a batch ({} bytes buffered)",
                        self.batches.len()
                    )));
                }
                return Ok(None);
            }
            let complete = self.batches.push(&self.read_buf[..n])?;
            self.ready.extend(complete);
        }
    }

    /// Write one batch with its length prefix and flush.
    pub async fn write_batch(&mut self, batch: &[u8]) -> Result<()> {
        let prefix = BatchBuffer::prefix(batch.len())?;
        write_prefixed(&mut self.stream, &prefix, batch).await
    }

    /// Shut down the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Get a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }
}

/// Write prefix and body with scatter/gather I/O, finishing partial writes.
async fn write_prefixed<W>(
    writer: &mut W,
    prefix: &[u8; BATCH_PREFIX_SIZE],
    body: &[u8],
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total = BATCH_PREFIX_SIZE + body.len();
    let mut written = 0;

    while written < total {
        let slices = remaining_slices(prefix, body, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(FsvirtError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        written += n;
    }

    writer.flush().await?;
    Ok(())
}

/// Slices covering everything after the first `skip` bytes.
fn remaining_slices<'a>(prefix: &'a [u8], body: &'a [u8], skip: usize) -> Vec<IoSlice<'a>> {
    let mut slices = Vec::with_capacity(2);
    if skip < prefix.len() {
        slices.push(IoSlice::new(&prefix[skip..]));
    }
    let body_skip = skip.saturating_sub(prefix.len());
    if body_skip < body.len() {
        slices.push(IoSlice::new(&body[body_skip..]));
    }
    slices
}
