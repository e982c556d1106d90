//! Bounded frame sequences.
//!
//! [`FrameWriter`] packs frames into a buffer that never grows past its
//! capacity; [`FrameReader`] walks a received buffer and yields every
//! well-formed frame up to the first bad one. Both advance exclusively
//! through a [`FrameCursor`].
//!
//! # Example
//!
//! ```
//! use fsvirt::protocol::{FrameReader, FrameWriter, OperationKind, RequestFrame};
//! use bytes::Bytes;
//!
//! let mut writer = FrameWriter::new(64);
//! assert!(writer.push(&RequestFrame::new(1, OperationKind::Read, Bytes::new())));
//! assert!(writer.push(&RequestFrame::new(2, OperationKind::Write, Bytes::new())));
//!
//! let tokens: Vec<u64> = FrameReader::<RequestFrame>::new(writer.finish())
//!     .map(|f| f.token)
//!     .collect();
//! assert_eq!(tokens, vec![1, 2]);
//! ```

use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};

use super::cursor::FrameCursor;
use super::frame::WireFrame;

/// Builds an outbound frame sequence bounded by a fixed capacity.
pub struct FrameWriter<F: WireFrame> {
    buffer: BytesMut,
    cursor: FrameCursor,
    frames: usize,
    _frame: PhantomData<fn(&F)>,
}

impl<F: WireFrame> FrameWriter<F> {
    /// Create a writer that will hold at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            cursor: FrameCursor::new(F::DIRECTION, capacity),
            frames: 0,
            _frame: PhantomData,
        }
    }

    /// Append a frame if it fits.
    ///
    /// Returns `false` and leaves the buffer untouched when it does not.
    pub fn push(&mut self, frame: &F) -> bool {
        let Some(len) = frame.encoded_len() else {
            return false;
        };
        let Some(range) = self.cursor.produce(len) else {
            return false;
        };
        frame.encode_into(&mut self.buffer);
        debug_assert_eq!(self.buffer.len(), range.end);
        self.frames += 1;
        true
    }

    /// Check whether a frame would fit without writing it.
    pub fn fits(&self, frame: &F) -> bool {
        frame
            .encoded_len()
            .and_then(|len| self.cursor.clone().produce(len))
            .is_some()
    }

    /// Number of frames written.
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// Number of bytes written.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if no frame has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Bytes still available.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    /// Freeze the written frames.
    pub fn finish(self) -> Bytes {
        self.buffer.freeze()
    }
}

/// Iterates the well-formed frames of an inbound buffer.
///
/// Iteration ends at the buffer end or at the first frame that fails
/// validation; [`trailing`](Self::trailing) reports what was left behind.
pub struct FrameReader<F: WireFrame> {
    data: Bytes,
    cursor: FrameCursor,
    stopped: bool,
    _frame: PhantomData<fn() -> F>,
}

impl<F: WireFrame> FrameReader<F> {
    /// Walk `data` from the start.
    pub fn new(data: Bytes) -> Self {
        let cursor = FrameCursor::new(F::DIRECTION, data.len());
        Self {
            data,
            cursor,
            stopped: false,
            _frame: PhantomData,
        }
    }

    /// Offset of the next unread byte.
    #[inline]
    pub fn offset(&self) -> usize {
        self.cursor.offset()
    }

    /// Bytes that were not (or not yet) decoded.
    #[inline]
    pub fn trailing(&self) -> usize {
        self.cursor.remaining()
    }

    /// Whether the walk has reached the exact end of the buffer.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.cursor.remaining() == 0
    }
}

impl<F: WireFrame> Iterator for FrameReader<F> {
    type Item = F;

    fn next(&mut self) -> Option<F> {
        if self.stopped {
            return None;
        }
        let frame = self
            .cursor
            .consume(&self.data)
            .and_then(|range| F::decode(self.data.slice(range)));
        if frame.is_none() {
            self.stopped = true;
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        OperationKind, RequestFrame, ResponseFrame, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE,
    };
    use crate::status::Status;

    fn request(token: u64, payload: &'static [u8]) -> RequestFrame {
        RequestFrame::new(token, OperationKind::Read, Bytes::from_static(payload))
    }

    fn response(token: u64, payload: &'static [u8]) -> ResponseFrame {
        ResponseFrame::new(
            token,
            4,
            Status::SUCCESS,
            payload.len() as u64,
            Bytes::from_static(payload),
        )
    }

    #[test]
    fn test_walk_yields_every_frame_in_order() {
        let mut writer = FrameWriter::new(4096);
        for token in 1..=5u64 {
            assert!(writer.push(&response(token, b"abc")));
        }
        let total = writer.len();
        let data = writer.finish();

        let mut reader = FrameReader::<ResponseFrame>::new(data);
        let tokens: Vec<u64> = reader.by_ref().map(|f| f.token).collect();

        assert_eq!(tokens, vec![1, 2, 3, 4, 5]);
        assert_eq!(reader.offset(), total);
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_two_frames_then_stray_bytes() {
        let mut writer = FrameWriter::new(4096);
        assert!(writer.push(&response(1, b"one")));
        assert!(writer.push(&response(2, b"two")));
        let mut data = BytesMut::from(&writer.finish()[..]);
        data.extend_from_slice(&[0xFF, 0xFE, 0xFD]);

        let mut reader = FrameReader::<ResponseFrame>::new(data.freeze());
        let frames: Vec<_> = reader.by_ref().collect();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].payload(), b"two");
        assert_eq!(reader.trailing(), 3);
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_overrunning_frame_stops_walk_and_rewalk_is_unaffected() {
        let mut writer = FrameWriter::new(4096);
        assert!(writer.push(&response(1, b"ok")));
        let mut data = BytesMut::from(&writer.finish()[..]);
        // Second frame claims 1000 bytes but only a header follows.
        let mut bogus = [0u8; RESPONSE_HEADER_SIZE];
        bogus[0..4].copy_from_slice(&1000u32.to_le_bytes());
        data.extend_from_slice(&bogus);
        let data = data.freeze();

        for _ in 0..2 {
            let frames: Vec<_> = FrameReader::<ResponseFrame>::new(data.clone()).collect();
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].token, 1);
        }
    }

    #[test]
    fn test_request_walk_rejects_response_sized_lies() {
        // A size below the request header length ends the walk immediately.
        let mut data = BytesMut::new();
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend_from_slice(&[0u8; 20]);

        let mut reader = FrameReader::<RequestFrame>::new(data.freeze());
        assert!(reader.next().is_none());
        assert_eq!(reader.offset(), 0);
    }

    #[test]
    fn test_writer_stops_when_full() {
        let mut writer = FrameWriter::new(REQUEST_HEADER_SIZE * 2 + 3);
        assert!(writer.push(&request(1, b"")));
        assert!(writer.push(&request(2, b"")));
        assert!(!writer.fits(&request(3, b"")));
        assert!(!writer.push(&request(3, b"")));
        // A smaller frame still does not fit; nothing was written.
        assert_eq!(writer.len(), REQUEST_HEADER_SIZE * 2);
        assert_eq!(writer.frame_count(), 2);
        assert_eq!(writer.remaining(), 3);
    }

    #[test]
    fn test_empty_buffer_yields_nothing() {
        let mut reader = FrameReader::<RequestFrame>::new(Bytes::new());
        assert!(reader.next().is_none());
        assert!(reader.is_exhausted());
    }
}
