//! Bounds-checked stepping through a frame sequence.
//!
//! [`produce`] and [`consume`] are the only functions in the crate that do
//! frame-boundary arithmetic. Everything that walks a buffer, on either side
//! of the channel, goes through a [`FrameCursor`] which calls them.
//!
//! Both return `None` instead of failing: a truncated or lying frame is an
//! expected input at this boundary, and the walk simply stops there.

use std::ops::Range;

use super::wire_format::{read_u32, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE};

/// Which header layout a frame sequence uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to provider.
    Request,
    /// Provider to host.
    Response,
}

impl Direction {
    /// Smallest valid frame in this direction (one bare header).
    #[inline]
    pub fn min_frame_size(self) -> usize {
        match self {
            Direction::Request => REQUEST_HEADER_SIZE,
            Direction::Response => RESPONSE_HEADER_SIZE,
        }
    }
}

/// Reserve room for a frame of `frame_size` bytes starting at `cursor`.
///
/// Returns the offset just past the new frame iff it ends at or before
/// `buffer_end`. Never touches the buffer.
#[inline]
pub fn produce(cursor: usize, frame_size: usize, buffer_end: usize) -> Option<usize> {
    let next = cursor.checked_add(frame_size)?;
    (next <= buffer_end).then_some(next)
}

/// Validate the frame at `cursor` and return the offset of the following one.
///
/// Fails when the `size` field itself is not inside the buffer, when the
/// declared size is smaller than `min_frame_size`, or when the frame would
/// end past the buffer.
#[inline]
pub fn consume(buf: &[u8], cursor: usize, min_frame_size: usize) -> Option<usize> {
    let size = read_u32(buf, cursor)? as usize;
    if size < min_frame_size {
        return None;
    }
    let next = cursor.checked_add(size)?;
    (next <= buf.len()).then_some(next)
}

/// Explicit cursor over a frame sequence: current offset plus buffer end.
#[derive(Debug, Clone)]
pub struct FrameCursor {
    direction: Direction,
    offset: usize,
    end: usize,
}

impl FrameCursor {
    /// Cursor at the start of a buffer of `end` bytes.
    pub fn new(direction: Direction, end: usize) -> Self {
        Self {
            direction,
            offset: 0,
            end,
        }
    }

    /// Layout this cursor validates against.
    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Current offset.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Buffer end.
    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    /// Bytes between the cursor and the end.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.end - self.offset
    }

    /// Claim the next `frame_size` bytes for an outbound frame.
    ///
    /// Sizes below the direction's header length are refused.
    pub fn produce(&mut self, frame_size: usize) -> Option<Range<usize>> {
        if frame_size < self.direction.min_frame_size() {
            return None;
        }
        let next = produce(self.offset, frame_size, self.end)?;
        let range = self.offset..next;
        self.offset = next;
        Some(range)
    }

    /// Step over the next inbound frame in `buf`, returning its byte range.
    ///
    /// `buf` is clamped to the cursor's end so a cursor can never be
    /// pushed past the region it was created for.
    pub fn consume(&mut self, buf: &[u8]) -> Option<Range<usize>> {
        let bounded = buf.get(..self.end.min(buf.len()))?;
        let next = consume(bounded, self.offset, self.direction.min_frame_size())?;
        let range = self.offset..next;
        self.offset = next;
        Some(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_bytes(size: u32, payload_len: usize) -> Vec<u8> {
        let mut bytes = size.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 9]);
        bytes.extend(std::iter::repeat(0xAA).take(payload_len));
        bytes
    }

    #[test]
    fn test_produce_fits_exactly() {
        assert_eq!(produce(0, 13, 13), Some(13));
        assert_eq!(produce(10, 13, 23), Some(23));
        assert_eq!(produce(10, 14, 23), None);
    }

    #[test]
    fn test_produce_overflow_is_no_space() {
        assert_eq!(produce(usize::MAX - 1, 13, usize::MAX), None);
    }

    #[test]
    fn test_consume_requires_size_field() {
        let buf = [13u8, 0, 0];
        assert_eq!(consume(&buf, 0, REQUEST_HEADER_SIZE), None);
    }

    #[test]
    fn test_consume_rejects_undersized_declaration() {
        let buf = request_bytes(12, 0);
        assert_eq!(consume(&buf, 0, REQUEST_HEADER_SIZE), None);

        let zero = request_bytes(0, 0);
        assert_eq!(consume(&zero, 0, REQUEST_HEADER_SIZE), None);
    }

    #[test]
    fn test_consume_rejects_overrun() {
        let buf = request_bytes(100, 10);
        assert_eq!(consume(&buf, 0, REQUEST_HEADER_SIZE), None);

        let huge = request_bytes(u32::MAX, 0);
        assert_eq!(consume(&huge, 0, REQUEST_HEADER_SIZE), None);
    }

    #[test]
    fn test_consume_steps_over_payload() {
        let buf = request_bytes(18, 5);
        assert_eq!(consume(&buf, 0, REQUEST_HEADER_SIZE), Some(18));
    }

    #[test]
    fn test_cursor_walk_stops_without_moving() {
        let mut buf = request_bytes(13, 0);
        buf.extend_from_slice(&[1, 2, 3]);

        let mut cursor = FrameCursor::new(Direction::Request, buf.len());
        assert_eq!(cursor.consume(&buf), Some(0..13));
        assert_eq!(cursor.consume(&buf), None);
        assert_eq!(cursor.offset(), 13);
        assert_eq!(cursor.remaining(), 3);
    }

    #[test]
    fn test_cursor_clamped_to_end() {
        let buf = request_bytes(20, 7);
        // The cursor only owns the first 15 bytes.
        let mut cursor = FrameCursor::new(Direction::Request, 15);
        assert_eq!(cursor.consume(&buf), None);
    }

    #[test]
    fn test_cursor_produce_rejects_short_frames() {
        let mut cursor = FrameCursor::new(Direction::Response, 100);
        assert_eq!(cursor.produce(RESPONSE_HEADER_SIZE - 1), None);
        assert_eq!(cursor.produce(RESPONSE_HEADER_SIZE), Some(0..25));
        assert_eq!(cursor.produce(80), None);
        assert_eq!(cursor.offset(), 25);
    }
}
