//! Request and response frames with typed accessors.
//!
//! Payloads use `bytes::Bytes`, so decoding a frame out of an inbound batch
//! is a cheap slice of the batch rather than a copy.
//!
//! # Example
//!
//! ```
//! use fsvirt::protocol::{OperationKind, RequestFrame};
//! use bytes::Bytes;
//!
//! let frame = RequestFrame::new(42, OperationKind::Read, Bytes::from_static(b"hello"));
//! assert_eq!(frame.token(), 42);
//! assert_eq!(frame.encoded_len(), Some(13 + 5));
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::cursor::Direction;
use super::wire_format::{
    OperationKind, RequestHeader, ResponseHeader, MAX_FRAME_SIZE, REQUEST_HEADER_SIZE,
    RESPONSE_HEADER_SIZE,
};
use crate::status::Status;

/// A frame type that can be packed into and walked out of a frame sequence.
pub trait WireFrame: Sized {
    /// Header layout used by this frame type.
    const DIRECTION: Direction;

    /// Total encoded size, or `None` if it cannot be described by the
    /// 32-bit `size` field.
    fn encoded_len(&self) -> Option<usize>;

    /// Append the encoded frame to `dst`.
    ///
    /// Callers must have checked `encoded_len` first.
    fn encode_into(&self, dst: &mut BytesMut);

    /// Decode a frame from exactly the bytes the cursor validated.
    fn decode(frame: Bytes) -> Option<Self>;
}

/// A request from the host to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    /// Correlation token.
    pub token: u64,
    /// Raw operation kind tag.
    pub kind: u8,
    /// Kind-specific payload.
    pub payload: Bytes,
}

impl RequestFrame {
    /// Create a request for a known operation kind.
    pub fn new(token: u64, kind: OperationKind, payload: Bytes) -> Self {
        Self::with_raw_kind(token, kind.as_u8(), payload)
    }

    /// Create a request carrying an arbitrary kind tag.
    pub fn with_raw_kind(token: u64, kind: u8, payload: Bytes) -> Self {
        Self {
            token,
            kind,
            payload,
        }
    }

    /// Get the correlation token.
    #[inline]
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Get the operation kind, if the tag is a known one.
    #[inline]
    pub fn operation(&self) -> Option<OperationKind> {
        OperationKind::from_u8(self.kind)
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> Option<usize> {
        <Self as WireFrame>::encoded_len(self)
    }
}

impl WireFrame for RequestFrame {
    const DIRECTION: Direction = Direction::Request;

    fn encoded_len(&self) -> Option<usize> {
        let len = REQUEST_HEADER_SIZE.checked_add(self.payload.len())?;
        (len <= MAX_FRAME_SIZE).then_some(len)
    }

    fn encode_into(&self, dst: &mut BytesMut) {
        let size = REQUEST_HEADER_SIZE + self.payload.len();
        let header = RequestHeader::new(size as u32, self.token, self.kind);
        dst.put_slice(&header.encode());
        dst.put_slice(&self.payload);
    }

    fn decode(frame: Bytes) -> Option<Self> {
        let header = RequestHeader::decode(&frame)?;
        if header.size as usize != frame.len() {
            return None;
        }
        Some(Self {
            token: header.token,
            kind: header.kind,
            payload: frame.slice(REQUEST_HEADER_SIZE..),
        })
    }
}

/// A response from the provider to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Correlation token echoed from the request.
    pub token: u64,
    /// Raw operation kind tag.
    pub kind: u8,
    /// Result status.
    pub status: Status,
    /// Secondary result value.
    pub information: u64,
    /// Kind-specific payload.
    pub payload: Bytes,
}

impl ResponseFrame {
    /// Create a response.
    pub fn new(token: u64, kind: u8, status: Status, information: u64, payload: Bytes) -> Self {
        Self {
            token,
            kind,
            status,
            information,
            payload,
        }
    }

    /// Create a response answering `request`, echoing its token and kind.
    pub fn answering(
        request: &RequestFrame,
        status: Status,
        information: u64,
        payload: Bytes,
    ) -> Self {
        Self::new(request.token, request.kind, status, information, payload)
    }

    /// Get the correlation token.
    #[inline]
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> Option<usize> {
        <Self as WireFrame>::encoded_len(self)
    }
}

impl WireFrame for ResponseFrame {
    const DIRECTION: Direction = Direction::Response;

    fn encoded_len(&self) -> Option<usize> {
        let len = RESPONSE_HEADER_SIZE.checked_add(self.payload.len())?;
        (len <= MAX_FRAME_SIZE).then_some(len)
    }

    fn encode_into(&self, dst: &mut BytesMut) {
        let size = RESPONSE_HEADER_SIZE + self.payload.len();
        let header = ResponseHeader::new(
            size as u32,
            self.token,
            self.status.code(),
            self.information,
            self.kind,
        );
        dst.put_slice(&header.encode());
        dst.put_slice(&self.payload);
    }

    fn decode(frame: Bytes) -> Option<Self> {
        let header = ResponseHeader::decode(&frame)?;
        if header.size as usize != frame.len() {
            return None;
        }
        Some(Self {
            token: header.token,
            kind: header.kind,
            status: Status(header.status),
            information: header.information,
            payload: frame.slice(RESPONSE_HEADER_SIZE..),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_encode_layout() {
        let frame = RequestFrame::new(7, OperationKind::Write, Bytes::from_static(b"data"));
        let mut buf = BytesMut::new();
        frame.encode_into(&mut buf);

        assert_eq!(buf.len(), REQUEST_HEADER_SIZE + 4);
        assert_eq!(&buf[0..4], &17u32.to_le_bytes());
        assert_eq!(buf[12], OperationKind::Write.as_u8());
        assert_eq!(&buf[13..], b"data");
    }

    #[test]
    fn test_request_decode_shares_buffer() {
        let frame = RequestFrame::new(9, OperationKind::Read, Bytes::from_static(b"xyz"));
        let mut buf = BytesMut::new();
        frame.encode_into(&mut buf);
        let bytes = buf.freeze();

        let decoded = RequestFrame::decode(bytes.clone()).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.payload.as_ptr(), bytes[REQUEST_HEADER_SIZE..].as_ptr());
    }

    #[test]
    fn test_decode_rejects_size_mismatch() {
        let frame = RequestFrame::new(9, OperationKind::Read, Bytes::new());
        let mut buf = BytesMut::new();
        frame.encode_into(&mut buf);
        buf.put_u8(0);

        assert!(RequestFrame::decode(buf.freeze()).is_none());
    }

    #[test]
    fn test_response_answering_echoes_request() {
        let request = RequestFrame::with_raw_kind(0xDEAD_BEEF, 0x7F, Bytes::new());
        let response = ResponseFrame::answering(&request, Status::SUCCESS, 12, Bytes::new());

        assert_eq!(response.token(), 0xDEAD_BEEF);
        assert_eq!(response.kind, 0x7F);

        let mut buf = BytesMut::new();
        response.encode_into(&mut buf);
        assert_eq!(buf.len(), RESPONSE_HEADER_SIZE);
        assert_eq!(ResponseFrame::decode(buf.freeze()), Some(response));
    }

    #[test]
    fn test_unknown_kind_has_no_operation() {
        let frame = RequestFrame::with_raw_kind(1, 200, Bytes::new());
        assert_eq!(frame.operation(), None);
    }
}
