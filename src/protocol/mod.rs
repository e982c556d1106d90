//! Protocol module - wire format, cursor codec, and frame sequences.
//!
//! This module implements the binary protocol between host and provider:
//! - 13-byte request / 25-byte response headers
//! - `produce`/`consume` bounds checks, the only frame-offset arithmetic
//! - Bounded frame writers and readers over exchange buffers
//! - Batch reassembly for stream transports

mod batch;
mod batch_buffer;
mod cursor;
mod frame;
mod wire_format;

pub use batch::{FrameReader, FrameWriter};
pub use batch_buffer::{BatchBuffer, BATCH_PREFIX_SIZE};
pub use cursor::{consume, produce, Direction, FrameCursor};
pub use frame::{RequestFrame, ResponseFrame, WireFrame};
pub use wire_format::{
    OperationKind, RequestHeader, ResponseHeader, MAX_FRAME_SIZE, REQUEST_HEADER_SIZE,
    RESERVED_KIND, RESPONSE_HEADER_SIZE, SIZE_FIELD_LEN,
};
