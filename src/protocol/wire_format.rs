//! Wire format encoding and decoding.
//!
//! Request frames use a 13-byte header:
//! ```text
//! ┌──────────┬───────────────────┬──────┬─────────────┐
//! │ Size     │ Correlation token │ Kind │ Payload     │
//! │ 4 bytes  │ 8 bytes           │ 1    │ Size - 13   │
//! │ uint32 LE│ uint64 LE         │ uint8│             │
//! └──────────┴───────────────────┴──────┴─────────────┘
//! ```
//!
//! Response frames use a 25-byte header:
//! ```text
//! ┌──────────┬───────────────────┬───────────┬───────────┬──────┬─────────────┐
//! │ Size     │ Correlation token │ Status    │ Info      │ Kind │ Payload     │
//! │ 4 bytes  │ 8 bytes           │ 4 bytes   │ 8 bytes   │ 1    │ Size - 25   │
//! │ uint32 LE│ uint64 LE         │ uint32 LE │ uint64 LE │ uint8│             │
//! └──────────┴───────────────────┴───────────┴───────────┴──────┴─────────────┘
//! ```
//!
//! All multi-byte integers are Little Endian. `Size` always counts the
//! header, so the smallest valid frame is exactly one header long.

/// Length of the leading `Size` field shared by both frame directions.
pub const SIZE_FIELD_LEN: usize = 4;

/// Request header size in bytes (fixed, exactly 13).
pub const REQUEST_HEADER_SIZE: usize = 13;

/// Response header size in bytes (fixed, exactly 25).
pub const RESPONSE_HEADER_SIZE: usize = 25;

/// Largest frame the `Size` field can describe.
pub const MAX_FRAME_SIZE: usize = u32::MAX as usize;

/// Reserved kind tag (never assigned to an operation).
pub const RESERVED_KIND: u8 = 0;

/// Operation kinds understood by the dispatch layer.
///
/// The numbering is part of the wire contract. Tags outside this set are
/// carried through as raw `u8` values and routed as unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum OperationKind {
    /// Open or create a file.
    Create = 1,
    /// Last handle to a file was closed.
    Cleanup = 2,
    /// File object is being destroyed.
    Close = 3,
    /// Read file data.
    Read = 4,
    /// Write file data.
    Write = 5,
    /// Query file metadata.
    QueryInformation = 6,
    /// Change file metadata.
    SetInformation = 7,
    /// Query extended attributes.
    QueryEa = 8,
    /// Set extended attributes.
    SetEa = 9,
    /// Flush cached data.
    FlushBuffers = 10,
    /// Query volume metadata.
    QueryVolumeInformation = 11,
    /// Change volume metadata.
    SetVolumeInformation = 12,
    /// Enumerate or watch a directory.
    DirectoryControl = 13,
    /// File-system control request (volume creation on the control device).
    FileSystemControl = 14,
    /// Device I/O control.
    DeviceControl = 15,
    /// System shutdown notification.
    Shutdown = 16,
    /// Byte-range locking.
    LockControl = 17,
    /// Query a security descriptor.
    QuerySecurity = 18,
    /// Set a security descriptor.
    SetSecurity = 19,
}

impl OperationKind {
    /// Every kind, in wire order.
    pub const ALL: [OperationKind; 19] = [
        OperationKind::Create,
        OperationKind::Cleanup,
        OperationKind::Close,
        OperationKind::Read,
        OperationKind::Write,
        OperationKind::QueryInformation,
        OperationKind::SetInformation,
        OperationKind::QueryEa,
        OperationKind::SetEa,
        OperationKind::FlushBuffers,
        OperationKind::QueryVolumeInformation,
        OperationKind::SetVolumeInformation,
        OperationKind::DirectoryControl,
        OperationKind::FileSystemControl,
        OperationKind::DeviceControl,
        OperationKind::Shutdown,
        OperationKind::LockControl,
        OperationKind::QuerySecurity,
        OperationKind::SetSecurity,
    ];

    /// Wire tag.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Map a wire tag back to a kind.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1..=19 => Some(Self::ALL[(tag - 1) as usize]),
            _ => None,
        }
    }
}

/// Decoded request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Total frame length including this header.
    pub size: u32,
    /// Correlation token chosen by the request producer.
    pub token: u64,
    /// Operation kind tag.
    pub kind: u8,
}

impl RequestHeader {
    /// Create a new header.
    pub fn new(size: u32, token: u64, kind: u8) -> Self {
        Self { size, token, kind }
    }

    /// Encode header to bytes (Little Endian).
    pub fn encode(&self) -> [u8; REQUEST_HEADER_SIZE] {
        let mut buf = [0u8; REQUEST_HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `REQUEST_HEADER_SIZE`.
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.size.to_le_bytes());
        buf[4..12].copy_from_slice(&self.token.to_le_bytes());
        buf[12] = self.kind;
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < REQUEST_HEADER_SIZE {
            return None;
        }
        Some(Self {
            size: read_u32(buf, 0)?,
            token: read_u64(buf, 4)?,
            kind: buf[12],
        })
    }

    /// Payload length implied by `size`, if `size` covers the header.
    #[inline]
    pub fn payload_len(&self) -> Option<usize> {
        (self.size as usize).checked_sub(REQUEST_HEADER_SIZE)
    }
}

/// Decoded response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Total frame length including this header.
    pub size: u32,
    /// Correlation token echoed from the request.
    pub token: u64,
    /// Result status code.
    pub status: u32,
    /// Operation-specific secondary result (e.g. bytes transferred).
    pub information: u64,
    /// Operation kind tag.
    pub kind: u8,
}

impl ResponseHeader {
    /// Create a new header.
    pub fn new(size: u32, token: u64, status: u32, information: u64, kind: u8) -> Self {
        Self {
            size,
            token,
            status,
            information,
            kind,
        }
    }

    /// Encode header to bytes (Little Endian).
    pub fn encode(&self) -> [u8; RESPONSE_HEADER_SIZE] {
        let mut buf = [0u8; RESPONSE_HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `RESPONSE_HEADER_SIZE`.
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.size.to_le_bytes());
        buf[4..12].copy_from_slice(&self.token.to_le_bytes());
        buf[12..16].copy_from_slice(&self.status.to_le_bytes());
        buf[16..24].copy_from_slice(&self.information.to_le_bytes());
        buf[24] = self.kind;
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < RESPONSE_HEADER_SIZE {
            return None;
        }
        Some(Self {
            size: read_u32(buf, 0)?,
            token: read_u64(buf, 4)?,
            status: read_u32(buf, 12)?,
            information: read_u64(buf, 16)?,
            kind: buf[24],
        })
    }

    /// Payload length implied by `size`, if `size` covers the header.
    #[inline]
    pub fn payload_len(&self) -> Option<usize> {
        (self.size as usize).checked_sub(RESPONSE_HEADER_SIZE)
    }
}

/// Read a little-endian `u32` at `offset`, `None` if it does not fit.
#[inline]
pub(crate) fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let end = offset.checked_add(4)?;
    let bytes = buf.get(offset..end)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
fn read_u64(buf: &[u8], offset: usize) -> Option<u64> {
    let end = offset.checked_add(8)?;
    let bytes = buf.get(offset..end)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Some(u64::from_le_bytes(raw))
}
