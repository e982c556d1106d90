//! Result status codes carried in response frames.
//!
//! Codes follow the NT status layout: the top two bits are the severity,
//! `0b11` meaning error. Providers may return any 32-bit value; the core
//! only interprets the handful of codes it produces itself.

use std::fmt;

/// A 32-bit operation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub u32);

impl Status {
    /// Operation completed successfully.
    pub const SUCCESS: Status = Status(0x0000_0000);
    /// Operation was cancelled before a response arrived.
    pub const CANCELLED: Status = Status(0xC000_0120);
    /// No handler exists for this target kind or operation kind.
    pub const INVALID_DEVICE_REQUEST: Status = Status(0xC000_0010);
    /// Target volume is being torn down.
    pub const VOLUME_DISMOUNTED: Status = Status(0xC000_026E);
    /// Admission failed or the request could not be encoded.
    pub const INSUFFICIENT_RESOURCES: Status = Status(0xC000_009A);
    /// Payload could not be decoded.
    pub const INVALID_PARAMETER: Status = Status(0xC000_000D);
    /// Volume identity is malformed.
    pub const OBJECT_NAME_INVALID: Status = Status(0xC000_0033);
    /// A live volume already uses the identity.
    pub const OBJECT_NAME_COLLISION: Status = Status(0xC000_0035);

    /// Raw code.
    #[inline]
    pub fn code(self) -> u32 {
        self.0
    }

    /// Check the severity bits.
    #[inline]
    pub fn is_success(self) -> bool {
        self.0 >> 30 != 0b11
    }

    /// Check if this is an error status.
    #[inline]
    pub fn is_error(self) -> bool {
        !self.is_success()
    }

    fn name(self) -> Option<&'static str> {
        match self {
            Status::SUCCESS => Some("SUCCESS"),
            Status::CANCELLED => Some("CANCELLED"),
            Status::INVALID_DEVICE_REQUEST => Some("INVALID_DEVICE_REQUEST"),
            Status::VOLUME_DISMOUNTED => Some("VOLUME_DISMOUNTED"),
            Status::INSUFFICIENT_RESOURCES => Some("INSUFFICIENT_RESOURCES"),
            Status::INVALID_PARAMETER => Some("INVALID_PARAMETER"),
            Status::OBJECT_NAME_INVALID => Some("OBJECT_NAME_INVALID"),
            Status::OBJECT_NAME_COLLISION => Some("OBJECT_NAME_COLLISION"),
            _ => None,
        }
    }
}

impl From<u32> for Status {
    fn from(code: u32) -> Self {
        Status(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({:#010x})", name, self.0),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity() {
        assert!(Status::SUCCESS.is_success());
        assert!(Status::CANCELLED.is_error());
        assert!(Status::INVALID_DEVICE_REQUEST.is_error());
        assert!(Status::VOLUME_DISMOUNTED.is_error());
        // Informational and warning severities still count as success.
        assert!(Status(0x4000_0000).is_success());
        assert!(Status(0x8000_0005).is_success());
    }

    #[test]
    fn test_display() {
        assert_eq!(Status::CANCELLED.to_string(), "CANCELLED (0xc0000120)");
        assert_eq!(Status(0x1234).to_string(), "0x00001234");
    }
}
