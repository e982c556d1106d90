//! Pipe announcement message.
//!
//! When a pipe channel is provisioned, the host tells the provider where
//! to connect with one JSON line:
//!
//! ```text
//! {"volume":"V1","pipe":"/tmp/fsvirt-…","version":"1.0.0","max_request_bytes":4096,"max_response_bytes":65536}
//! ```
//!
//! # Example
//!
//! ```
//! use fsvirt::control::Announcement;
//! use fsvirt::ChannelConfig;
//!
//! let line = Announcement::new("V1", "/tmp/fsvirt.sock", &ChannelConfig::default())
//!     .to_line()
//!     .unwrap();
//! let parsed = Announcement::parse(&line).unwrap();
//! assert_eq!(parsed.volume, "V1");
//! ```

use serde::{Deserialize, Serialize};

use crate::config::ChannelConfig;
use crate::error::Result;

/// Protocol version string.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Where and how a provider reaches one volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// Volume identity.
    pub volume: String,
    /// Path of the Unix socket or named pipe.
    pub pipe: String,
    /// Wire protocol version.
    pub version: String,
    /// Largest request batch the host sends.
    pub max_request_bytes: usize,
    /// Largest response batch the host accepts.
    pub max_response_bytes: usize,
}

impl Announcement {
    /// Describe the pipe for `volume` under `config`'s limits.
    pub fn new(volume: &str, pipe: &str, config: &ChannelConfig) -> Self {
        Self {
            volume: volume.to_string(),
            pipe: pipe.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            max_request_bytes: config.max_request_bytes,
            max_response_bytes: config.max_response_bytes,
        }
    }

    /// Serialize to a single JSON line (without the trailing newline).
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an announcement line, as a provider does.
    pub fn parse(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_announcement_format() {
        let config = ChannelConfig {
            max_request_bytes: 8192,
            ..ChannelConfig::default()
        };
        let line = Announcement::new("V1", "/tmp/test.sock", &config)
            .to_line()
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(parsed["volume"], "V1");
        assert_eq!(parsed["pipe"], "/tmp/test.sock");
        assert_eq!(parsed["version"], PROTOCOL_VERSION);
        assert_eq!(parsed["max_request_bytes"], 8192);
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_parse_tolerates_line_ending() {
        let line = concat!(
            r#"{"volume":"V","pipe":"p","version":"1.0.0","#,
            r#""max_request_bytes":100,"max_response_bytes":200}"#,
            "\r\n"
        );
        let parsed = Announcement::parse(line).unwrap();
        assert_eq!(parsed.max_response_bytes, 200);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Announcement::parse("not json").is_err());
    }
}
