//! Channel and volume configuration.
//!
//! ```
//! use fsvirt::ChannelConfig;
//!
//! let config = ChannelConfig::from_json(r#"{ "max_request_bytes": 8192 }"#).unwrap();
//! assert_eq!(config.max_request_bytes, 8192);
//! assert_eq!(config.max_response_bytes, fsvirt::config::DEFAULT_MAX_RESPONSE_BYTES);
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::{FsvirtError, Result};
use crate::protocol::{MAX_FRAME_SIZE, RESPONSE_HEADER_SIZE};

/// Default ceiling for one outbound request batch.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 4096;

/// Default ceiling for one inbound response batch.
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// Default maximum in-flight operations per volume.
pub const DEFAULT_MAX_PENDING_OPERATIONS: usize = 1024;

/// Default time a caller waits for an admission slot.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time `delete` waits for the exchange loop before aborting it.
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default time a pipe waits for its provider to connect.
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Limits applied to every volume channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// Caps one exchange's outbound (request) size.
    pub max_request_bytes: usize,
    /// Caps one exchange's inbound (response) size.
    pub max_response_bytes: usize,
    /// Admission limit for pending operations on one volume.
    pub max_pending_operations: usize,
    /// How long `submit` waits for an admission slot.
    #[serde(deserialize_with = "millis::deserialize", rename = "backpressure_timeout_ms")]
    pub backpressure_timeout: Duration,
    /// How long teardown waits for the exchange loop to hand the channel
    /// back. A loop stuck in channel I/O is aborted after this.
    #[serde(deserialize_with = "millis::deserialize", rename = "teardown_timeout_ms")]
    pub teardown_timeout: Duration,
    /// How long a pipe provisioner waits for the provider to connect.
    #[serde(deserialize_with = "millis::deserialize", rename = "accept_timeout_ms")]
    pub accept_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            max_pending_operations: DEFAULT_MAX_PENDING_OPERATIONS,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
        }
    }
}

impl ChannelConfig {
    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ChannelConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that both buffers can hold at least one bare frame and that
    /// neither exceeds what the 32-bit size field can describe.
    pub fn validate(&self) -> Result<()> {
        // Response headers are the larger of the two.
        for (name, value) in [
            ("max_request_bytes", self.max_request_bytes),
            ("max_response_bytes", self.max_response_bytes),
        ] {
            if value < RESPONSE_HEADER_SIZE {
                return Err(FsvirtError::Config(format!(
                    "{} must be at least {} bytes, got {}",
                    name, RESPONSE_HEADER_SIZE, value
                )));
            }
            if value > MAX_FRAME_SIZE {
                return Err(FsvirtError::Config(format!(
                    "{} must not exceed {} bytes, got {}",
                    name, MAX_FRAME_SIZE, value
                )));
            }
        }
        if self.max_pending_operations == 0 {
            return Err(FsvirtError::Config(
                "max_pending_operations must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
