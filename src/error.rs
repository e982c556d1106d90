//! Error types for fsvirt.
//!
//! Framing and correlation problems are not represented here: the codec
//! signals them with `None` and the transport loop drops the offending
//! frame. Everything in this enum is surfaced to an immediate caller.

use thiserror::Error;

use crate::status::Status;

/// Main error type for all fsvirt operations.
#[derive(Debug, Error)]
pub enum FsvirtError {
    /// I/O error from a channel or from resource provisioning.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (configuration, announcements).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (oversized batch, frame that cannot be encoded, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A correlation token is already pending in this table.
    #[error("Correlation token {0:#x} is already pending")]
    DuplicateToken(u64),

    /// A live volume already uses this identity.
    #[error("Volume already exists: {0}")]
    VolumeExists(String),

    /// No live volume uses this identity.
    #[error("Volume not found: {0}")]
    VolumeNotFound(String),

    /// The volume exists but is not accepting work.
    #[error("Volume {identity} is not active (state: {state})")]
    VolumeNotActive {
        /// Volume identity.
        identity: String,
        /// Lifecycle state at the time of the call.
        state: &'static str,
    },

    /// Volume identity is empty or too long.
    #[error("Invalid volume identity: {0}")]
    InvalidIdentity(String),

    /// The target is being torn down and no longer accepts operations.
    #[error("Target no longer available")]
    Unavailable,

    /// Channel closed unexpectedly.
    #[error("Channel closed")]
    ChannelClosed,

    /// Backpressure timeout - too many pending operations on the volume.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl FsvirtError {
    /// Status reported to a caller whose operation failed with this error.
    pub fn status(&self) -> Status {
        match self {
            FsvirtError::VolumeExists(_) => Status::OBJECT_NAME_COLLISION,
            FsvirtError::InvalidIdentity(_) => Status::OBJECT_NAME_INVALID,
            FsvirtError::MsgPackDecode(_) | FsvirtError::Config(_) => Status::INVALID_PARAMETER,
            FsvirtError::Unavailable
            | FsvirtError::ChannelClosed
            | FsvirtError::VolumeNotFound(_)
            | FsvirtError::VolumeNotActive { .. } => Status::VOLUME_DISMOUNTED,
            _ => Status::INSUFFICIENT_RESOURCES,
        }
    }
}

/// Result type alias using FsvirtError.
pub type Result<T> = std::result::Result<T, FsvirtError>;
