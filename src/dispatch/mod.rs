//! Dispatch module - routing operations to handlers by target kind.
//!
//! Every incoming operation enters through [`DispatchRegistry::dispatch`]:
//!
//! ```text
//! Received ──► target destroying? ──yes──► Rejected     (VOLUME_DISMOUNTED)
//!                   │ no
//!                   ▼
//!              handler set for DeviceKind? ──no──► Unsupported (INVALID_DEVICE_REQUEST)
//!                   │ yes
//!                   ▼
//!              handler for operation kind? ──no──► Unsupported
//!                   │ yes
//!                   ▼
//!              Handled(completion)
//! ```
//!
//! The registry is built once with [`DispatchRegistry::builder`] and shared
//! by `Arc` between the volume manager, its volumes and their exchange
//! loops.
//!
//! # Example
//!
//! ```
//! use fsvirt::dispatch::{DeviceKind, DispatchRegistry};
//! use fsvirt::OperationKind;
//!
//! let registry = DispatchRegistry::builder()
//!     .forward(OperationKind::Read)
//!     .forward(OperationKind::Write)
//!     .build();
//!
//! let volume_ops = registry.handler_set(DeviceKind::Volume).unwrap();
//! assert!(volume_ops.contains(OperationKind::Read.as_u8()));
//! assert!(!volume_ops.contains(OperationKind::Create.as_u8()));
//! ```

mod builtin;
mod registry;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::correlation::Completion;
use crate::protocol::OperationKind;
use crate::status::Status;
use crate::volume::{Volume, VolumeManager};

pub use builtin::{create_volume, CreateVolumeParams, ForwardToProvider};
pub use registry::{
    BoxFuture, DispatchRegistry, DispatchRegistryBuilder, FnHandler, Handler, HandlerSet,
    TypedHandler,
};

/// Kind of object an operation targets. Selects the handler set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// The control device that creates volumes.
    Control,
    /// A mounted virtual volume.
    Volume,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Control => f.write_str("control"),
            DeviceKind::Volume => f.write_str("volume"),
        }
    }
}

/// The object an operation is addressed to.
#[derive(Clone)]
pub enum Target {
    /// The manager's control device.
    Control(VolumeManager),
    /// A volume.
    Volume(Arc<Volume>),
}

impl Target {
    /// Device kind of the target.
    pub fn device_kind(&self) -> DeviceKind {
        match self {
            Target::Control(_) => DeviceKind::Control,
            Target::Volume(_) => DeviceKind::Volume,
        }
    }

    /// Whether the target is in a non-destroying state.
    pub fn accepts_operations(&self) -> bool {
        match self {
            Target::Control(manager) => manager.is_running(),
            Target::Volume(volume) => volume.state().accepts_operations(),
        }
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        match self {
            Target::Control(_) => "control",
            Target::Volume(volume) => volume.identity(),
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Target")
            .field(&self.device_kind())
            .field(&self.name())
            .finish()
    }
}

/// An incoming operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Raw operation kind tag.
    pub kind: u8,
    /// Kind-specific payload.
    pub payload: Bytes,
}

impl Operation {
    /// Create an operation of a known kind.
    pub fn new(kind: OperationKind, payload: impl Into<Bytes>) -> Self {
        Self::with_raw_kind(kind.as_u8(), payload)
    }

    /// Create an operation with an arbitrary kind tag.
    pub fn with_raw_kind(kind: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// The operation kind, if the tag is a known one.
    #[inline]
    pub fn operation(&self) -> Option<OperationKind> {
        OperationKind::from_u8(self.kind)
    }
}

/// Result of routing one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran and produced this completion.
    Handled(Completion),
    /// No handler exists for the target kind or operation kind.
    Unsupported,
    /// The target is being torn down.
    Rejected,
}

impl DispatchOutcome {
    /// Status reported to the caller.
    pub fn status(&self) -> Status {
        match self {
            DispatchOutcome::Handled(completion) => completion.status,
            DispatchOutcome::Unsupported => Status::INVALID_DEVICE_REQUEST,
            DispatchOutcome::Rejected => Status::VOLUME_DISMOUNTED,
        }
    }

    /// Flatten into the completion the caller sees.
    pub fn into_completion(self) -> Completion {
        match self {
            DispatchOutcome::Handled(completion) => completion,
            other => Completion::from_status(other.status()),
        }
    }
}
