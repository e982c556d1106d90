//! # fsvirt
//!
//! Wire protocol and correlation engine between a filesystem-virtualization
//! host and out-of-process filesystem providers.
//!
//! The host turns filesystem operations into request frames, parks each
//! caller under a correlation token and completes it when the provider's
//! response frame for that token comes back.
//!
//! ## Architecture
//!
//! - **Wire codec** ([`protocol`]): checked `produce`/`consume` over packed frames
//! - **Correlation** ([`correlation`]): per-volume token table, one outcome per operation
//! - **Dispatch** ([`dispatch`]): handler sets selected by device kind and operation kind
//! - **Volumes** ([`volume`]): create/open/delete lifecycle
//! - **Transport** ([`transport`]): one exchange loop per volume over a [`transport::Channel`]
//!
//! ## Example
//!
//! ```ignore
//! use fsvirt::transport::LoopbackProvisioner;
//! use fsvirt::{OperationKind, VolumeManager};
//!
//! #[tokio::main]
//! async fn main() -> fsvirt::Result<()> {
//!     let (provisioner, mut endpoints) = LoopbackProvisioner::new();
//!     let manager = VolumeManager::builder().provisioner(provisioner).build()?;
//!
//!     let volume = manager.create("V1", Vec::new()).await?;
//!     // ... serve `endpoints` from a provider task ...
//!     let completion = volume.submit(OperationKind::Read, Vec::new()).await?.await;
//!
//!     manager.delete(&volume).await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod control;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod provider;
pub mod status;
pub mod transport;
pub mod volume;

pub use config::ChannelConfig;
pub use correlation::{Completion, CorrelationTable, PendingOperation, Submission};
pub use dispatch::{DeviceKind, DispatchOutcome, DispatchRegistry, Operation, Target};
pub use error::{FsvirtError, Result};
pub use protocol::OperationKind;
pub use status::Status;
pub use volume::{Volume, VolumeManager, VolumeManagerBuilder, VolumeState};
