//! Volume manager builder and lifecycle operations.
//!
//! The [`VolumeManagerBuilder`] collects the channel limits, the dispatch
//! registry and the channel provisioner. The [`VolumeManager`] then owns
//! the set of live volumes:
//! 1. `create`: register, provision the channel, spawn the exchange loop
//! 2. `open`: look up an active volume
//! 3. `delete`: cancel pending callers, stop the loop, close the channel
//!
//! # Example
//!
//! ```ignore
//! use fsvirt::transport::PipeProvisioner;
//! use fsvirt::{OperationKind, VolumeManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = VolumeManager::builder()
//!         .max_pending_operations(256)
//!         .provisioner(PipeProvisioner::new())
//!         .build()?;
//!
//!     let volume = manager.create("V1", Vec::new()).await?;
//!     let completion = volume.submit(OperationKind::Read, Vec::new()).await?.await;
//!     println!("{}", completion.status);
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use super::{Volume, VolumeState};
use crate::config::ChannelConfig;
use crate::correlation::Completion;
use crate::dispatch::{DispatchOutcome, DispatchRegistry, Operation, Target};
use crate::error::{FsvirtError, Result};
use crate::transport::{exchange_loop, ChannelProvisioner};

/// Longest accepted volume identity, in bytes.
pub const MAX_IDENTITY_LEN: usize = 128;

/// Builder for configuring and creating a [`VolumeManager`].
pub struct VolumeManagerBuilder {
    config: ChannelConfig,
    registry: Option<Arc<DispatchRegistry>>,
    provisioner: Option<Arc<dyn ChannelProvisioner>>,
}

impl VolumeManagerBuilder {
    /// Create a builder with default limits and the standard registry.
    pub fn new() -> Self {
        Self {
            config: ChannelConfig::default(),
            registry: None,
            provisioner: None,
        }
    }

    /// Replace all channel limits at once.
    pub fn config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the outbound (request) batch ceiling.
    ///
    /// Default: 4096
    pub fn max_request_bytes(mut self, bytes: usize) -> Self {
        self.config.max_request_bytes = bytes;
        self
    }

    /// Set the inbound (response) batch ceiling.
    ///
    /// Default: 65536
    pub fn max_response_bytes(mut self, bytes: usize) -> Self {
        self.config.max_response_bytes = bytes;
        self
    }

    /// Set the maximum pending operations per volume.
    ///
    /// When this limit is reached, `submit` waits until a slot frees up or
    /// the backpressure timeout expires.
    /// Default: 1024
    pub fn max_pending_operations(mut self, limit: usize) -> Self {
        self.config.max_pending_operations = limit;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.backpressure_timeout = timeout;
        self
    }

    /// Set how long `delete` waits for the exchange loop before aborting it.
    ///
    /// Default: 1 second
    pub fn teardown_timeout(mut self, timeout: Duration) -> Self {
        self.config.teardown_timeout = timeout;
        self
    }

    /// Set how long a pipe provisioner waits for its provider to connect.
    ///
    /// Default: 30 seconds
    pub fn accept_timeout(mut self, timeout: Duration) -> Self {
        self.config.accept_timeout = timeout;
        self
    }

    /// Use `registry` instead of [`DispatchRegistry::standard`].
    pub fn registry(mut self, registry: impl Into<Arc<DispatchRegistry>>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    /// Set how channels are provisioned for new volumes. Required.
    pub fn provisioner<P: ChannelProvisioner>(mut self, provisioner: P) -> Self {
        self.provisioner = Some(Arc::new(provisioner));
        self
    }

    /// Validate the configuration and build the manager.
    pub fn build(self) -> Result<VolumeManager> {
        self.config.validate()?;
        let provisioner = self
            .provisioner
            .ok_or_else(|| FsvirtError::Config("a channel provisioner is required".to_string()))?;
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(DispatchRegistry::standard()));

        Ok(VolumeManager {
            inner: Arc::new(ManagerInner {
                config: self.config,
                registry,
                provisioner,
                volumes: Mutex::new(HashMap::new()),
                running: AtomicBool::new(true),
            }),
        })
    }
}

impl Default for VolumeManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct ManagerInner {
    config: ChannelConfig,
    registry: Arc<DispatchRegistry>,
    provisioner: Arc<dyn ChannelProvisioner>,
    volumes: Mutex<HashMap<String, Arc<Volume>>>,
    running: AtomicBool,
}

/// Owns the set of live volumes.
///
/// Cheap to clone; clones share the same volumes.
#[derive(Clone)]
pub struct VolumeManager {
    inner: Arc<ManagerInner>,
}

impl VolumeManager {
    /// Create a new manager builder.
    pub fn builder() -> VolumeManagerBuilder {
        VolumeManagerBuilder::new()
    }

    /// Channel limits applied to new volumes.
    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// The registry every volume dispatches through.
    pub fn registry(&self) -> &Arc<DispatchRegistry> {
        &self.inner.registry
    }

    /// Whether the manager still accepts new volumes.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Create a volume, provision its channel and start its exchange loop.
    ///
    /// # Errors
    ///
    /// - `InvalidIdentity` for an empty, over-long or NUL-containing identity
    /// - `VolumeExists` if a live volume already uses `identity`
    /// - `Unavailable` after [`shutdown`](Self::shutdown)
    /// - provisioning errors, unchanged
    pub async fn create(
        &self,
        identity: &str,
        security_descriptor: impl Into<Bytes>,
    ) -> Result<Arc<Volume>> {
        validate_identity(identity)?;
        if !self.is_running() {
            return Err(FsvirtError::Unavailable);
        }

        let (volume, outbox) = Volume::new(
            identity,
            security_descriptor.into(),
            self.inner.config.clone(),
            self.inner.registry.clone(),
        );
        {
            let mut volumes = self.inner.volumes.lock();
            if volumes.contains_key(identity) {
                return Err(FsvirtError::VolumeExists(identity.to_string()));
            }
            volumes.insert(identity.to_string(), volume.clone());
        }
        tracing::debug!(volume = identity, "volume created, provisioning channel");

        let channel = match self
            .inner
            .provisioner
            .provision(identity, &self.inner.config)
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(volume = identity, error = %e, "channel provisioning failed");
                volume.set_state(VolumeState::Deleted);
                self.forget(&volume);
                return Err(e);
            }
        };

        let task = tokio::spawn(exchange_loop::run(volume.clone(), channel, outbox));
        volume.attach_exchange_task(task);

        if !volume.transition(VolumeState::Created, VolumeState::Active) {
            // Deleted while provisioning; the deleter may not have seen the loop.
            if let Some(mut channel) = volume.stop_exchange_loop().await {
                if let Err(e) = channel.close().await {
                    tracing::warn!(volume = identity, error = %e, "channel close failed");
                }
            }
            return Err(FsvirtError::Unavailable);
        }

        tracing::info!(volume = identity, "volume active");
        Ok(volume)
    }

    /// Look up an active volume.
    pub fn open(&self, identity: &str) -> Result<Arc<Volume>> {
        let volume = self
            .inner
            .volumes
            .lock()
            .get(identity)
            .cloned()
            .ok_or_else(|| FsvirtError::VolumeNotFound(identity.to_string()))?;

        match volume.state() {
            VolumeState::Active => Ok(volume),
            state => Err(FsvirtError::VolumeNotActive {
                identity: identity.to_string(),
                state: state.as_str(),
            }),
        }
    }

    /// Tear a volume down.
    ///
    /// Every pending caller resumes with `CANCELLED` before the channel is
    /// closed. Deleting a volume that is already being deleted, or is
    /// gone, succeeds without doing anything.
    pub async fn delete(&self, volume: &Arc<Volume>) -> Result<()> {
        if !volume.begin_teardown() {
            tracing::debug!(volume = volume.identity(), state = %volume.state(), "delete ignored");
            return Ok(());
        }
        tracing::debug!(volume = volume.identity(), "volume deleting");

        volume.close_admission();
        let drained = volume.table().drain_for_cancellation();
        let cancelled = drained.len();
        for op in drained {
            volume.registry().complete(op, Completion::cancelled());
        }

        if let Some(mut channel) = volume.stop_exchange_loop().await {
            if let Err(e) = channel.close().await {
                tracing::warn!(volume = volume.identity(), error = %e, "channel close failed");
            }
        }

        volume.set_state(VolumeState::Deleted);
        self.forget(volume);
        tracing::info!(volume = volume.identity(), cancelled, "volume deleted");
        Ok(())
    }

    /// Identities of live volumes, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.inner.volumes.lock().keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Stop accepting volumes and delete every live one.
    pub async fn shutdown(&self) {
        self.inner.running.store(false, Ordering::Release);
        let volumes: Vec<Arc<Volume>> = self.inner.volumes.lock().values().cloned().collect();
        tracing::info!(volumes = volumes.len(), "volume manager shutting down");
        for volume in volumes {
            if let Err(e) = self.delete(&volume).await {
                tracing::warn!(
                    volume = volume.identity(),
                    error = %e,
                    "delete during shutdown failed"
                );
            }
        }
    }

    /// Route an operation addressed to the control device.
    pub async fn control(&self, operation: Operation) -> DispatchOutcome {
        self.inner
            .registry
            .dispatch(Target::Control(self.clone()), operation)
            .await
    }

    /// Drop the identity mapping if it still points at `volume`.
    fn forget(&self, volume: &Arc<Volume>) {
        let mut volumes = self.inner.volumes.lock();
        if volumes
            .get(volume.identity())
            .is_some_and(|current| Arc::ptr_eq(current, volume))
        {
            volumes.remove(volume.identity());
        }
    }
}

fn validate_identity(identity: &str) -> Result<()> {
    if identity.is_empty() {
        return Err(FsvirtError::InvalidIdentity("identity is empty".to_string()));
    }
    if identity.len() > MAX_IDENTITY_LEN {
        return Err(FsvirtError::InvalidIdentity(format!(
            "identity is {} bytes, limit is {}",
            identity.len(),
            MAX_IDENTITY_LEN
        )));
    }
    if identity.contains('\0') {
        return Err(FsvirtError::InvalidIdentity(
            "identity contains NUL".to_string(),
        ));
    }
    Ok(())
}
