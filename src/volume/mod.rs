//! Volumes and their lifecycle.
//!
//! A [`Volume`] is one virtual filesystem instance: an identity, a
//! correlation table, an outbound queue and the exchange loop that owns
//! its channel. Volumes are created, opened and deleted through the
//! [`VolumeManager`].
//!
//! ```text
//! Created ──► Active ──► Deleting ──► Deleted
//!    └────────────────────────▲
//! ```

mod manager;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::ChannelConfig;
use crate::correlation::{CorrelationTable, PendingOperation, Submission};
use crate::dispatch::{DispatchOutcome, DispatchRegistry, Operation, Target};
use crate::error::{FsvirtError, Result};
use crate::protocol::{OperationKind, RequestFrame};
use crate::transport::{outbox, Channel, Outbox, OutboxHandle};

pub use manager::{VolumeManager, VolumeManagerBuilder, MAX_IDENTITY_LEN};

/// Lifecycle state of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VolumeState {
    /// Registered, channel being provisioned.
    Created = 0,
    /// Serving operations.
    Active = 1,
    /// Teardown in progress.
    Deleting = 2,
    /// Torn down.
    Deleted = 3,
}

impl VolumeState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => VolumeState::Created,
            1 => VolumeState::Active,
            2 => VolumeState::Deleting,
            _ => VolumeState::Deleted,
        }
    }

    /// State name used in logs and errors.
    pub fn as_str(self) -> &'static str {
        match self {
            VolumeState::Created => "created",
            VolumeState::Active => "active",
            VolumeState::Deleting => "deleting",
            VolumeState::Deleted => "deleted",
        }
    }

    /// Whether operations are still accepted in this state.
    #[inline]
    pub fn accepts_operations(self) -> bool {
        matches!(self, VolumeState::Created | VolumeState::Active)
    }
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One virtual volume.
pub struct Volume {
    identity: Arc<str>,
    security_descriptor: Bytes,
    state: AtomicU8,
    table: Arc<CorrelationTable>,
    outbox: OutboxHandle,
    admission: Arc<Semaphore>,
    config: ChannelConfig,
    registry: Arc<DispatchRegistry>,
    exchange_task: Mutex<Option<JoinHandle<Box<dyn Channel>>>>,
}

impl Volume {
    pub(crate) fn new(
        identity: &str,
        security_descriptor: Bytes,
        config: ChannelConfig,
        registry: Arc<DispatchRegistry>,
    ) -> (Arc<Self>, Outbox) {
        let (handle, outbox) = outbox();
        let volume = Arc::new(Self {
            identity: Arc::from(identity),
            security_descriptor,
            state: AtomicU8::new(VolumeState::Created as u8),
            table: Arc::new(CorrelationTable::new()),
            outbox: handle,
            admission: Arc::new(Semaphore::new(config.max_pending_operations)),
            config,
            registry,
            exchange_task: Mutex::new(None),
        });
        (volume, outbox)
    }

    /// Volume identity.
    #[inline]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Opaque security descriptor supplied at creation.
    #[inline]
    pub fn security_descriptor(&self) -> &Bytes {
        &self.security_descriptor
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> VolumeState {
        VolumeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Channel limits in effect for this volume.
    #[inline]
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Number of operations awaiting a response.
    pub fn pending_operations(&self) -> usize {
        self.table.len()
    }

    /// How long the oldest pending operation has been waiting.
    pub fn oldest_pending(&self) -> Option<Duration> {
        self.table.oldest_age()
    }

    /// Send an operation to the provider.
    ///
    /// Waits up to the configured backpressure timeout for an admission
    /// slot. The returned [`Submission`] resolves to the provider's answer,
    /// or to `CANCELLED` if the operation is cancelled or the volume is
    /// deleted first.
    pub async fn submit(
        &self,
        kind: OperationKind,
        payload: impl Into<Bytes>,
    ) -> Result<Submission> {
        self.submit_raw(kind.as_u8(), payload.into()).await
    }

    /// Like [`submit`](Self::submit) with an arbitrary kind tag.
    pub async fn submit_raw(&self, kind: u8, payload: Bytes) -> Result<Submission> {
        self.ensure_accepting()?;

        let permit = match tokio::time::timeout(
            self.config.backpressure_timeout,
            self.admission.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => return Err(FsvirtError::Unavailable),
            Err(_elapsed) => {
                tracing::warn!(
                    volume = %self.identity,
                    pending = self.table.len(),
                    "admission timed out"
                );
                return Err(FsvirtError::BackpressureTimeout);
            }
        };

        let (op, rx) = PendingOperation::new(self.identity.clone(), kind, payload);
        let frame_payload = op.payload().clone();
        let token = self.table.register(op)?;

        let frame = RequestFrame::with_raw_kind(token, kind, frame_payload);
        if let Err(e) = self.outbox.send(frame) {
            self.table.forget(token);
            return Err(e);
        }

        tracing::debug!(volume = %self.identity, token, kind, "operation submitted");
        Ok(Submission::new(token, rx, self.table.clone(), Some(permit)))
    }

    /// Cancel a pending operation. Its caller resumes with `CANCELLED`.
    ///
    /// Returns `false` if the token is not pending (already answered,
    /// cancelled or never issued).
    pub fn cancel(&self, token: u64) -> bool {
        let cancelled = self.table.cancel(token);
        if cancelled {
            // Lets the loop drop the frame if it is still queued.
            self.outbox.wake();
        }
        cancelled
    }

    /// Route `operation` through the dispatch registry with this volume as
    /// target.
    pub async fn perform(self: &Arc<Self>, operation: Operation) -> DispatchOutcome {
        self.registry
            .dispatch(Target::Volume(self.clone()), operation)
            .await
    }

    fn ensure_accepting(&self) -> Result<()> {
        let state = self.state();
        if state.accepts_operations() {
            Ok(())
        } else {
            Err(FsvirtError::VolumeNotActive {
                identity: self.identity.to_string(),
                state: state.as_str(),
            })
        }
    }

    pub(crate) fn table(&self) -> &Arc<CorrelationTable> {
        &self.table
    }

    pub(crate) fn registry(&self) -> &Arc<DispatchRegistry> {
        &self.registry
    }

    /// Move from `from` to `to` if the volume is still in `from`.
    pub(crate) fn transition(&self, from: VolumeState, to: VolumeState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Enter `Deleting` from `Created` or `Active`. Returns `false` if
    /// another caller already started teardown.
    pub(crate) fn begin_teardown(&self) -> bool {
        loop {
            let current = self.state();
            if !current.accepts_operations() {
                return false;
            }
            if self.transition(current, VolumeState::Deleting) {
                return true;
            }
        }
    }

    pub(crate) fn set_state(&self, state: VolumeState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn attach_exchange_task(&self, task: JoinHandle<Box<dyn Channel>>) {
        *self.exchange_task.lock() = Some(task);
    }

    /// Wake the exchange loop, wait for it to exit and take back the channel.
    ///
    /// Call after the state has left `Active`, otherwise the loop keeps
    /// running. A loop that does not exit within the teardown timeout
    /// (blocked in channel I/O) is aborted; its channel is dropped with it,
    /// which closes the underlying stream, and `None` is returned.
    pub(crate) async fn stop_exchange_loop(&self) -> Option<Box<dyn Channel>> {
        let mut task = self.exchange_task.lock().take()?;
        self.outbox.wake();

        let stopped = tokio::time::timeout(self.config.teardown_timeout, &mut task).await;
        let joined = match stopped {
            Ok(joined) => joined,
            Err(_elapsed) => {
                tracing::warn!(
                    volume = %self.identity,
                    timeout_ms = self.config.teardown_timeout.as_millis() as u64,
                    "exchange loop stuck in channel I/O, aborting"
                );
                task.abort();
                task.await
            }
        };

        match joined {
            Ok(channel) => Some(channel),
            Err(e) if e.is_cancelled() => None,
            Err(e) => {
                tracing::error!(volume = %self.identity, error = %e, "exchange loop panicked");
                None
            }
        }
    }

    /// Fail every waiting and future admission with `Unavailable`.
    pub(crate) fn close_admission(&self) {
        self.admission.close();
    }
}

impl fmt::Debug for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volume")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .field("pending", &self.table.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::Completion;
    use crate::status::Status;

    fn volume_with(config: ChannelConfig) -> (Arc<Volume>, Outbox) {
        Volume::new(
            "V1",
            Bytes::from_static(b"sd"),
            config,
            Arc::new(DispatchRegistry::standard()),
        )
    }

    #[test]
    fn test_state_machine_transitions() {
        let (volume, _outbox) = volume_with(ChannelConfig::default());
        assert_eq!(volume.state(), VolumeState::Created);

        assert!(volume.transition(VolumeState::Created, VolumeState::Active));
        assert!(!volume.transition(VolumeState::Created, VolumeState::Active));
        assert_eq!(volume.state(), VolumeState::Active);

        assert!(volume.begin_teardown());
        assert_eq!(volume.state(), VolumeState::Deleting);
        assert!(!volume.begin_teardown());

        volume.set_state(VolumeState::Deleted);
        assert!(!volume.begin_teardown());
        assert!(!volume.state().accepts_operations());
    }

    #[tokio::test]
    async fn test_submit_queues_frame_and_registers_token() {
        let (volume, mut outbox) = volume_with(ChannelConfig::default());

        let submission = volume
            .submit(OperationKind::Read, Bytes::from_static(b"abc"))
            .await
            .unwrap();

        assert_eq!(submission.token(), 1);
        assert_eq!(volume.pending_operations(), 1);
        assert!(volume.oldest_pending().is_some());

        let batch = outbox.assemble(4096, |t| volume.table().contains(t));
        assert_eq!(batch.frames, 1);
    }

    #[tokio::test]
    async fn test_dropped_submission_leaves_table() {
        let (volume, _outbox) = volume_with(ChannelConfig::default());

        let submission = volume.submit(OperationKind::Write, Bytes::new()).await.unwrap();
        assert_eq!(volume.pending_operations(), 1);

        drop(submission);
        assert_eq!(volume.pending_operations(), 0);
    }

    #[tokio::test]
    async fn test_cancel_resumes_caller() {
        let (volume, _outbox) = volume_with(ChannelConfig::default());

        let submission = volume.submit(OperationKind::Read, Bytes::new()).await.unwrap();
        assert!(volume.cancel(submission.token()));
        assert!(!volume.cancel(submission.token()));

        assert_eq!(submission.await, Completion::cancelled());
    }

    #[tokio::test]
    async fn test_admission_times_out() {
        let config = ChannelConfig {
            max_pending_operations: 1,
            backpressure_timeout: Duration::from_millis(20),
            ..ChannelConfig::default()
        };
        let (volume, _outbox) = volume_with(config);

        let _held = volume.submit(OperationKind::Read, Bytes::new()).await.unwrap();
        let result = volume.submit(OperationKind::Read, Bytes::new()).await;

        assert!(matches!(result, Err(FsvirtError::BackpressureTimeout)));
    }

    #[tokio::test]
    async fn test_admission_slot_released_on_completion() {
        let config = ChannelConfig {
            max_pending_operations: 1,
            backpressure_timeout: Duration::from_millis(20),
            ..ChannelConfig::default()
        };
        let (volume, _outbox) = volume_with(config);

        let first = volume.submit(OperationKind::Read, Bytes::new()).await.unwrap();
        let op = volume.table().take(first.token()).unwrap();
        op.complete(Completion::from_status(Status::SUCCESS));
        assert!(first.await.is_success());

        assert!(volume.submit(OperationKind::Read, Bytes::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_submit_rejected_when_not_accepting() {
        let (volume, _outbox) = volume_with(ChannelConfig::default());
        volume.set_state(VolumeState::Deleted);

        let result = volume.submit(OperationKind::Read, Bytes::new()).await;
        assert!(matches!(
            result,
            Err(FsvirtError::VolumeNotActive { state: "deleted", .. })
        ));
    }

    #[tokio::test]
    async fn test_closed_admission_is_unavailable() {
        let (volume, _outbox) = volume_with(ChannelConfig::default());
        volume.close_admission();

        let result = volume.submit(OperationKind::Read, Bytes::new()).await;
        assert!(matches!(result, Err(FsvirtError::Unavailable)));
    }

    #[tokio::test]
    async fn test_submit_after_loop_gone_fails_cleanly() {
        let (volume, outbox) = volume_with(ChannelConfig::default());
        drop(outbox);

        let result = volume.submit(OperationKind::Read, Bytes::new()).await;
        assert!(matches!(result, Err(FsvirtError::ChannelClosed)));
        assert_eq!(volume.pending_operations(), 0);
    }
}
