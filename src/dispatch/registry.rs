//! Handler registry keyed by device kind and operation kind.
//!
//! Handler sets are filled in by [`DispatchRegistryBuilder`] at startup and
//! never change afterwards, so dispatch needs no locking.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use serde::de::DeserializeOwned;

use super::builtin::{create_volume, ForwardToProvider};
use super::{DeviceKind, DispatchOutcome, Operation, Target};
use crate::codec::MsgPackCodec;
use crate::correlation::{Completion, PendingOperation};
use crate::protocol::OperationKind;
use crate::status::Status;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for operation handlers.
pub trait Handler: Send + Sync + 'static {
    /// Handle an operation addressed to `target`.
    fn call(&self, target: Target, operation: Operation) -> BoxFuture<'static, Completion>;
}

/// Adapts an async closure over the raw operation into a [`Handler`].
pub struct FnHandler<F, Fut>
where
    F: Fn(Target, Operation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Completion> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(Target, Operation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Completion> + Send + 'static,
{
    /// Wrap `handler`.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Handler for FnHandler<F, Fut>
where
    F: Fn(Target, Operation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Completion> + Send + 'static,
{
    fn call(&self, target: Target, operation: Operation) -> BoxFuture<'static, Completion> {
        Box::pin((self.handler)(target, operation))
    }
}

/// Wrapper that decodes a MsgPack payload before calling the handler.
///
/// A payload that does not decode completes with `INVALID_PARAMETER`
/// without reaching the handler.
pub struct TypedHandler<F, T, Fut>
where
    F: Fn(Target, T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = Completion> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> TypedHandler<F, T, Fut>
where
    F: Fn(Target, T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = Completion> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> Handler for TypedHandler<F, T, Fut>
where
    F: Fn(Target, T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = Completion> + Send + 'static,
{
    fn call(&self, target: Target, operation: Operation) -> BoxFuture<'static, Completion> {
        let parsed: T = match MsgPackCodec::decode(&operation.payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    target_name = target.name(),
                    kind = operation.kind,
                    error = %e,
                    "undecodable operation payload"
                );
                return Box::pin(async { Completion::from_status(Status::INVALID_PARAMETER) });
            }
        };

        Box::pin((self.handler)(target, parsed))
    }
}

/// Handlers for one device kind, by operation kind.
#[derive(Default)]
pub struct HandlerSet {
    handlers: HashMap<u8, Box<dyn Handler>>,
}

impl HandlerSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the handler for `kind`.
    pub fn insert(&mut self, kind: OperationKind, handler: Box<dyn Handler>) {
        self.handlers.insert(kind.as_u8(), handler);
    }

    /// Get the handler for a raw kind tag.
    pub fn get(&self, kind: u8) -> Option<&dyn Handler> {
        self.handlers.get(&kind).map(|h| h.as_ref())
    }

    /// Check whether a handler exists for a raw kind tag.
    pub fn contains(&self, kind: u8) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Number of handled kinds.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Routes operations to handlers and resumes callers.
pub struct DispatchRegistry {
    sets: HashMap<DeviceKind, HandlerSet>,
}

impl DispatchRegistry {
    /// Start building a registry.
    pub fn builder() -> DispatchRegistryBuilder {
        DispatchRegistryBuilder::new()
    }

    /// Registry that forwards every known operation kind on volumes to the
    /// provider and accepts volume creation on the control device.
    pub fn standard() -> Self {
        Self::builder().forward_all().control_create().build()
    }

    /// Handler set for a device kind.
    pub fn handler_set(&self, device: DeviceKind) -> Option<&HandlerSet> {
        self.sets.get(&device)
    }

    /// Route `operation` to the handler responsible for it.
    pub async fn dispatch(&self, target: Target, operation: Operation) -> DispatchOutcome {
        if !target.accepts_operations() {
            tracing::debug!(
                target_name = target.name(),
                kind = operation.kind,
                "operation rejected, target is shutting down"
            );
            return DispatchOutcome::Rejected;
        }

        let device = target.device_kind();
        let Some(handler) = self
            .sets
            .get(&device)
            .and_then(|set| set.get(operation.kind))
        else {
            tracing::debug!(
                target_name = target.name(),
                %device,
                kind = operation.kind,
                "unsupported operation"
            );
            return DispatchOutcome::Unsupported;
        };

        DispatchOutcome::Handled(handler.call(target, operation).await)
    }

    /// Resume the caller of `op` with `completion`.
    ///
    /// Returns `false` if the caller had already stopped waiting.
    pub fn complete(&self, op: PendingOperation, completion: Completion) -> bool {
        let token = op.token();
        let status = completion.status;
        let volume = op.identity();
        let resumed = op.complete(completion);
        if resumed {
            tracing::debug!(volume = %volume, token, %status, "operation completed");
        } else {
            tracing::debug!(volume = %volume, token, %status, "caller gone, completion dropped");
        }
        resumed
    }
}

impl Default for DispatchRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Fluent builder for [`DispatchRegistry`].
#[derive(Default)]
pub struct DispatchRegistryBuilder {
    sets: HashMap<DeviceKind, HandlerSet>,
}

impl DispatchRegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler.
    pub fn handle<H: Handler>(
        mut self,
        device: DeviceKind,
        kind: OperationKind,
        handler: H,
    ) -> Self {
        self.sets
            .entry(device)
            .or_default()
            .insert(kind, Box::new(handler));
        self
    }

    /// Register an async closure over the raw operation.
    pub fn handle_fn<F, Fut>(self, device: DeviceKind, kind: OperationKind, handler: F) -> Self
    where
        F: Fn(Target, Operation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Completion> + Send + 'static,
    {
        self.handle(device, kind, FnHandler::new(handler))
    }

    /// Register an async closure over a MsgPack-decoded payload.
    pub fn handle_typed<F, T, Fut>(
        self,
        device: DeviceKind,
        kind: OperationKind,
        handler: F,
    ) -> Self
    where
        F: Fn(Target, T) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = Completion> + Send + 'static,
    {
        self.handle(device, kind, TypedHandler::new(handler))
    }

    /// Forward `kind` on volumes to the provider.
    pub fn forward(self, kind: OperationKind) -> Self {
        self.handle(DeviceKind::Volume, kind, ForwardToProvider)
    }

    /// Forward every known operation kind on volumes to the provider.
    pub fn forward_all(self) -> Self {
        OperationKind::ALL
            .iter()
            .fold(self, |builder, &kind| builder.forward(kind))
    }

    /// Accept `FileSystemControl` on the control device as volume creation.
    pub fn control_create(self) -> Self {
        self.handle_typed(
            DeviceKind::Control,
            OperationKind::FileSystemControl,
            create_volume,
        )
    }

    /// Finish building.
    pub fn build(self) -> DispatchRegistry {
        DispatchRegistry { sets: self.sets }
    }
}
