//! Handlers every registry can install.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::registry::{BoxFuture, Handler};
use super::{Operation, Target};
use crate::correlation::Completion;
use crate::status::Status;

/// Sends the operation to the volume's provider and waits for its answer.
///
/// Only meaningful on volume targets; anything else is reported as an
/// unsupported request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardToProvider;

impl Handler for ForwardToProvider {
    fn call(&self, target: Target, operation: Operation) -> BoxFuture<'static, Completion> {
        Box::pin(async move {
            let Target::Volume(volume) = target else {
                return Completion::from_status(Status::INVALID_DEVICE_REQUEST);
            };
            match volume.submit_raw(operation.kind, operation.payload).await {
                Ok(submission) => submission.await,
                Err(e) => {
                    tracing::debug!(
                        volume = volume.identity(),
                        kind = operation.kind,
                        error = %e,
                        "operation not forwarded"
                    );
                    Completion::from(&e)
                }
            }
        })
    }
}

/// Payload of a volume-creation request on the control device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVolumeParams {
    /// Identity of the new volume.
    pub identity: String,
    /// Opaque security descriptor stored with the volume.
    #[serde(default)]
    pub security_descriptor: Vec<u8>,
}

/// Control-device handler: create the volume described by `params`.
///
/// Answers `SUCCESS` with the volume identity as payload.
pub async fn create_volume(target: Target, params: CreateVolumeParams) -> Completion {
    let Target::Control(manager) = target else {
        return Completion::from_status(Status::INVALID_DEVICE_REQUEST);
    };
    match manager
        .create(&params.identity, Bytes::from(params.security_descriptor))
        .await
    {
        Ok(volume) => Completion::new(
            Status::SUCCESS,
            0,
            Bytes::copy_from_slice(volume.identity().as_bytes()),
        ),
        Err(e) => {
            tracing::warn!(volume = %params.identity, error = %e, "volume creation failed");
            Completion::from(&e)
        }
    }
}
