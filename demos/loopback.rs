//! Loopback demo: one host, one in-process provider.
//!
//! Creates a volume, forwards a few operations to a provider task that
//! answers reads with a fixed payload, then deletes the volume.
//!
//! Run with: `RUST_LOG=debug cargo run --example loopback`

use bytes::Bytes;
use fsvirt::protocol::ResponseFrame;
use fsvirt::transport::LoopbackProvisioner;
use fsvirt::{OperationKind, Status, VolumeManager};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const CONTENT: &[u8] = b"hello from the provider\n";

fn answer(request: fsvirt::protocol::RequestFrame) -> ResponseFrame {
    match request.operation() {
        Some(OperationKind::Read) => ResponseFrame::answering(
            &request,
            Status::SUCCESS,
            CONTENT.len() as u64,
            Bytes::from_static(CONTENT),
        ),
        Some(OperationKind::Write) => ResponseFrame::answering(
            &request,
            Status::SUCCESS,
            request.payload.len() as u64,
            Bytes::new(),
        ),
        _ => ResponseFrame::answering(&request, Status::INVALID_DEVICE_REQUEST, 0, Bytes::new()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (provisioner, mut endpoints) = LoopbackProvisioner::new();
    let manager = VolumeManager::builder()
        .max_pending_operations(64)
        .provisioner(provisioner)
        .build()?;

    let max_response_bytes = manager.config().max_response_bytes;
    tokio::spawn(async move {
        while let Some((identity, endpoint)) = endpoints.recv().await {
            tracing::info!(volume = %identity, "provider attached");
            tokio::spawn(endpoint.serve(max_response_bytes, answer));
        }
    });

    let volume = manager.create("demo", Vec::new()).await?;

    let read = volume.submit(OperationKind::Read, Bytes::new()).await?.await;
    tracing::info!(status = %read.status, bytes = read.information, "read");
    eprint!("{}", String::from_utf8_lossy(&read.payload));

    let write = volume
        .submit(OperationKind::Write, Bytes::from_static(b"some data"))
        .await?
        .await;
    tracing::info!(status = %write.status, bytes = write.information, "write");

    let ioctl = volume.submit(OperationKind::DeviceControl, Bytes::new()).await?.await;
    tracing::info!(status = %ioctl.status, "device control");

    manager.delete(&volume).await?;
    Ok(())
}
