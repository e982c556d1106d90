//! Integration tests for fsvirt.
//!
//! These tests drive volumes end to end: manager, dispatch, exchange loop
//! and an in-process (or pipe) provider.

use std::sync::Arc;

use bytes::Bytes;
use fsvirt::codec::MsgPackCodec;
use fsvirt::dispatch::CreateVolumeParams;
use fsvirt::protocol::{FrameReader, FrameWriter, RequestFrame, ResponseFrame};
use fsvirt::transport::{LoopbackProvisioner, ProviderEndpoint};
use fsvirt::{
    DeviceKind, DispatchOutcome, DispatchRegistry, FsvirtError, Operation, OperationKind, Status,
    VolumeManager, VolumeState,
};
use tokio::sync::mpsc;

fn echo(request: RequestFrame) -> ResponseFrame {
    let len = request.payload.len() as u64;
    ResponseFrame::answering(&request, Status::SUCCESS, len, request.payload.clone())
}

/// Manager whose providers answer every request with `echo`.
fn serving_manager() -> VolumeManager {
    let (provisioner, mut endpoints) = LoopbackProvisioner::new();
    tokio::spawn(async move {
        while let Some((_identity, endpoint)) = endpoints.recv().await {
            tokio::spawn(endpoint.serve(64 * 1024, echo));
        }
    });
    VolumeManager::builder().provisioner(provisioner).build().unwrap()
}

/// Manager whose provider endpoints the test drives by hand.
fn manual_manager() -> (VolumeManager, mpsc::UnboundedReceiver<(String, ProviderEndpoint)>) {
    let (provisioner, endpoints) = LoopbackProvisioner::new();
    let manager = VolumeManager::builder().provisioner(provisioner).build().unwrap();
    (manager, endpoints)
}

fn response_batch(responses: &[ResponseFrame]) -> Vec<u8> {
    let mut writer = FrameWriter::new(64 * 1024);
    for response in responses {
        assert!(writer.push(response));
    }
    writer.finish().to_vec()
}

/// Create V1, submit, provider answers OK, caller resumes, table empty.
#[tokio::test]
async fn test_submit_round_trip_leaves_table_empty() {
    let manager = serving_manager();
    let volume = manager.create("V1", Vec::new()).await.unwrap();

    let submission = volume
        .submit(OperationKind::Read, Bytes::from_static(b"offset=0"))
        .await
        .unwrap();
    assert_eq!(volume.pending_operations(), 1);

    let completion = submission.await;
    assert_eq!(completion.status, Status::SUCCESS);
    assert_eq!(completion.payload.as_ref(), b"offset=0");
    assert_eq!(volume.pending_operations(), 0);
}

/// Operations routed through dispatch reach the provider.
#[tokio::test]
async fn test_perform_forwards_to_provider() {
    let manager = serving_manager();
    let volume = manager.create("V1", Vec::new()).await.unwrap();

    let outcome = volume
        .perform(Operation::new(OperationKind::Write, Bytes::from_static(b"data")))
        .await;

    match outcome {
        DispatchOutcome::Handled(completion) => {
            assert!(completion.is_success());
            assert_eq!(completion.information, 4);
        }
        other => panic!("expected Handled, got {:?}", other),
    }
}

/// Create X twice: the second fails and open returns the first.
#[tokio::test]
async fn test_create_twice_then_open() {
    let manager = serving_manager();
    let first = manager.create("X", Vec::new()).await.unwrap();

    let second = manager.create("X", Vec::new()).await;
    assert!(matches!(second, Err(FsvirtError::VolumeExists(ref id)) if id == "X"));

    let opened = manager.open("X").unwrap();
    assert!(Arc::ptr_eq(&first, &opened));
    assert_eq!(opened.state(), VolumeState::Active);
}

/// Unregistered kind on an active volume: Unsupported, volume unaffected.
#[tokio::test]
async fn test_unregistered_kind_is_unsupported() {
    let registry = DispatchRegistry::builder()
        .forward(OperationKind::Read)
        .build();
    let (provisioner, _endpoints) = LoopbackProvisioner::new();
    let manager = VolumeManager::builder()
        .provisioner(provisioner)
        .registry(registry)
        .build()
        .unwrap();
    let volume = manager.create("V1", Vec::new()).await.unwrap();

    let outcome = volume
        .perform(Operation::new(OperationKind::SetSecurity, Bytes::new()))
        .await;
    assert_eq!(outcome, DispatchOutcome::Unsupported);
    assert_eq!(outcome.status(), Status::INVALID_DEVICE_REQUEST);

    let unknown = volume.perform(Operation::with_raw_kind(0xEE, Bytes::new())).await;
    assert_eq!(unknown, DispatchOutcome::Unsupported);

    assert_eq!(volume.state(), VolumeState::Active);
    assert_eq!(volume.pending_operations(), 0);
}

/// A registry without control handlers leaves the control device unsupported.
#[tokio::test]
async fn test_control_without_handlers_is_unsupported() {
    let (provisioner, _endpoints) = LoopbackProvisioner::new();
    let manager = VolumeManager::builder()
        .provisioner(provisioner)
        .registry(DispatchRegistry::builder().forward_all().build())
        .build()
        .unwrap();

    assert!(manager
        .registry()
        .handler_set(DeviceKind::Control)
        .is_none());
    let outcome = manager
        .control(Operation::new(OperationKind::FileSystemControl, Bytes::new()))
        .await;
    assert_eq!(outcome, DispatchOutcome::Unsupported);
}

/// Deleting with N pending resumes N callers with CANCELLED.
#[tokio::test]
async fn test_delete_with_pending_operations() {
    let (manager, mut endpoints) = manual_manager();
    let volume = manager.create("V1", Vec::new()).await.unwrap();
    let (_identity, mut endpoint) = endpoints.recv().await.unwrap();

    const N: usize = 8;
    let mut submissions = Vec::with_capacity(N);
    for i in 0..N {
        submissions.push(
            volume
                .submit(OperationKind::Read, vec![i as u8])
                .await
                .unwrap(),
        );
    }

    // The provider receives the requests but never answers.
    let received = endpoint.recv().await.unwrap();
    assert!(FrameReader::<RequestFrame>::new(received).count() >= 1);

    manager.delete(&volume).await.unwrap();

    for submission in submissions {
        assert_eq!(submission.await.status, Status::CANCELLED);
    }
    assert_eq!(volume.pending_operations(), 0);
    assert_eq!(volume.state(), VolumeState::Deleted);
}

/// Delete twice: the second call is a no-op success.
#[tokio::test]
async fn test_delete_is_idempotent() {
    let manager = serving_manager();
    let volume = manager.create("V1", Vec::new()).await.unwrap();

    manager.delete(&volume).await.unwrap();
    manager.delete(&volume).await.unwrap();

    assert_eq!(volume.state(), VolumeState::Deleted);
    assert!(matches!(
        manager.open("V1"),
        Err(FsvirtError::VolumeNotFound(_))
    ));
}

/// Operations on a deleted volume are rejected.
#[tokio::test]
async fn test_operations_after_delete_are_rejected() {
    let manager = serving_manager();
    let volume = manager.create("V1", Vec::new()).await.unwrap();
    manager.delete(&volume).await.unwrap();

    let outcome = volume
        .perform(Operation::new(OperationKind::Read, Bytes::new()))
        .await;
    assert_eq!(outcome, DispatchOutcome::Rejected);
    assert_eq!(outcome.into_completion().status, Status::VOLUME_DISMOUNTED);

    assert!(matches!(
        volume.submit(OperationKind::Read, Bytes::new()).await,
        Err(FsvirtError::VolumeNotActive { .. })
    ));
}

/// Two well-formed frames followed by 3 stray bytes yield exactly two frames.
#[test]
fn test_two_frames_and_stray_bytes() {
    let mut data = response_batch(&[
        ResponseFrame::new(1, 4, Status::SUCCESS, 0, Bytes::from_static(b"a")),
        ResponseFrame::new(2, 4, Status::SUCCESS, 0, Bytes::from_static(b"bc")),
    ]);
    data.extend_from_slice(&[0xFF, 0x00, 0x01]);

    let mut reader = FrameReader::<ResponseFrame>::new(Bytes::from(data));
    let tokens: Vec<u64> = reader.by_ref().map(|f| f.token).collect();

    assert_eq!(tokens, vec![1, 2]);
    assert!(!reader.is_exhausted());
    assert_eq!(reader.trailing(), 3);
}

/// Responses are matched by token, not by order; junk does not disturb them.
#[tokio::test]
async fn test_out_of_order_responses_with_junk() {
    let (manager, mut endpoints) = manual_manager();
    let volume = manager.create("V1", Vec::new()).await.unwrap();
    let (_identity, mut endpoint) = endpoints.recv().await.unwrap();

    let first = volume.submit(OperationKind::Read, vec![1u8]).await.unwrap();
    let second = volume.submit(OperationKind::Write, vec![2u8]).await.unwrap();

    let mut requests = Vec::new();
    while requests.len() < 2 {
        let batch = endpoint.recv().await.unwrap();
        requests.extend(FrameReader::<RequestFrame>::new(batch));
    }

    // Answer in reverse, with an unknown token in between and stray bytes after.
    let mut responses: Vec<ResponseFrame> = requests
        .iter()
        .rev()
        .map(|r| {
            let status = Status(0x4000_0000 | r.payload[0] as u32);
            ResponseFrame::answering(r, status, 0, Bytes::new())
        })
        .collect();
    responses.insert(1, ResponseFrame::new(999, 4, Status::SUCCESS, 0, Bytes::new()));
    let mut batch = response_batch(&responses);
    batch.extend_from_slice(&[1, 2, 3]);
    endpoint.send(Bytes::from(batch)).unwrap();

    assert_eq!(first.await.status, Status(0x4000_0001));
    assert_eq!(second.await.status, Status(0x4000_0002));
    assert_eq!(volume.pending_operations(), 0);
    assert_eq!(volume.state(), VolumeState::Active);
}

/// Volume creation through the control device with MsgPack parameters.
#[tokio::test]
async fn test_control_create_volume() {
    let manager = serving_manager();
    let params = CreateVolumeParams {
        identity: "C1".to_string(),
        security_descriptor: vec![1, 2, 3],
    };
    let payload = MsgPackCodec::encode_payload(&params).unwrap();

    let outcome = manager
        .control(Operation::new(OperationKind::FileSystemControl, payload.clone()))
        .await;
    let completion = outcome.into_completion();
    assert!(completion.is_success());
    assert_eq!(completion.payload.as_ref(), b"C1");

    let volume = manager.open("C1").unwrap();
    assert_eq!(volume.security_descriptor().as_ref(), &[1, 2, 3]);

    let again = manager
        .control(Operation::new(OperationKind::FileSystemControl, payload))
        .await;
    assert_eq!(again.status(), Status::OBJECT_NAME_COLLISION);

    let garbage = manager
        .control(Operation::new(
            OperationKind::FileSystemControl,
            Bytes::from_static(&[0xC1]),
        ))
        .await;
    assert_eq!(garbage.status(), Status::INVALID_PARAMETER);
}

/// After shutdown the control device rejects everything.
#[tokio::test]
async fn test_control_rejected_after_shutdown() {
    let manager = serving_manager();
    manager.create("V1", Vec::new()).await.unwrap();

    manager.shutdown().await;

    let payload = MsgPackCodec::encode_payload(&CreateVolumeParams {
        identity: "V2".to_string(),
        security_descriptor: Vec::new(),
    })
    .unwrap();
    let outcome = manager
        .control(Operation::new(OperationKind::FileSystemControl, payload))
        .await;
    assert_eq!(outcome, DispatchOutcome::Rejected);
    assert!(manager.list().is_empty());
}

/// Volumes are independent: deleting one leaves the other serving.
#[tokio::test]
async fn test_volumes_are_independent() {
    let manager = serving_manager();
    let a = manager.create("A", Vec::new()).await.unwrap();
    let b = manager.create("B", Vec::new()).await.unwrap();

    manager.delete(&a).await.unwrap();

    let completion = b
        .submit(OperationKind::QueryInformation, Bytes::from_static(b"q"))
        .await
        .unwrap()
        .await;
    assert!(completion.is_success());
    assert_eq!(manager.list(), vec!["B".to_string()]);
}

/// End to end over a Unix socket: announcement, connect, exchange, delete.
#[cfg(unix)]
#[tokio::test]
async fn test_pipe_channel_end_to_end() {
    use fsvirt::control::Announcement;
    use fsvirt::provider::ProviderSession;
    use fsvirt::transport::{BatchStream, PipeProvisioner, PipeStream};

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    let provisioner = PipeProvisioner::with_announcer(move |line| {
        line_tx
            .send(line.to_string())
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "test gone"))
    });
    let manager = VolumeManager::builder().provisioner(provisioner).build().unwrap();

    let creator = manager.clone();
    let create = tokio::spawn(async move { creator.create("P1", Vec::new()).await });

    let announcement = Announcement::parse(&line_rx.recv().await.unwrap()).unwrap();
    assert_eq!(announcement.volume, "P1");

    let stream = PipeStream::connect(&announcement.pipe).await.unwrap();
    let mut provider = BatchStream::new(stream, announcement.max_request_bytes);
    let max_response_bytes = announcement.max_response_bytes;
    let provider_task = tokio::spawn(async move {
        let mut session = ProviderSession::new(max_response_bytes);
        let mut served = 0usize;
        while let Some(batch) = provider.read_batch().await.unwrap() {
            for out in session.handle_batch(batch, |request| {
                served += 1;
                echo(request)
            }) {
                provider.write_batch(&out).await.unwrap();
            }
        }
        served
    });

    let volume = create.await.unwrap().unwrap();
    let completion = volume
        .submit(OperationKind::Read, Bytes::from_static(b"over the pipe"))
        .await
        .unwrap()
        .await;
    assert!(completion.is_success());
    assert_eq!(completion.payload.as_ref(), b"over the pipe");

    manager.delete(&volume).await.unwrap();
    assert_eq!(provider_task.await.unwrap(), 1);
}
