//! Session registry tests: one active session per kind, previous ones torn down first.

mod common;

use bytes::Bytes;
use common::{GatedTransport, LoopbackConnector, ScriptedTransport, chat_url, endpoints, image};
use playground_client::api::SessionRegistry;
use playground_client::core::chat::{ConnectionState, Origin, SendRejected};
use playground_client::core::session::SessionState;
use playground_client::core::upload::UploadStatus;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_new_upload_supersedes_running_one() {
    let transport = Arc::new(GatedTransport::new());
    let (connector, _remotes) = LoopbackConnector::new();
    let mut registry = SessionRegistry::new(
        endpoints(),
        chat_url(),
        transport.clone(),
        Arc::new(connector),
    );

    let first = registry.start_upload(image(100), "ocr");
    let first_id = first.id();
    let mut first_updates = first.subscribe();
    first_updates
        .wait_for(|snapshot| snapshot.progress == 25)
        .await
        .unwrap();

    let second_id = registry.start_upload(image(100), "face recognition").id();
    assert_ne!(first_id, second_id);
    assert_eq!(
        registry.upload_snapshot().unwrap().status,
        UploadStatus::Uploading
    );

    let first_final = first_updates
        .wait_for(|snapshot| snapshot.status.is_terminal())
        .await
        .unwrap()
        .clone();
    assert_eq!(first_final.status, UploadStatus::Cancelled);
    assert_eq!(transport.aborted(), 1);

    // releasing the gate only lets the surviving transfer finish
    transport.release();
    let second_final = registry.upload().unwrap().settled().await;
    assert_eq!(second_final.session, second_id);
    assert_eq!(second_final.status, UploadStatus::Succeeded);
    assert_eq!(second_final.result.as_deref(), Some(&b"late result"[..]));

    assert_eq!(first_updates.borrow().status, UploadStatus::Cancelled);
    assert!(first_updates.borrow().result.is_none());
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_cancel_upload_through_registry() {
    let transport = Arc::new(GatedTransport::new());
    let (connector, _remotes) = LoopbackConnector::new();
    let mut registry =
        SessionRegistry::new(endpoints(), chat_url(), transport, Arc::new(connector));

    // nothing to cancel yet
    registry.cancel_upload();
    assert!(registry.upload_snapshot().is_none());

    registry.start_upload(image(100), "ocr");
    registry.cancel_upload();

    let snapshot = registry.upload().unwrap().settled().await;
    assert_eq!(snapshot.status, UploadStatus::Cancelled);
}

#[tokio::test]
async fn test_upload_result_replaced_by_next_session() {
    let transport = Arc::new(ScriptedTransport::new(
        vec![(1, 2), (2, 2)],
        Ok(Bytes::from_static(b"result")),
    ));
    let (connector, _remotes) = LoopbackConnector::new();
    let mut registry =
        SessionRegistry::new(endpoints(), chat_url(), transport, Arc::new(connector));

    registry.start_upload(image(2), "ocr").settled().await;
    assert!(registry.upload_snapshot().unwrap().result.is_some());

    registry.start_upload(image(2), "unknown-demo");
    let snapshot = registry.upload_snapshot().unwrap();
    assert_eq!(snapshot.status, UploadStatus::Failed);
    assert!(snapshot.result.is_none());
    assert_eq!(snapshot.error.unwrap().kind(), "unsupported_demo");
}

#[tokio::test]
async fn test_reopening_chat_closes_previous_one() {
    let (connector, mut remotes) = LoopbackConnector::new();
    let mut registry = SessionRegistry::new(
        endpoints(),
        chat_url(),
        Arc::new(GatedTransport::new()),
        Arc::new(connector),
    );

    assert_eq!(registry.send_chat("hi").await, Err(SendRejected::NotOpen));

    registry.open_chat().ready().await;
    let first_remote = remotes.recv().await.unwrap();

    registry.open_chat().ready().await;
    let mut second_remote = remotes.recv().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), first_remote.shutdown.cancelled())
        .await
        .expect("first channel should be shut down");

    registry.send_chat("hi").await.unwrap();
    assert_eq!(second_remote.received.recv().await.as_deref(), Some("hi"));

    let snapshot = registry.chat_snapshot().unwrap();
    assert_eq!(snapshot.state, ConnectionState::Open);
    assert_eq!(snapshot.transcript.len(), 2);
    assert_eq!(snapshot.transcript[1].origin, Origin::Local);

    registry.close_chat();
    let snapshot = registry.chat().unwrap().closed().await;
    assert_eq!(snapshot.state, ConnectionState::Closed);
    assert_eq!(registry.send_chat("again").await, Err(SendRejected::Closed));
}
