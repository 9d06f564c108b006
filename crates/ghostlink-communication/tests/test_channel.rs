//! Command channel correlation and chunked uploads

mod common;

use common::{endpoint, options, RecordingObserver};
use ghostlink_communication::protocol::upload;
use ghostlink_communication::{
    ChannelPolicy, CommandChannel, LoopbackConnector, UploadJob, WireMessage,
};
use ghostlink_core::{Error, ProtocolError};
use serde_json::json;
use std::sync::Arc;

fn channel(policy: ChannelPolicy) -> (CommandChannel, Arc<LoopbackConnector>) {
    let connector = Arc::new(LoopbackConnector::new());
    let channel = CommandChannel::open(
        endpoint("3dprint-slicing"),
        connector.clone(),
        options(false),
        policy,
    )
    .unwrap();
    (channel, connector)
}

#[tokio::test]
async fn test_replaced_invocation_receives_earlier_response() {
    let (channel, connector) = channel(ChannelPolicy::Replace);
    let mut peer = connector.accept().await.unwrap();

    let mut first = channel.invoke("get_path").unwrap();
    let mut second = channel.invoke("position").unwrap();
    assert_eq!(peer.recv_text().await.as_deref(), Some("get_path"));
    assert_eq!(peer.recv_text().await.as_deref(), Some("position"));

    // answer to get_path arrives while position holds the slot
    peer.send_json(json!({"status": "ok", "path": "/tmp/out"}));

    assert!(matches!(
        first.next().await,
        Err(Error::Protocol(ProtocolError::Preempted))
    ));
    let frame = second.next_status().await.unwrap();
    assert_eq!(frame.str_field("path"), Some("/tmp/out"));
}

#[tokio::test]
async fn test_exclusive_channel_refuses_second_invoke() {
    let (channel, connector) = channel(ChannelPolicy::Exclusive);
    let mut peer = connector.accept().await.unwrap();

    let first = channel.invoke("get_path").unwrap();
    assert!(channel.is_busy());
    match channel.invoke("position") {
        Err(Error::Protocol(ProtocolError::ChannelBusy { pending })) => {
            assert_eq!(pending, "get_path")
        }
        other => panic!("expected busy, got {:?}", other.map(|_| ())),
    }
    assert_eq!(peer.recv_text().await.as_deref(), Some("get_path"));
    assert_eq!(peer.try_recv(), None);

    drop(first);
    assert!(!channel.is_busy());
    let _second = channel.invoke("position").unwrap();
    assert_eq!(peer.recv_text().await.as_deref(), Some("position"));
}

#[tokio::test]
async fn test_error_reply_rejects_and_keeps_connection() {
    let (channel, connector) = channel(ChannelPolicy::Exclusive);
    let mut peer = connector.accept().await.unwrap();

    let mut responses = channel.invoke("set_params bogus 1").unwrap();
    peer.recv_text().await.unwrap();
    peer.send_json(json!({"status": "error", "error": "UNKNOWN_PARAM"}));
    let err = responses.next().await.unwrap_err();
    assert_eq!(err.status_frame().str_field("error"), Some("UNKNOWN_PARAM"));
    drop(responses);

    let mut responses = channel.invoke("get_path").unwrap();
    peer.recv_text().await.unwrap();
    peer.send_json(json!({"status": "ok"}));
    assert!(responses.next().await.unwrap().is_status("ok"));
    assert!(channel.transport().state().is_open());
}

#[tokio::test]
async fn test_binary_frames_are_routed() {
    let (channel, connector) = channel(ChannelPolicy::Exclusive);
    let mut peer = connector.accept().await.unwrap();

    let responses = channel.invoke("fileinfo /SD/a.fc").unwrap();
    peer.recv_text().await.unwrap();
    peer.send_json(json!({"status": "info", "size": 10}));
    peer.send_binary(vec![9; 16]);
    peer.send_json(json!({"status": "ok"}));

    let collected = responses.collect_until(&["ok"]).await.unwrap();
    assert_eq!(collected.frames.len(), 1);
    assert_eq!(collected.binary, vec![vec![9; 16]]);
    assert!(collected.terminal.is("ok"));
}

#[tokio::test]
async fn test_upload_sends_three_chunks_then_resolves() {
    let (channel, connector) = channel(ChannelPolicy::Exclusive);
    let mut peer = connector.accept().await.unwrap();
    let observer = RecordingObserver::new();

    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let task = {
        let channel = channel.clone();
        let observer = observer.clone();
        let payload = payload.clone();
        tokio::spawn(async move {
            upload::upload(
                &channel,
                "upload model.stl 10000",
                UploadJob::chunked(&payload),
                observer.as_ref(),
            )
            .await
        })
    };

    assert_eq!(peer.recv_text().await.as_deref(), Some("upload model.stl 10000"));
    peer.send_json(json!({"status": "continue"}));

    let mut received = Vec::new();
    let mut sizes = Vec::new();
    for _ in 0..3 {
        match peer.recv().await.unwrap() {
            WireMessage::Binary(chunk) => {
                sizes.push(chunk.len());
                received.extend_from_slice(&chunk);
            }
            other => panic!("expected a chunk, got {}", other),
        }
    }
    assert_eq!(sizes, vec![4096, 4096, 1808]);
    assert_eq!(received, payload);

    let ok = json!({"status": "ok", "name": "model.stl"});
    peer.send_json(ok.clone());
    let result = task.await.unwrap().unwrap();
    assert_eq!(result.to_value(), ok);
    assert_eq!(observer.progress(), vec![(1, 3), (2, 3), (3, 3)]);
}

#[tokio::test]
async fn test_upload_error_propagates() {
    let (channel, connector) = channel(ChannelPolicy::Exclusive);
    let mut peer = connector.accept().await.unwrap();
    let observer = RecordingObserver::new();

    let task = {
        let channel = channel.clone();
        let observer = observer.clone();
        tokio::spawn(async move {
            let payload = vec![0u8; 100];
            upload::upload(
                &channel,
                "upload_image 100",
                UploadJob::single_shot(&payload),
                observer.as_ref(),
            )
            .await
        })
    };

    peer.recv_text().await.unwrap();
    peer.send_json(json!({"status": "error", "error": "TOO_LARGE"}));
    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_protocol_error());
    assert_eq!(peer.try_recv(), None);
    assert!(!channel.is_busy());
}

#[tokio::test]
async fn test_payload_follows_its_command() {
    let (channel, connector) = channel(ChannelPolicy::Exclusive);
    let mut peer = connector.accept().await.unwrap();

    let responses = channel
        .invoke_with_payload("upload_image 3", vec![7, 8, 9])
        .unwrap();
    assert_eq!(peer.recv_text().await.as_deref(), Some("upload_image 3"));
    assert_eq!(peer.recv().await, Some(WireMessage::Binary(vec![7, 8, 9])));
    assert_eq!(peer.try_recv(), None);

    peer.send_json(json!({"status": "ok"}));
    assert!(responses.answer().await.unwrap().is("ok"));
    assert!(!channel.is_busy());
}

#[tokio::test]
async fn test_answer_accepts_error_reply() {
    let (channel, connector) = channel(ChannelPolicy::Exclusive);
    let mut peer = connector.accept().await.unwrap();

    let responses = channel.invoke("play quit").unwrap();
    peer.recv_text().await.unwrap();
    peer.send_json(json!({"status": "error", "error": "NO_TASK"}));
    let frame = responses.answer().await.unwrap();
    assert!(frame.is("error"));
    assert_eq!(frame.str_field("error"), Some("NO_TASK"));

    let responses = channel.invoke("play quit").unwrap();
    peer.recv_text().await.unwrap();
    peer.send_binary(vec![1]);
    assert!(matches!(
        responses.answer().await,
        Err(Error::Protocol(ProtocolError::UnexpectedResponse { .. }))
    ));
}
