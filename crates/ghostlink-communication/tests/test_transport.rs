//! Transport lifecycle against an in-memory daemon

mod common;

use common::{endpoint, options, RecordingHandler, Seen};
use ghostlink_communication::communication::diagnostics::ABNORMAL_MARKER;
use ghostlink_communication::{LoopbackConnector, Transport, WireMessage};
use ghostlink_core::{CloseCode, ConnectionEvent, ConnectionState, Frame, StatusFrame};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_reconnects_after_abnormal_close_with_empty_history() {
    let connector = Arc::new(LoopbackConnector::new());
    let (handler, mut seen) = RecordingHandler::new();
    let transport =
        Transport::open(endpoint("3dprint-slicing"), connector.clone(), options(true), handler)
            .unwrap();
    let mut state = transport.watch_state();

    let peer = connector.accept().await.unwrap();
    assert_eq!(seen.recv().await, Some(Seen::Open));
    peer.send_json(json!({"status": "ok"}));
    assert!(matches!(seen.recv().await, Some(Seen::Message(_))));
    assert_eq!(transport.received_frames().len(), 1);

    peer.drop_abruptly();
    assert_eq!(seen.recv().await, Some(Seen::Close(CloseCode::ABNORMAL)));

    let _peer = connector.accept().await.unwrap();
    state.wait_for(|s| *s == ConnectionState::Open).await.unwrap();
    assert!(transport.received_frames().is_empty());
    assert_eq!(connector.attempts(), 2);
    assert_eq!(seen.recv().await, Some(Seen::Open));
}

#[tokio::test(start_paused = true)]
async fn test_fatal_stops_heartbeat_and_keeps_payload() {
    let connector = Arc::new(LoopbackConnector::new());
    let (handler, mut seen) = RecordingHandler::new();
    let transport =
        Transport::open(endpoint("control/abc"), connector.clone(), options(false), handler)
            .unwrap();
    let mut peer = connector.accept().await.unwrap();
    assert_eq!(seen.recv().await, Some(Seen::Open));

    let fatal = json!({"status": "fatal", "error": "KICKED", "info": {"by": "other client"}});
    peer.send_json(fatal.clone());
    match seen.recv().await {
        Some(Seen::Fatal(payload)) => assert_eq!(payload.to_value(), fatal),
        other => panic!("expected fatal, got {:?}", other),
    }

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(peer.try_recv(), None);
    assert!(!transport
        .diagnostics()
        .entries()
        .iter()
        .any(|e| e.contains("sent ping")));
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_pings_every_minute() {
    let connector = Arc::new(LoopbackConnector::new());
    let transport =
        Transport::open_detached(endpoint("3dprint-slicing"), connector.clone(), options(false))
            .unwrap();
    let mut peer = connector.accept().await.unwrap();

    assert_eq!(peer.recv().await, Some(WireMessage::from("ping")));
    assert!(transport
        .diagnostics()
        .entries()
        .iter()
        .any(|e| e.contains("sent ping")));

    // pong is swallowed but kept in the history
    peer.send_json(json!({"status": "pong"}));
    assert_eq!(peer.recv().await, Some(WireMessage::from("ping")));
    assert_eq!(
        transport.last_response(),
        Some(Frame::Status(StatusFrame::new("pong")))
    );
}

#[tokio::test(start_paused = true)]
async fn test_abnormal_close_on_old_connection_raises_alert() {
    let connector = Arc::new(LoopbackConnector::new());
    let transport =
        Transport::open_detached(endpoint("3dprint-slicing"), connector.clone(), options(false))
            .unwrap();
    let mut events = transport.subscribe();
    let peer = connector.accept().await.unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;
    peer.drop_abruptly();

    loop {
        match events.recv().await.unwrap() {
            ConnectionEvent::AbnormalDisconnect { ever_connected, .. } => {
                assert!(!ever_connected);
                break;
            }
            ConnectionEvent::Closed { .. } => panic!("closed without an alert"),
            _ => {}
        }
    }
    assert!(transport.diagnostics().export().contains(ABNORMAL_MARKER));
}

#[tokio::test]
async fn test_abnormal_close_on_young_connection_is_quiet() {
    let connector = Arc::new(LoopbackConnector::new());
    let transport =
        Transport::open_detached(endpoint("3dprint-slicing"), connector.clone(), options(false))
            .unwrap();
    let mut events = transport.subscribe();
    let peer = connector.accept().await.unwrap();
    peer.drop_abruptly();

    loop {
        match events.recv().await.unwrap() {
            ConnectionEvent::AbnormalDisconnect { .. } => panic!("alert on a young connection"),
            ConnectionEvent::Closed { code, .. } => {
                assert_eq!(code, CloseCode::ABNORMAL);
                break;
            }
            _ => {}
        }
    }
    assert!(!transport.diagnostics().export().contains(ABNORMAL_MARKER));
}

#[tokio::test]
async fn test_released_connection_reopens_on_send() {
    let connector = Arc::new(LoopbackConnector::new());
    let (handler, mut seen) = RecordingHandler::new();
    let transport =
        Transport::open(endpoint("usb-config"), connector.clone(), options(false), handler)
            .unwrap();
    let peer = connector.accept().await.unwrap();
    assert_eq!(seen.recv().await, Some(Seen::Open));

    peer.close(CloseCode::NORMAL);
    assert_eq!(seen.recv().await, Some(Seen::Close(CloseCode::NORMAL)));

    transport.send("list");
    let mut peer = connector.accept().await.unwrap();
    assert_eq!(peer.recv_text().await.as_deref(), Some("list"));
    assert_eq!(seen.recv().await, Some(Seen::Open));
}

#[tokio::test]
async fn test_close_without_reconnect_releases() {
    let connector = Arc::new(LoopbackConnector::new());
    let (handler, mut seen) = RecordingHandler::new();
    let transport =
        Transport::open(endpoint("3dprint-slicing"), connector.clone(), options(true), handler)
            .unwrap();
    let mut peer = connector.accept().await.unwrap();
    assert_eq!(seen.recv().await, Some(Seen::Open));

    transport.close(Some(false));
    assert_eq!(peer.recv().await, None);
    assert_eq!(seen.recv().await, Some(Seen::Close(CloseCode::NORMAL)));
    assert!(!transport.auto_reconnect());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(transport.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_error_frames_reach_the_error_handler() {
    let connector = Arc::new(LoopbackConnector::new());
    let (handler, mut seen) = RecordingHandler::new();
    let _transport =
        Transport::open(endpoint("3dprint-slicing"), connector.clone(), options(false), handler)
            .unwrap();
    let peer = connector.accept().await.unwrap();
    assert_eq!(seen.recv().await, Some(Seen::Open));

    peer.send_text(r#"{"status":"error","error":"BAD_PARAM","value":NaN}"#);
    match seen.recv().await {
        Some(Seen::Error(payload)) => {
            assert_eq!(payload.str_field("error"), Some("BAD_PARAM"));
            assert_eq!(payload.get("value"), Some(&serde_json::Value::Null));
        }
        other => panic!("expected error, got {:?}", other),
    }
}

fn count_alerts(events: &mut tokio::sync::broadcast::Receiver<ConnectionEvent>) -> usize {
    let mut alerts = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ConnectionEvent::AbnormalDisconnect { .. }) {
            alerts += 1;
        }
    }
    alerts
}

fn count_markers(transport: &Transport) -> usize {
    transport
        .diagnostics()
        .entries()
        .iter()
        .filter(|e| e.contains(ABNORMAL_MARKER))
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_dead_daemon_alerts_once_until_a_frame_arrives() {
    let connector = Arc::new(LoopbackConnector::new());
    let (handler, mut seen) = RecordingHandler::new();
    let transport =
        Transport::open(endpoint("3dprint-slicing"), connector.clone(), options(true), handler)
            .unwrap();
    let mut events = transport.subscribe();
    let peer = connector.accept().await.unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;
    connector.refuse_next(5);
    peer.drop_abruptly();

    let peer = connector.accept().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(connector.attempts(), 7);
    assert_eq!(count_alerts(&mut events), 1);
    assert_eq!(count_markers(&transport), 1);

    // a frame on the new socket re-arms the alert
    peer.send_json(json!({"status": "ok"}));
    while !matches!(seen.recv().await, Some(Seen::Message(_))) {}
    peer.drop_abruptly();

    let _peer = connector.accept().await.unwrap();
    assert_eq!(count_alerts(&mut events), 1);
    assert_eq!(count_markers(&transport), 2);
}

#[tokio::test(start_paused = true)]
async fn test_close_does_not_shorten_the_next_reconnect_delay() {
    let connector = Arc::new(LoopbackConnector::new());
    let options = ghostlink_communication::TransportOptions {
        reconnect_delay: Duration::from_secs(5),
        ..options(true)
    };
    let transport =
        Transport::open_detached(endpoint("3dprint-slicing"), connector.clone(), options)
            .unwrap();
    let _peer = connector.accept().await.unwrap();

    transport.close(None);
    let early = tokio::time::timeout(Duration::from_secs(4), connector.accept()).await;
    assert!(early.is_err(), "reconnected before the delay");

    let _peer = connector.accept().await.unwrap();
    assert_eq!(connector.attempts(), 2);
}
