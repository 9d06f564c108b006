//! Shared helpers for the integration tests

#![allow(dead_code)]

use ghostlink_communication::{
    sessions::SessionContext, LoopbackConnector, TransportHandler, TransportOptions,
};
use ghostlink_core::{CloseCode, Endpoint, Frame, SessionObserver, StatusFrame};
use ghostlink_settings::Config;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const KEY: &str = "-----BEGIN PUBLIC KEY-----TEST-----END PUBLIC KEY-----";

pub fn endpoint(method: &str) -> Endpoint {
    Endpoint::new("localhost", 8000, method)
}

/// Options with a short reconnect delay
pub fn options(auto_reconnect: bool) -> TransportOptions {
    TransportOptions {
        reconnect_delay: Duration::from_millis(10),
        ..TransportOptions::default()
    }
    .with_auto_reconnect(auto_reconnect)
}

pub fn context(
    connector: Arc<LoopbackConnector>,
    observer: Arc<RecordingObserver>,
) -> SessionContext {
    SessionContext::new(Config::default(), connector)
        .with_observer(observer)
        .with_key(KEY)
}

/// What a [`RecordingHandler`] saw
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Open,
    Message(Frame),
    Error(StatusFrame),
    Fatal(StatusFrame),
    Close(CloseCode),
}

pub struct RecordingHandler {
    tx: mpsc::UnboundedSender<Seen>,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Seen>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl TransportHandler for RecordingHandler {
    fn on_open(&self) {
        let _ = self.tx.send(Seen::Open);
    }

    fn on_message(&self, frame: &Frame) {
        let _ = self.tx.send(Seen::Message(frame.clone()));
    }

    fn on_error(&self, payload: &StatusFrame) {
        let _ = self.tx.send(Seen::Error(payload.clone()));
    }

    fn on_fatal(&self, payload: &StatusFrame) {
        let _ = self.tx.send(Seen::Fatal(payload.clone()));
    }

    fn on_close(&self, code: CloseCode) {
        let _ = self.tx.send(Seen::Close(code));
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub progress: Mutex<Vec<(usize, usize)>>,
    pub statuses: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<StatusFrame>>,
    pub ready: AtomicUsize,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn progress(&self) -> Vec<(usize, usize)> {
        self.progress.lock().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().clone()
    }

    pub fn errors(&self) -> Vec<StatusFrame> {
        self.errors.lock().clone()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.load(Ordering::SeqCst)
    }
}

impl SessionObserver for RecordingObserver {
    fn on_progress(&self, step: usize, total: usize) {
        self.progress.lock().push((step, total));
    }

    fn on_ready(&self) {
        self.ready.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, payload: &StatusFrame) {
        self.errors.lock().push(payload.clone());
    }

    fn on_status(&self, frame: &StatusFrame) {
        self.statuses.lock().push(frame.status().to_string());
    }
}
