//! In-memory daemon stand-in
//!
//! [`LoopbackConnector`] hands out socket pairs backed by Tokio channels.
//! Each successful connect produces a [`LoopbackPeer`] which plays the
//! daemon's side of that socket: it reads what the client sent, pushes
//! status, text and binary frames back, and closes with any code.

use super::{Connector, SocketReader, SocketWriter, WireEvent, WireMessage};
use async_trait::async_trait;
use ghostlink_core::{CloseCode, ConnectionError, Endpoint, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, Mutex};

/// Connector whose sockets live in memory
pub struct LoopbackConnector {
    peers_tx: mpsc::UnboundedSender<LoopbackPeer>,
    peers_rx: Mutex<mpsc::UnboundedReceiver<LoopbackPeer>>,
    refuse: AtomicUsize,
    attempts: AtomicUsize,
}

impl LoopbackConnector {
    /// Create a connector with no pending peers
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            peers_tx,
            peers_rx: Mutex::new(peers_rx),
            refuse: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Wait for the client to open the next socket
    pub async fn accept(&self) -> Option<LoopbackPeer> {
        self.peers_rx.lock().await.recv().await
    }

    /// Peer for a socket that is already open, if any
    pub fn try_accept(&self) -> Option<LoopbackPeer> {
        self.peers_rx.try_lock().ok()?.try_recv().ok()
    }

    /// Fail the next `count` connection attempts
    pub fn refuse_next(&self, count: usize) {
        self.refuse.store(count, Ordering::SeqCst);
    }

    /// Connection attempts so far, refused ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<(Box<dyn SocketWriter>, Box<dyn SocketReader>)> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ConnectionError::WebSocketError {
                reason: format!("connection to {} refused", endpoint.url()),
            }
            .into());
        }

        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let peer = LoopbackPeer {
            endpoint: endpoint.clone(),
            from_client: client_rx,
            to_client: server_tx,
        };
        self.peers_tx
            .send(peer)
            .map_err(|_| ConnectionError::ConnectionLost {
                reason: "loopback connector dropped".to_string(),
            })?;

        Ok((
            Box::new(LoopbackWriter {
                tx: Some(client_tx),
            }),
            Box::new(LoopbackReader { rx: server_rx }),
        ))
    }
}

struct LoopbackWriter {
    tx: Option<mpsc::UnboundedSender<WireMessage>>,
}

#[async_trait]
impl SocketWriter for LoopbackWriter {
    async fn write(&mut self, message: WireMessage) -> Result<()> {
        let tx = self.tx.as_ref().ok_or_else(|| ConnectionError::ConnectionLost {
            reason: "socket closed".to_string(),
        })?;
        tx.send(message).map_err(|_| {
            ConnectionError::ConnectionLost {
                reason: "peer went away".to_string(),
            }
            .into()
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

struct LoopbackReader {
    rx: mpsc::UnboundedReceiver<WireEvent>,
}

#[async_trait]
impl SocketReader for LoopbackReader {
    async fn read(&mut self) -> WireEvent {
        self.rx
            .recv()
            .await
            .unwrap_or(WireEvent::Closed(CloseCode::ABNORMAL))
    }
}

/// Daemon side of one loopback socket
pub struct LoopbackPeer {
    endpoint: Endpoint,
    from_client: mpsc::UnboundedReceiver<WireMessage>,
    to_client: mpsc::UnboundedSender<WireEvent>,
}

impl LoopbackPeer {
    /// Endpoint the client dialed
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Next message from the client; `None` once the client closed
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.from_client.recv().await
    }

    /// Next message if one is already waiting
    pub fn try_recv(&mut self) -> Option<WireMessage> {
        self.from_client.try_recv().ok()
    }

    /// Next message as text; `None` if it was binary or the client closed
    pub async fn recv_text(&mut self) -> Option<String> {
        match self.recv().await? {
            WireMessage::Text(text) => Some(text),
            WireMessage::Binary(_) => None,
        }
    }

    /// Push a JSON value as a text frame
    pub fn send_json(&self, value: serde_json::Value) {
        self.send_text(&value.to_string());
    }

    /// Push a raw text frame
    pub fn send_text(&self, text: &str) {
        let _ = self.to_client.send(WireEvent::Text(text.to_string()));
    }

    /// Push a binary frame
    pub fn send_binary(&self, data: Vec<u8>) {
        let _ = self.to_client.send(WireEvent::Binary(data));
    }

    /// Close with a close frame carrying `code`
    pub fn close(&self, code: CloseCode) {
        let _ = self.to_client.send(WireEvent::Closed(code));
    }

    /// Drop the socket without a close frame
    pub fn drop_abruptly(self) {}
}
