//! Socket-level communication with the device-control daemon
//!
//! The [`Transport`] owns one physical connection at a time and is written
//! against three small traits so the socket can be swapped out:
//! [`Connector`] dials an [`Endpoint`] and yields a [`SocketWriter`] /
//! [`SocketReader`] pair. [`websocket::WebSocketConnector`] talks to the real
//! daemon, [`loopback::LoopbackConnector`] keeps everything in memory.

pub mod diagnostics;
pub mod frame;
pub mod loopback;
pub mod transport;
pub mod websocket;

use async_trait::async_trait;
use ghostlink_core::{CloseCode, Endpoint, Result};
use std::fmt;

pub use diagnostics::DiagnosticLog;
pub use transport::{Transport, TransportHandler, TransportOptions};

/// Outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// UTF-8 command text
    Text(String),
    /// Raw binary payload
    Binary(Vec<u8>),
}

impl WireMessage {
    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(text) => text.len(),
            WireMessage::Binary(data) => data.len(),
        }
    }

    /// True if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text payload, if any
    pub fn as_text(&self) -> Option<&str> {
        match self {
            WireMessage::Text(text) => Some(text),
            WireMessage::Binary(_) => None,
        }
    }
}

impl From<String> for WireMessage {
    fn from(text: String) -> Self {
        WireMessage::Text(text)
    }
}

impl From<&str> for WireMessage {
    fn from(text: &str) -> Self {
        WireMessage::Text(text.to_string())
    }
}

impl From<Vec<u8>> for WireMessage {
    fn from(data: Vec<u8>) -> Self {
        WireMessage::Binary(data)
    }
}

impl From<&[u8]> for WireMessage {
    fn from(data: &[u8]) -> Self {
        WireMessage::Binary(data.to_vec())
    }
}

impl fmt::Display for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireMessage::Text(text) => write!(f, "{}", text),
            WireMessage::Binary(data) => write!(f, "<binary {} bytes>", data.len()),
        }
    }
}

/// Inbound socket event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// Text message
    Text(String),
    /// Binary message
    Binary(Vec<u8>),
    /// The socket is gone; no further events follow
    Closed(CloseCode),
}

/// Write half of a socket
#[async_trait]
pub trait SocketWriter: Send {
    /// Write one message
    async fn write(&mut self, message: WireMessage) -> Result<()>;

    /// Start a graceful close
    async fn close(&mut self) -> Result<()>;
}

/// Read half of a socket
#[async_trait]
pub trait SocketReader: Send {
    /// Next inbound event.
    ///
    /// Must be cancel-safe: the transport polls it inside `select!`.
    /// Returns [`WireEvent::Closed`] once the socket has gone away.
    async fn read(&mut self) -> WireEvent;
}

/// Socket factory
#[async_trait]
pub trait Connector: Send + Sync {
    /// Dial `endpoint`
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<(Box<dyn SocketWriter>, Box<dyn SocketReader>)>;
}
