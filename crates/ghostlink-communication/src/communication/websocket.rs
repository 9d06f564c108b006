//! WebSocket connector backed by `tokio-tungstenite`

use super::{Connector, SocketReader, SocketWriter, WireEvent, WireMessage};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use ghostlink_core::{CloseCode, ConnectionError, Endpoint, Error, Result};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the peer sent a close frame without a code
const NO_STATUS: CloseCode = CloseCode(1005);

fn ws_error(e: tokio_tungstenite::tungstenite::Error) -> Error {
    ConnectionError::WebSocketError {
        reason: e.to_string(),
    }
    .into()
}

/// Dials `ws://host:port/ws/<method>` over TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<(Box<dyn SocketWriter>, Box<dyn SocketReader>)> {
        let url = endpoint.url();
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(ws_error)?;
        tracing::debug!("WebSocket handshake with {} complete", url);

        let (sink, stream) = stream.split();
        Ok((
            Box::new(WebSocketWriter { sink }),
            Box::new(WebSocketReader { stream }),
        ))
    }
}

struct WebSocketWriter {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl SocketWriter for WebSocketWriter {
    async fn write(&mut self, message: WireMessage) -> Result<()> {
        let message = match message {
            WireMessage::Text(text) => Message::Text(text.into()),
            WireMessage::Binary(data) => Message::Binary(data.into()),
        };
        self.sink.send(message).await.map_err(ws_error)
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.close().await.map_err(ws_error)
    }
}

struct WebSocketReader {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl SocketReader for WebSocketReader {
    async fn read(&mut self) -> WireEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return WireEvent::Text(text.as_str().to_owned()),
                Some(Ok(Message::Binary(data))) => return WireEvent::Binary(data.to_vec()),
                Some(Ok(Message::Close(frame))) => {
                    return WireEvent::Closed(
                        frame
                            .map(|f| CloseCode(u16::from(f.code)))
                            .unwrap_or(NO_STATUS),
                    )
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::debug!("WebSocket read failed: {}", e);
                    return WireEvent::Closed(CloseCode::ABNORMAL);
                }
                None => return WireEvent::Closed(CloseCode::ABNORMAL),
            }
        }
    }
}
