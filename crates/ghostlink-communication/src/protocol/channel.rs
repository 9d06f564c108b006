//! Request/response correlation over a [`Transport`]
//!
//! The wire protocol carries no request ids: whatever arrives next belongs
//! to the command in flight. A [`CommandChannel`] installs itself as the
//! transport's handler and keeps a single response slot. Each
//! [`CommandChannel::invoke`] claims the slot and gets a [`Responses`]
//! stream; the slot is released when that stream is dropped.
//!
//! What happens when the slot is already claimed depends on the
//! [`ChannelPolicy`].

use crate::communication::{Connector, Transport, TransportHandler, TransportOptions, WireMessage};
use ghostlink_core::{
    CloseCode, ConnectionError, Endpoint, Frame, ProtocolError, Result, StatusFrame,
};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What a second `invoke` does while a command is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelPolicy {
    /// Refuse with [`ProtocolError::ChannelBusy`]
    #[default]
    Exclusive,
    /// Take over the slot; the earlier invocation ends with
    /// [`ProtocolError::Preempted`] and the newer one receives whatever
    /// arrives next, including the earlier command's response
    Replace,
}

/// One inbound event routed to an invocation
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Regular frame, binary included
    Message(Frame),
    /// `status: error`
    Error(StatusFrame),
    /// `status: fatal`
    Fatal(StatusFrame),
    /// Socket closed
    Closed(CloseCode),
}

impl Reply {
    /// Status string, if the reply carries a structured frame
    pub fn status(&self) -> Option<&str> {
        match self {
            Reply::Message(frame) => frame.status(),
            Reply::Error(payload) | Reply::Fatal(payload) => Some(payload.status()),
            Reply::Closed(_) => None,
        }
    }

    /// Structured frame, if any
    pub fn as_status(&self) -> Option<&StatusFrame> {
        match self {
            Reply::Message(frame) => frame.as_status(),
            Reply::Error(payload) | Reply::Fatal(payload) => Some(payload),
            Reply::Closed(_) => None,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Message(frame) => write!(f, "{}", frame),
            Reply::Error(payload) | Reply::Fatal(payload) => write!(f, "{}", payload),
            Reply::Closed(code) => write!(f, "<closed {}>", code),
        }
    }
}

/// Whether an interceptor lets a reply through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Route to the command in flight
    Forward,
    /// Swallow
    Consume,
}

/// Sees every reply before it is routed.
///
/// Runs on the transport's driver task; must not block.
pub trait FrameInterceptor: Send + Sync {
    /// Inspect a reply
    fn intercept(&self, reply: &Reply) -> Disposition;
}

struct Slot {
    generation: u64,
    command: String,
    tx: mpsc::UnboundedSender<Reply>,
}

impl Slot {
    fn is_live(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[derive(Default)]
struct Router {
    slot: Mutex<Option<Slot>>,
    interceptors: RwLock<Vec<Arc<dyn FrameInterceptor>>>,
}

impl Router {
    fn route(&self, reply: Reply) {
        let interceptors = self.interceptors.read().clone();
        for interceptor in interceptors {
            if interceptor.intercept(&reply) == Disposition::Consume {
                return;
            }
        }

        let mut slot = self.slot.lock();
        let delivered = match slot.as_ref() {
            Some(current) => current.tx.send(reply).is_ok(),
            None => {
                tracing::debug!("No command awaiting {}", reply);
                return;
            }
        };
        if !delivered {
            *slot = None;
        }
    }

    fn release(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|s| s.generation == generation) {
            *slot = None;
        }
    }
}

impl TransportHandler for Router {
    fn on_message(&self, frame: &Frame) {
        self.route(Reply::Message(frame.clone()));
    }

    fn on_error(&self, payload: &StatusFrame) {
        self.route(Reply::Error(payload.clone()));
    }

    fn on_fatal(&self, payload: &StatusFrame) {
        self.route(Reply::Fatal(payload.clone()));
    }

    fn on_close(&self, code: CloseCode) {
        self.route(Reply::Closed(code));
    }
}

/// Single-slot command correlator bound to one transport
#[derive(Clone)]
pub struct CommandChannel {
    transport: Transport,
    router: Arc<Router>,
    policy: ChannelPolicy,
    generation: Arc<AtomicU64>,
}

impl fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandChannel")
            .field("endpoint", &self.transport.endpoint().path())
            .field("policy", &self.policy)
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl CommandChannel {
    /// Open a transport to `endpoint` with the channel already routing its
    /// frames
    pub fn open(
        endpoint: Endpoint,
        connector: Arc<dyn Connector>,
        options: TransportOptions,
        policy: ChannelPolicy,
    ) -> Result<Self> {
        let router = Arc::new(Router::default());
        let transport = Transport::open(endpoint, connector, options, router.clone())?;
        Ok(Self {
            transport,
            router,
            policy,
            generation: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Take over an existing transport's handler
    pub fn new(transport: Transport, policy: ChannelPolicy) -> Self {
        let router = Arc::new(Router::default());
        transport.set_handler(router.clone());
        Self {
            transport,
            router,
            policy,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Underlying transport
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Slot policy
    pub fn policy(&self) -> ChannelPolicy {
        self.policy
    }

    /// Register an interceptor; interceptors run in registration order
    pub fn add_interceptor(&self, interceptor: Arc<dyn FrameInterceptor>) {
        self.router.interceptors.write().push(interceptor);
    }

    /// True while an invocation holds the slot
    pub fn is_busy(&self) -> bool {
        self.router.slot.lock().as_ref().is_some_and(Slot::is_live)
    }

    /// Send `command` and claim the response slot
    pub fn invoke(&self, command: impl Into<String>) -> Result<Responses> {
        self.claim(command.into(), None)
    }

    /// Send `command` followed by a binary payload
    pub fn invoke_with_payload(
        &self,
        command: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<Responses> {
        self.claim(command.into(), Some(payload))
    }

    fn claim(&self, command: String, payload: Option<Vec<u8>>) -> Result<Responses> {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut slot = self.router.slot.lock();
            if let Some(current) = slot.as_ref().filter(|s| s.is_live()) {
                match self.policy {
                    ChannelPolicy::Exclusive => {
                        return Err(ProtocolError::ChannelBusy {
                            pending: current.command.clone(),
                        }
                        .into());
                    }
                    ChannelPolicy::Replace => tracing::warn!(
                        "'{}' replaces in-flight '{}' on {}",
                        command,
                        current.command,
                        self.transport.endpoint().path()
                    ),
                }
            }
            *slot = Some(Slot {
                generation,
                command: command.clone(),
                tx,
            });
        }

        self.transport.send(command.clone());
        if let Some(payload) = payload {
            self.transport.send(payload);
        }

        Ok(Responses {
            rx,
            generation,
            router: self.router.clone(),
            command,
        })
    }

    /// Write to the transport without touching the slot (binary chunks,
    /// interrupts)
    pub fn send_raw(&self, message: impl Into<WireMessage>) {
        self.transport.send(message);
    }
}

/// Everything gathered by [`Responses::collect_until`]
#[derive(Debug, Clone, PartialEq)]
pub struct Collected {
    /// Non-terminal structured frames, in arrival order
    pub frames: Vec<StatusFrame>,
    /// Binary frames, in arrival order
    pub binary: Vec<Vec<u8>>,
    /// The frame that ended the collection
    pub terminal: StatusFrame,
}

/// Replies to one invocation
pub struct Responses {
    rx: mpsc::UnboundedReceiver<Reply>,
    generation: u64,
    router: Arc<Router>,
    command: String,
}

impl fmt::Debug for Responses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responses")
            .field("command", &self.command)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Responses {
    /// The command this stream answers
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Next raw reply; `None` once the invocation was preempted
    pub async fn next_reply(&mut self) -> Option<Reply> {
        self.rx.recv().await
    }

    /// Next regular frame; error, fatal and close replies become errors
    pub async fn next(&mut self) -> Result<Frame> {
        match self.rx.recv().await {
            Some(Reply::Message(frame)) => Ok(frame),
            Some(Reply::Error(payload)) => Err(ProtocolError::Rejected { payload }.into()),
            Some(Reply::Fatal(payload)) => Err(ProtocolError::Fatal { payload }.into()),
            Some(Reply::Closed(code)) => Err(ConnectionError::Closed { code }.into()),
            None => Err(ProtocolError::Preempted.into()),
        }
    }

    /// Next frame, which must be structured
    pub async fn next_status(&mut self) -> Result<StatusFrame> {
        match self.next().await? {
            Frame::Status(frame) => Ok(frame),
            other => Err(unexpected(&other)),
        }
    }

    /// First structured reply, where an `error` frame is an answer rather
    /// than a failure
    pub async fn answer(mut self) -> Result<StatusFrame> {
        match self.rx.recv().await {
            Some(Reply::Message(Frame::Status(frame))) | Some(Reply::Error(frame)) => Ok(frame),
            Some(Reply::Message(other)) => Err(unexpected(&other)),
            Some(Reply::Fatal(payload)) => Err(ProtocolError::Fatal { payload }.into()),
            Some(Reply::Closed(code)) => Err(ConnectionError::Closed { code }.into()),
            None => Err(ProtocolError::Preempted.into()),
        }
    }

    /// Skip frames until one carries a status in `terminal`
    pub async fn expect_status(mut self, terminal: &[&str]) -> Result<StatusFrame> {
        loop {
            match self.next().await? {
                Frame::Status(frame) if terminal.contains(&frame.status()) => return Ok(frame),
                other => tracing::trace!("'{}' skipping {}", self.command, other),
            }
        }
    }

    /// Gather frames until one carries a status in `terminal`
    pub async fn collect_until(mut self, terminal: &[&str]) -> Result<Collected> {
        let mut frames = Vec::new();
        let mut binary = Vec::new();
        loop {
            match self.next().await? {
                Frame::Status(frame) if terminal.contains(&frame.status()) => {
                    return Ok(Collected {
                        frames,
                        binary,
                        terminal: frame,
                    })
                }
                Frame::Status(frame) => frames.push(frame),
                Frame::Binary(data) => binary.push(data),
                Frame::Text(text) => tracing::debug!("'{}' ignoring text {}", self.command, text),
            }
        }
    }
}

impl Drop for Responses {
    fn drop(&mut self) {
        self.router.release(self.generation);
    }
}

/// Error for a frame the current flow cannot interpret
pub fn unexpected(frame: &Frame) -> ghostlink_core::Error {
    let status = match frame {
        Frame::Status(frame) => frame.status().to_string(),
        Frame::Binary(data) => format!("<binary {} bytes>", data.len()),
        Frame::Text(text) => text.clone(),
    };
    ProtocolError::UnexpectedResponse { status }.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_status() {
        let reply = Reply::Error(StatusFrame::new("error").with_field("error", "BAD"));
        assert_eq!(reply.status(), Some("error"));
        assert_eq!(Reply::Closed(CloseCode::NORMAL).status(), None);
        assert_eq!(Reply::Message(Frame::Binary(vec![1])).status(), None);
    }

    #[test]
    fn test_router_release_only_matching_generation() {
        let router = Router::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        *router.slot.lock() = Some(Slot {
            generation: 2,
            command: "ls".into(),
            tx,
        });

        router.release(1);
        assert!(router.slot.lock().is_some());
        router.release(2);
        assert!(router.slot.lock().is_none());
    }

    #[test]
    fn test_unexpected_names_the_frame() {
        let err = unexpected(&Frame::Binary(vec![0; 8]));
        assert!(err.to_string().contains("binary 8 bytes"));
    }
}
