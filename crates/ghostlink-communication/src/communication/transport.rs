//! Persistent socket transport
//!
//! A [`Transport`] owns one logical connection to a daemon endpoint and the
//! physical sockets opened for it over time. A background task drives the
//! current socket: it writes queued messages, classifies every inbound frame
//! and hands it to the [`TransportHandler`], sends the heartbeat, and decides
//! what happens after the socket closes (release, lazy reopen, or automatic
//! reconnect).

use super::diagnostics::{DiagnosticLog, ABNORMAL_MARKER};
use super::frame::{self, Classified};
use super::{Connector, SocketReader, SocketWriter, WireEvent, WireMessage};
use ghostlink_core::{
    CloseCode, ConnectionEvent, ConnectionState, Endpoint, EventDispatcher, Frame, Result,
    StatusFrame,
};
use ghostlink_settings::Config;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

/// Literal sent as the heartbeat
pub const PING: &str = "ping";

/// Receives classified frames and lifecycle callbacks from a [`Transport`].
///
/// Callbacks run on the transport's driver task and must not block.
pub trait TransportHandler: Send + Sync {
    /// A socket opened
    fn on_open(&self) {}

    /// Any frame that is not `error`, `fatal` or `pong`, binary included
    fn on_message(&self, _frame: &Frame) {}

    /// `status: error`
    fn on_error(&self, _payload: &StatusFrame) {}

    /// `status: fatal`
    fn on_fatal(&self, _payload: &StatusFrame) {}

    /// The socket closed
    fn on_close(&self, _code: CloseCode) {}
}

struct NoOpHandler;

impl TransportHandler for NoOpHandler {}

/// Transport tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Reopen a fresh socket after every close
    pub auto_reconnect: bool,
    /// Wait before an automatic reconnect
    pub reconnect_delay: Duration,
    /// Heartbeat period
    pub heartbeat_interval: Duration,
    /// Minimum age before an abnormal close raises an alert
    pub abnormal_alert_age: Duration,
    /// Entries kept in the diagnostic log
    pub log_capacity: usize,
    /// Frames kept in the received history
    pub history_capacity: usize,
}

impl TransportOptions {
    /// Options derived from the client configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            auto_reconnect: config.connection.auto_reconnect,
            reconnect_delay: config.connection.reconnect_delay(),
            heartbeat_interval: config.protocol.heartbeat_interval(),
            abnormal_alert_age: config.protocol.abnormal_alert_age(),
            log_capacity: config.diagnostics.log_capacity,
            history_capacity: config.diagnostics.history_capacity,
        }
    }

    /// Override automatic reconnection
    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

enum Outbound {
    Message(WireMessage),
    Close,
}

/// Socket bookkeeping shared between callers and the driver task
#[derive(Default)]
struct Link {
    /// Queue into the open socket, `None` unless the socket is open
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    /// The single send held back until the next open
    pending: Option<WireMessage>,
    /// A driver task exists
    running: bool,
    /// `close` was called while no socket was open
    close_requested: bool,
}

enum AfterClose {
    Reconnect,
    Reopen,
    Release,
}

struct Shared {
    id: Uuid,
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    options: TransportOptions,
    auto_reconnect: AtomicBool,
    state: watch::Sender<ConnectionState>,
    handler: RwLock<Arc<dyn TransportHandler>>,
    link: Mutex<Link>,
    history: Mutex<VecDeque<Frame>>,
    log: DiagnosticLog,
    ever_connected: AtomicBool,
    /// An abnormal-disconnect alert was raised and no frame arrived since
    alerted: AtomicBool,
    heartbeat_enabled: AtomicBool,
    last_command: Mutex<String>,
    created_at: Instant,
    events: EventDispatcher,
    wake: Notify,
}

/// Handle to one logical connection.
///
/// Cloning the handle shares the connection.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.shared.id)
            .field("endpoint", &self.shared.endpoint.path())
            .field("state", &self.state())
            .finish()
    }
}

impl Transport {
    /// Open a connection to `endpoint`.
    ///
    /// Dialing happens on a background task, so this must be called from
    /// within a Tokio runtime.
    pub fn open(
        endpoint: Endpoint,
        connector: Arc<dyn Connector>,
        options: TransportOptions,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Self> {
        endpoint.validate()?;

        let (state, _) = watch::channel(ConnectionState::Closed);
        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            log: DiagnosticLog::new(endpoint.path(), options.log_capacity),
            auto_reconnect: AtomicBool::new(options.auto_reconnect),
            endpoint,
            connector,
            options,
            state,
            handler: RwLock::new(handler),
            link: Mutex::new(Link::default()),
            history: Mutex::new(VecDeque::new()),
            ever_connected: AtomicBool::new(false),
            alerted: AtomicBool::new(false),
            heartbeat_enabled: AtomicBool::new(true),
            last_command: Mutex::new(String::new()),
            created_at: Instant::now(),
            events: EventDispatcher::default(),
            wake: Notify::new(),
        });

        tracing::info!("Opening {}", shared.endpoint);
        let transport = Self { shared };
        transport.start();
        Ok(transport)
    }

    /// Open with a handler that ignores everything; install one later with
    /// [`Transport::set_handler`]
    pub fn open_detached(
        endpoint: Endpoint,
        connector: Arc<dyn Connector>,
        options: TransportOptions,
    ) -> Result<Self> {
        Self::open(endpoint, connector, options, Arc::new(NoOpHandler))
    }

    fn start(&self) {
        let mut link = self.shared.link.lock();
        if !link.running {
            link.running = true;
            link.close_requested = false;
            tokio::spawn(run(self.shared.clone()));
        }
    }

    /// Send a command string or binary payload.
    ///
    /// If the socket is not open the message is held until the next open,
    /// reopening the connection if it had been released. Only one held
    /// message is kept; a newer one replaces it.
    pub fn send(&self, message: impl Into<WireMessage>) {
        let message = message.into();
        if let WireMessage::Text(text) = &message {
            let name = text.lines().next().unwrap_or_default();
            *self.shared.last_command.lock() = super::diagnostics::trim_entry(name);
        }

        let mut link = self.shared.link.lock();
        let message = match link.outbound.as_ref() {
            Some(tx) => match tx.send(Outbound::Message(message)) {
                Ok(()) => return,
                Err(mpsc::error::SendError(Outbound::Message(message))) => message,
                Err(_) => return,
            },
            None => message,
        };

        tracing::debug!(
            "{} not open, holding '{}' until it is",
            self.shared.endpoint.path(),
            message
        );
        if let Some(dropped) = link.pending.replace(message) {
            tracing::warn!(
                "{}: queued send '{}' replaced before the socket opened",
                self.shared.endpoint.path(),
                dropped
            );
        }
        if !link.running {
            link.running = true;
            link.close_requested = false;
            tokio::spawn(run(self.shared.clone()));
        }
    }

    /// Close the socket.
    ///
    /// `Some(reconnect)` overrides the auto-reconnect flag first, so
    /// `close(Some(false))` releases the connection for good and
    /// `close(Some(true))` forces a fresh socket.
    pub fn close(&self, reconnect: Option<bool>) {
        if let Some(reconnect) = reconnect {
            self.shared.auto_reconnect.store(reconnect, Ordering::SeqCst);
        }

        let mut link = self.shared.link.lock();
        link.pending = None;
        match link.outbound.as_ref() {
            Some(tx) => {
                let _ = tx.send(Outbound::Close);
            }
            None if link.running => link.close_requested = true,
            None => {}
        }
        drop(link);

        // wakes a pending reconnect sleep only; no permit is stored
        self.shared.wake.notify_waiters();
    }

    /// Replace the handler receiving frames and lifecycle callbacks
    pub fn set_handler(&self, handler: Arc<dyn TransportHandler>) {
        *self.shared.handler.write() = handler;
    }

    /// Current socket state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch socket state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Subscribe to lifecycle events (alerts, reconnects)
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Frames received since the connection was (re)opened
    pub fn received_frames(&self) -> Vec<Frame> {
        self.shared.history.lock().iter().cloned().collect()
    }

    /// Most recently received frame
    pub fn last_response(&self) -> Option<Frame> {
        self.shared.history.lock().back().cloned()
    }

    /// Exportable traffic log
    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.shared.log
    }

    /// Endpoint this transport talks to
    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    /// Unique id of this connection
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// True once any frame has been received
    pub fn ever_connected(&self) -> bool {
        self.shared.ever_connected.load(Ordering::SeqCst)
    }

    /// First line of the last text command sent
    pub fn last_command(&self) -> String {
        self.shared.last_command.lock().clone()
    }

    /// Current auto-reconnect flag
    pub fn auto_reconnect(&self) -> bool {
        self.shared.auto_reconnect.load(Ordering::SeqCst)
    }

    /// Change the auto-reconnect flag without closing
    pub fn set_auto_reconnect(&self, auto_reconnect: bool) {
        self.shared.auto_reconnect.store(auto_reconnect, Ordering::SeqCst);
    }
}

async fn run(shared: Arc<Shared>) {
    loop {
        let code = shared.connect_and_drive().await;

        match shared.after_close(code) {
            AfterClose::Release => break,
            AfterClose::Reopen => continue,
            AfterClose::Reconnect => {}
        }

        tokio::select! {
            _ = tokio::time::sleep(shared.options.reconnect_delay) => {}
            _ = shared.wake.notified() => {}
        }

        {
            let mut link = shared.link.lock();
            if !shared.auto_reconnect.load(Ordering::SeqCst) && link.pending.is_none() {
                link.running = false;
                tracing::info!("{} released", shared.endpoint.path());
                break;
            }
        }

        shared.history.lock().clear();
        tracing::info!("Reconnecting {}", shared.endpoint);
        shared.events.publish(ConnectionEvent::Reconnecting {
            endpoint: shared.endpoint.path(),
        });
    }
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if !previous.can_transition_to(next) {
            tracing::warn!(
                "{}: unexpected state change {} -> {}",
                self.endpoint.path(),
                previous,
                next
            );
        }
    }

    fn handler(&self) -> Arc<dyn TransportHandler> {
        self.handler.read().clone()
    }

    async fn connect_and_drive(&self) -> CloseCode {
        self.set_state(ConnectionState::Connecting);

        let (mut writer, mut reader) = match self.connector.connect(&self.endpoint).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("Failed to connect {}: {}", self.endpoint, e);
                self.log.record_note(&format!("connect failed: {}", e));
                return CloseCode::ABNORMAL;
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let closing = {
            let mut link = self.link.lock();
            if link.close_requested {
                link.close_requested = false;
                true
            } else {
                if let Some(message) = link.pending.take() {
                    let _ = tx.send(Outbound::Message(message));
                }
                link.outbound = Some(tx);
                false
            }
        };

        if closing {
            self.set_state(ConnectionState::Open);
            self.set_state(ConnectionState::Closing);
            if let Err(e) = writer.close().await {
                tracing::debug!("Close of {} failed: {}", self.endpoint.path(), e);
            }
            return CloseCode::NORMAL;
        }

        self.heartbeat_enabled.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Open);
        tracing::info!("Connected to {}", self.endpoint);
        self.events.publish(ConnectionEvent::Opened {
            endpoint: self.endpoint.path(),
        });
        self.handler().on_open();

        self.drive(writer.as_mut(), reader.as_mut(), &mut rx).await
    }

    async fn drive(
        &self,
        writer: &mut dyn SocketWriter,
        reader: &mut dyn SocketReader,
        rx: &mut mpsc::UnboundedReceiver<Outbound>,
    ) -> CloseCode {
        let period = self.options.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                outbound = rx.recv() => match outbound {
                    Some(Outbound::Message(message)) => {
                        self.log.record_sent(&message);
                        tracing::debug!("{} sent {}", self.endpoint.path(), message);
                        if let Err(e) = writer.write(message).await {
                            tracing::error!("Send on {} failed: {}", self.endpoint.path(), e);
                            return CloseCode::ABNORMAL;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        self.link.lock().outbound = None;
                        self.set_state(ConnectionState::Closing);
                        if let Err(e) = writer.close().await {
                            tracing::debug!("Close of {} failed: {}", self.endpoint.path(), e);
                        }
                        return CloseCode::NORMAL;
                    }
                },
                event = reader.read() => match event {
                    WireEvent::Text(text) => {
                        self.log.record_received(&text);
                        self.dispatch(frame::decode_text(&text));
                    }
                    WireEvent::Binary(data) => {
                        self.log.record_received_binary(data.len());
                        self.dispatch(Frame::Binary(data));
                    }
                    WireEvent::Closed(code) => return code,
                },
                _ = heartbeat.tick() => {
                    if self.heartbeat_enabled.load(Ordering::SeqCst) {
                        self.log.record_ping();
                        if let Err(e) = writer.write(WireMessage::from(PING)).await {
                            tracing::error!("Heartbeat on {} failed: {}", self.endpoint.path(), e);
                            return CloseCode::ABNORMAL;
                        }
                    }
                }
            }
        }
    }

    fn dispatch(&self, frame: Frame) {
        tracing::debug!("{} recv {}", self.endpoint.path(), frame);
        {
            let mut history = self.history.lock();
            if history.len() >= self.options.history_capacity.max(1) {
                history.pop_front();
            }
            history.push_back(frame.clone());
        }

        let handler = self.handler();
        match frame::classify(frame) {
            Classified::Error(payload) => {
                tracing::warn!("{} error: {}", self.endpoint.path(), payload);
                handler.on_error(&payload);
            }
            Classified::Fatal(payload) => {
                tracing::error!("{} fatal: {}", self.endpoint.path(), payload);
                self.heartbeat_enabled.store(false, Ordering::SeqCst);
                self.events.publish(ConnectionEvent::Fatal {
                    endpoint: self.endpoint.path(),
                    payload: payload.clone(),
                });
                handler.on_fatal(&payload);
            }
            Classified::Pong => {}
            Classified::Message(frame) => handler.on_message(&frame),
        }

        self.ever_connected.store(true, Ordering::SeqCst);
        self.alerted.store(false, Ordering::SeqCst);
    }

    fn after_close(&self, code: CloseCode) -> AfterClose {
        self.link.lock().outbound = None;
        self.set_state(ConnectionState::Closed);
        tracing::info!("{} closed with code {}", self.endpoint.path(), code);

        let old_enough = self.created_at.elapsed() >= self.options.abnormal_alert_age;
        if code.is_abnormal() && old_enough && !self.alerted.swap(true, Ordering::SeqCst) {
            let ever_connected = self.ever_connected.load(Ordering::SeqCst);
            tracing::warn!(
                "Abnormal disconnection on {} (ever connected: {})",
                self.endpoint.path(),
                ever_connected
            );
            self.log.record_note(ABNORMAL_MARKER);
            self.events.publish(ConnectionEvent::AbnormalDisconnect {
                endpoint: self.endpoint.path(),
                ever_connected,
            });
        }

        self.events.publish(ConnectionEvent::Closed {
            endpoint: self.endpoint.path(),
            code,
        });
        self.handler().on_close(code);

        let mut link = self.link.lock();
        link.close_requested = false;
        if self.auto_reconnect.load(Ordering::SeqCst) {
            AfterClose::Reconnect
        } else if link.pending.is_some() {
            AfterClose::Reopen
        } else {
            link.running = false;
            AfterClose::Release
        }
    }
}
