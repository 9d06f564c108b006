//! Readiness gate for session-oriented endpoints
//!
//! Session endpoints (the scanner) accept one command at a time and only
//! after the device has reported `ready`. The gate watches replies as a
//! [`FrameInterceptor`] and tracks:
//!
//! ```text
//! Connecting -> Ready <-> Busy
//!     |                     |
//!     +-> TimedOut          +-> Closed
//! ```
//!
//! `connecting` arms a bounded timer; `ready` opens the gate; a command sent
//! through [`ReadinessGate::send`] closes it again until a terminal `ok`,
//! `fail` or `error` comes back.

use super::channel::{CommandChannel, Disposition, FrameInterceptor, Reply, Responses};
use ghostlink_core::data::frame::status;
use ghostlink_core::{ConnectionError, ProtocolError, Result, SessionObserver, StatusFrame};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GateState {
    /// Waiting for the device to report `ready`
    #[default]
    Connecting,
    /// Next command may be sent
    Ready,
    /// A command is outstanding
    Busy,
    /// The device never became ready
    TimedOut,
    /// The connection is gone
    Closed,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Ready => write!(f, "Ready"),
            Self::Busy => write!(f, "Busy"),
            Self::TimedOut => write!(f, "TimedOut"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Blocks command submission until the device reports `ready`
pub struct ReadinessGate {
    state: Arc<watch::Sender<GateState>>,
    timeout: Duration,
    observer: Arc<dyn SessionObserver>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessGate")
            .field("state", &self.state())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ReadinessGate {
    /// Create a gate in `Connecting`
    pub fn new(timeout: Duration, observer: Arc<dyn SessionObserver>) -> Arc<Self> {
        let (state, _) = watch::channel(GateState::Connecting);
        Arc::new(Self {
            state: Arc::new(state),
            timeout,
            observer,
            timer: Mutex::new(None),
        })
    }

    /// Create a gate and register it on `channel`
    pub fn attach(
        channel: &CommandChannel,
        timeout: Duration,
        observer: Arc<dyn SessionObserver>,
    ) -> Arc<Self> {
        let gate = Self::new(timeout, observer);
        channel.add_interceptor(gate.clone());
        gate
    }

    /// Current state
    pub fn state(&self) -> GateState {
        *self.state.borrow()
    }

    /// Watch state changes
    pub fn watch(&self) -> watch::Receiver<GateState> {
        self.state.subscribe()
    }

    /// True while the next command may be sent
    pub fn is_ready(&self) -> bool {
        self.state() == GateState::Ready
    }

    /// Start the connecting timer, restarting it if it is already running
    pub fn arm(&self) {
        let state = self.state.clone();
        let observer = self.observer.clone();
        let timeout = self.timeout;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let fired = state.send_if_modified(|s| {
                if *s == GateState::Connecting {
                    *s = GateState::TimedOut;
                    true
                } else {
                    false
                }
            });
            if fired {
                tracing::warn!("Device not ready after {}ms", timeout.as_millis());
                observer.on_error(&StatusFrame::timeout());
            }
        });

        if let Some(previous) = self.timer.lock().replace(handle) {
            previous.abort();
        }
    }

    fn disarm(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }

    fn set(&self, next: GateState) {
        self.state.send_if_modified(|s| {
            if *s == GateState::Closed || *s == next {
                false
            } else {
                *s = next;
                true
            }
        });
    }

    /// Wait until `Ready` and flip to `Busy`.
    ///
    /// Fails with [`ProtocolError::Timeout`] when the wait exceeds the gate
    /// timeout, and with a connection error once the gate is closed.
    pub async fn acquire(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let wait = async {
            loop {
                let mut outcome = None;
                self.state.send_if_modified(|s| match *s {
                    GateState::Ready => {
                        *s = GateState::Busy;
                        outcome = Some(true);
                        true
                    }
                    GateState::Closed => {
                        outcome = Some(false);
                        false
                    }
                    _ => false,
                });
                match outcome {
                    Some(true) => return Ok(()),
                    Some(false) => return Err(closed()),
                    None => {}
                }
                if rx.changed().await.is_err() {
                    return Err(closed());
                }
            }
        };

        match tokio::time::timeout(self.timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
            .into()),
        }
    }

    /// Wait until `Ready` without claiming the gate
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let wait = rx.wait_for(|s| matches!(s, GateState::Ready | GateState::Closed));
        let ready = match tokio::time::timeout(self.timeout, wait).await {
            Ok(Ok(state)) => *state == GateState::Ready,
            Ok(Err(_)) => false,
            Err(_) => {
                return Err(ProtocolError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                }
                .into())
            }
        };
        if ready {
            Ok(())
        } else {
            Err(closed())
        }
    }

    /// Hand the gate back without a reply (the command was never sent)
    pub fn release(&self) {
        self.state.send_if_modified(|s| {
            if *s == GateState::Busy {
                *s = GateState::Ready;
                true
            } else {
                false
            }
        });
    }

    /// Acquire the gate, then invoke `command` on `channel`
    pub async fn send(
        &self,
        channel: &CommandChannel,
        command: impl Into<String>,
    ) -> Result<Responses> {
        self.acquire().await?;
        channel.invoke(command).inspect_err(|_| self.release())
    }
}

fn closed() -> ghostlink_core::Error {
    ConnectionError::ConnectionLost {
        reason: "session closed before the device was ready".to_string(),
    }
    .into()
}

impl FrameInterceptor for ReadinessGate {
    fn intercept(&self, reply: &Reply) -> Disposition {
        match reply {
            Reply::Message(frame) => match frame.status() {
                Some(status::CONNECTING) => {
                    self.set(GateState::Connecting);
                    self.arm();
                    Disposition::Consume
                }
                Some(status::READY) => {
                    self.disarm();
                    self.set(GateState::Ready);
                    self.observer.on_ready();
                    Disposition::Consume
                }
                Some(status::CONNECTED) => Disposition::Consume,
                Some(status::OK) | Some(status::FAIL) => {
                    self.set(GateState::Ready);
                    Disposition::Forward
                }
                _ => Disposition::Forward,
            },
            Reply::Error(payload) => {
                self.disarm();
                self.set(GateState::Ready);
                self.observer.on_error(payload);
                Disposition::Forward
            }
            Reply::Fatal(_) | Reply::Closed(_) => {
                self.disarm();
                self.set(GateState::Closed);
                Disposition::Forward
            }
        }
    }
}

impl Drop for ReadinessGate {
    fn drop(&mut self) {
        self.disarm();
    }
}
