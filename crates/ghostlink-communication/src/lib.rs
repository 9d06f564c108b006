//! # ghostlink Communication
//!
//! WebSocket transport and command protocols for talking to the
//! device-control daemon.
//!
//! - [`communication`]: persistent transport with heartbeat, reconnection
//!   and a diagnostic log
//! - [`protocol`]: request/response correlation, chunked uploads and the
//!   readiness gate
//! - [`sessions`]: control, scan, slicing and USB setup flows

pub mod communication;
pub mod protocol;
pub mod sessions;

pub use communication::{
    loopback::{LoopbackConnector, LoopbackPeer},
    websocket::WebSocketConnector,
    Connector, DiagnosticLog, SocketReader, SocketWriter, Transport, TransportHandler,
    TransportOptions, WireEvent, WireMessage,
};

pub use protocol::{
    ChannelPolicy, CommandChannel, GateState, ReadinessGate, Reply, Responses, UploadJob,
    CHUNK_SIZE,
};

pub use sessions::{
    ControlSession, NetworkCheck, OutputFormat, PointCloud, ScanSession, SessionContext,
    SlicingSession, UsbConfigSession,
};
