//! Error handling for ghostlink
//!
//! Provides error types for every layer of the protocol stack:
//! - Protocol errors (server-reported `error` / `fatal`, readiness timeouts,
//!   single-flight violations)
//! - Connection errors (socket, endpoint, handshake)
//!
//! All error types use `thiserror` for ergonomic error handling.

use crate::data::{CloseCode, StatusFrame};
use thiserror::Error;

/// Protocol error type
///
/// Represents failures reported by, or detected while talking to, the
/// device-control daemon. The connection itself may still be usable.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// Server answered `status: error`; recoverable, connection stays open
    #[error("Command rejected: {payload}")]
    Rejected {
        /// The server payload, unmodified.
        payload: StatusFrame,
    },

    /// Server answered `status: fatal`; the session is dead
    #[error("Fatal error from device: {payload}")]
    Fatal {
        /// The server payload, unmodified.
        payload: StatusFrame,
    },

    /// Domain `fail` status (scan/calibration endpoints)
    #[error("Operation failed: {payload}")]
    Failed {
        /// The server payload, unmodified.
        payload: StatusFrame,
    },

    /// Device did not become ready in time
    #[error("TIMEOUT after {timeout_ms}ms")]
    Timeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// A command is already in flight on this channel
    #[error("Channel busy: '{pending}' is still awaiting its response")]
    ChannelBusy {
        /// The command currently in flight.
        pending: String,
    },

    /// The invocation was replaced by a newer one before it resolved
    #[error("Command was preempted by a newer invocation")]
    Preempted,

    /// A frame arrived that the current flow cannot interpret
    #[error("Unexpected response: {status}")]
    UnexpectedResponse {
        /// Status (or frame kind) that was received.
        status: String,
    },
}

/// Connection error type
///
/// Represents errors related to the WebSocket link to the daemon.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Connection lost
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// Socket closed while a response was pending
    #[error("Connection closed with code {code}")]
    Closed {
        /// The close code.
        code: CloseCode,
    },

    /// WebSocket error
    #[error("WebSocket error: {reason}")]
    WebSocketError {
        /// The reason for the WebSocket error.
        reason: String,
    },

    /// Endpoint cannot be dialed
    #[error("Invalid endpoint: {reason}")]
    InvalidEndpoint {
        /// The reason the endpoint is invalid.
        reason: String,
    },

    /// Session preamble (key exchange, connect) failed
    #[error("Handshake failed: {reason}")]
    Handshake {
        /// The reason for the handshake failure.
        reason: String,
    },

    /// Invalid parameters passed to a session operation
    #[error("Invalid parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },
}

/// Main error type for ghostlink
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Shorthand for a server `error` payload
    pub fn rejected(payload: StatusFrame) -> Self {
        ProtocolError::Rejected { payload }.into()
    }

    /// Shorthand for a server `fatal` payload
    pub fn fatal(payload: StatusFrame) -> Self {
        ProtocolError::Fatal { payload }.into()
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Protocol(ProtocolError::Timeout { .. }))
    }

    /// Check if this is a fatal error
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Protocol(ProtocolError::Fatal { .. }))
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a protocol error
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    /// Structured payload for the notification collaborator.
    ///
    /// Server payloads are returned unmodified; locally detected failures
    /// are rendered as `{status: "error", ...}`.
    pub fn status_frame(&self) -> StatusFrame {
        match self {
            Error::Protocol(ProtocolError::Rejected { payload })
            | Error::Protocol(ProtocolError::Fatal { payload })
            | Error::Protocol(ProtocolError::Failed { payload }) => payload.clone(),
            Error::Protocol(ProtocolError::Timeout { .. }) => StatusFrame::timeout(),
            other => StatusFrame::new("error").with_field("message", other.to_string()),
        }
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
