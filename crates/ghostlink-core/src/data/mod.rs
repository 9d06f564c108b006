//! Data models for the device-control wire protocol
//!
//! Provides:
//! - Connection endpoint addressing (`ws://host:port/ws/<method>`)
//! - Connection lifecycle state
//! - WebSocket close codes
//! - Inbound frame model (see [`frame`])

pub mod frame;

pub use frame::{Frame, StatusFrame};

use crate::error::{ConnectionError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical address of a daemon command channel.
///
/// The `method` path segment selects the server-side command handler, e.g.
/// `control/<deviceId>`, `3d-scan-control/<deviceId>`, `3dprint-slicing` or
/// `usb-config`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Daemon host name
    pub host: String,
    /// Daemon port
    pub port: u16,
    /// Method path selecting the command handler
    pub method: String,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16, method: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            method: method.into(),
        }
    }

    /// Same host and port, different method
    pub fn with_method(&self, method: impl Into<String>) -> Self {
        Self {
            host: self.host.clone(),
            port: self.port,
            method: method.into(),
        }
    }

    /// Path component, `/ws/<method>`
    pub fn path(&self) -> String {
        format!("/ws/{}", self.method)
    }

    /// Full WebSocket URL
    pub fn url(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.port, self.path())
    }

    /// Check that the endpoint can be dialed
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ConnectionError::InvalidEndpoint {
                reason: "host is empty".to_string(),
            }
            .into());
        }
        if self.port == 0 {
            return Err(ConnectionError::InvalidEndpoint {
                reason: "port must be > 0".to_string(),
            }
            .into());
        }
        if self.method.contains(char::is_whitespace) {
            return Err(ConnectionError::InvalidEndpoint {
                reason: format!("method '{}' contains whitespace", self.method),
            }
            .into());
        }
        Ok(())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

/// Lifecycle state of one physical socket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    /// Socket is being established
    Connecting,
    /// Socket is open and frames flow
    Open,
    /// Close has been requested, waiting for the socket to finish
    Closing,
    /// No socket
    #[default]
    Closed,
}

impl ConnectionState {
    /// Check if a transition from this state to `target` is valid.
    ///
    /// Returns `true` for valid transitions:
    /// - Closed → Connecting
    /// - Connecting → Open, Closed
    /// - Open → Closing, Closed
    /// - Closing → Closed
    pub fn can_transition_to(&self, target: ConnectionState) -> bool {
        use ConnectionState::*;
        if *self == target {
            return true;
        }
        matches!(
            (self, target),
            (Closed, Connecting)
                | (Connecting, Open | Closed)
                | (Open, Closing | Closed)
                | (Closing, Closed)
        )
    }

    /// True only for `Open`
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// WebSocket close code (RFC 6455 section 7.4.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// Normal closure
    pub const NORMAL: CloseCode = CloseCode(1000);
    /// Endpoint going away
    pub const GOING_AWAY: CloseCode = CloseCode(1001);
    /// Reserved: connection dropped without a close frame
    pub const ABNORMAL: CloseCode = CloseCode(1006);

    /// True when the socket closed without a close frame
    pub fn is_abnormal(&self) -> bool {
        *self == Self::ABNORMAL
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url() {
        let endpoint = Endpoint::new("localhost", 8000, "control/ab12");
        assert_eq!(endpoint.url(), "ws://localhost:8000/ws/control/ab12");
        assert_eq!(endpoint.path(), "/ws/control/ab12");
        assert_eq!(
            endpoint.with_method("usb-config").url(),
            "ws://localhost:8000/ws/usb-config"
        );
    }

    #[test]
    fn test_endpoint_validate() {
        assert!(Endpoint::new("localhost", 8000, "3dprint-slicing")
            .validate()
            .is_ok());
        assert!(Endpoint::new("", 8000, "x").validate().is_err());
        assert!(Endpoint::new("localhost", 0, "x").validate().is_err());
        assert!(Endpoint::new("localhost", 8000, "a b").validate().is_err());
    }

    #[test]
    fn test_state_transitions() {
        use ConnectionState::*;
        assert!(Closed.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Open));
        assert!(Open.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Closing.can_transition_to(Open));
    }

    #[test]
    fn test_close_code() {
        assert!(CloseCode::ABNORMAL.is_abnormal());
        assert!(!CloseCode::NORMAL.is_abnormal());
        assert_eq!(CloseCode(1006), CloseCode::ABNORMAL);
    }
}
