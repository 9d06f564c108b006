//! Inbound frame model
//!
//! A frame is one WebSocket message received from the daemon. Structured
//! frames are JSON objects carrying a `status` field; binary frames carry no
//! envelope at all and are told apart only by message type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Status values reserved by the wire protocol
pub mod status {
    /// Session-oriented endpoint is dialing the device
    pub const CONNECTING: &str = "connecting";
    /// Device link established, not necessarily ready
    pub const CONNECTED: &str = "connected";
    /// Device accepts the next command
    pub const READY: &str = "ready";
    /// Command finished successfully
    pub const OK: &str = "ok";
    /// Server requests the next binary payload
    pub const CONTINUE: &str = "continue";
    /// Recoverable protocol error
    pub const ERROR: &str = "error";
    /// Unrecoverable error, the connection is dead
    pub const FATAL: &str = "fatal";
    /// Heartbeat response
    pub const PONG: &str = "pong";
    /// Domain failure reported by session endpoints
    pub const FAIL: &str = "fail";
}

/// A structured frame: a JSON object whose `status` field is a string.
///
/// The whole object is kept so domain fields (`percentage`, `left`,
/// `location`, ...) stay reachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct StatusFrame(Map<String, Value>);

impl StatusFrame {
    /// Create a frame with only a status
    pub fn new(status: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("status".to_string(), Value::String(status.into()));
        Self(map)
    }

    /// The synthetic `{status: "error", message: "TIMEOUT"}` payload
    pub fn timeout() -> Self {
        Self::new(status::ERROR).with_field("message", "TIMEOUT")
    }

    /// Build from an arbitrary JSON value; `None` unless it is an object
    /// with a string `status`
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Self::try_from(map).ok(),
            _ => None,
        }
    }

    /// Add or replace a field
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        if key != "status" {
            self.0.insert(key.to_string(), value.into());
        }
        self
    }

    /// The status string
    pub fn status(&self) -> &str {
        self.0
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Case-sensitive status check
    pub fn is(&self, status: &str) -> bool {
        self.status() == status
    }

    /// Raw field access
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String field
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Numeric field; numeric strings are accepted since the daemon is not
    /// consistent about quoting
    pub fn f64_field(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Integer field, same leniency as [`StatusFrame::f64_field`]
    pub fn i64_field(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Human readable detail: `message`, then `error`, then `info`
    pub fn message(&self) -> Option<&str> {
        ["message", "error", "info"]
            .iter()
            .find_map(|key| self.str_field(key))
    }

    /// Borrow the underlying object
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Convert to a JSON value
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl TryFrom<Map<String, Value>> for StatusFrame {
    type Error = String;

    fn try_from(map: Map<String, Value>) -> std::result::Result<Self, Self::Error> {
        match map.get("status") {
            Some(Value::String(_)) => Ok(Self(map)),
            _ => Err("object has no string `status` field".to_string()),
        }
    }
}

impl From<StatusFrame> for Map<String, Value> {
    fn from(frame: StatusFrame) -> Self {
        frame.0
    }
}

impl fmt::Display for StatusFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}

/// One inbound message after decoding
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// JSON object with a `status`
    Status(StatusFrame),
    /// Opaque binary payload chunk
    Binary(Vec<u8>),
    /// Text that is not a status object (non-JSON, or JSON without status)
    Text(String),
}

impl Frame {
    /// Status of a structured frame
    pub fn status(&self) -> Option<&str> {
        match self {
            Frame::Status(frame) => Some(frame.status()),
            _ => None,
        }
    }

    /// True if this is a structured frame with the given status
    pub fn is_status(&self, status: &str) -> bool {
        self.status() == Some(status)
    }

    /// Structured frame, if any
    pub fn as_status(&self) -> Option<&StatusFrame> {
        match self {
            Frame::Status(frame) => Some(frame),
            _ => None,
        }
    }

    /// True for binary frames
    pub fn is_binary(&self) -> bool {
        matches!(self, Frame::Binary(_))
    }

    /// Payload size in bytes, used for diagnostics
    pub fn len(&self) -> usize {
        match self {
            Frame::Status(frame) => frame.to_string().len(),
            Frame::Binary(data) => data.len(),
            Frame::Text(text) => text.len(),
        }
    }

    /// True if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Status(frame) => write!(f, "{}", frame),
            Frame::Binary(data) => write!(f, "<binary {} bytes>", data.len()),
            Frame::Text(text) => write!(f, "{}", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_frame_from_value() {
        let frame = StatusFrame::from_value(json!({"status": "ok", "path": "/SD"})).unwrap();
        assert!(frame.is(status::OK));
        assert_eq!(frame.str_field("path"), Some("/SD"));

        assert!(StatusFrame::from_value(json!({"status": 3})).is_none());
        assert!(StatusFrame::from_value(json!(["ok"])).is_none());
    }

    #[test]
    fn test_numeric_fields_accept_strings() {
        let frame =
            StatusFrame::from_value(json!({"status": "chunk", "left": "12", "right": 4})).unwrap();
        assert_eq!(frame.i64_field("left"), Some(12));
        assert_eq!(frame.i64_field("right"), Some(4));
        assert_eq!(frame.f64_field("missing"), None);
    }

    #[test]
    fn test_timeout_payload() {
        let frame = StatusFrame::timeout();
        assert_eq!(frame.to_value(), json!({"status": "error", "message": "TIMEOUT"}));
        assert_eq!(frame.message(), Some("TIMEOUT"));
    }

    #[test]
    fn test_status_cannot_be_overwritten() {
        let frame = StatusFrame::new("ok").with_field("status", "error");
        assert!(frame.is("ok"));
    }

    #[test]
    fn test_serde_roundtrip_keeps_fields() {
        let frame = StatusFrame::new("position").with_field("location", "PlayTask");
        let text = serde_json::to_string(&frame).unwrap();
        let back: StatusFrame = serde_json::from_str(&text).unwrap();
        assert_eq!(back, frame);
        assert!(serde_json::from_str::<StatusFrame>("{\"nostatus\":1}").is_err());
    }
}
