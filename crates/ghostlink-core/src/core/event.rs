//! Event system for connection lifecycle
//!
//! Provides:
//! - Event types for connection open/close, abnormal disconnection and fatal errors
//! - Event dispatcher for publishing events to subscribers (alerting, UI banners)

use crate::data::{CloseCode, StatusFrame};
use tokio::sync::broadcast;

/// Connection event types
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Socket opened
    Opened {
        /// Endpoint path, `/ws/<method>`.
        endpoint: String,
    },
    /// Socket closed
    Closed {
        /// Endpoint path, `/ws/<method>`.
        endpoint: String,
        /// Close code reported for the socket.
        code: CloseCode,
    },
    /// Socket dropped without a close frame on a connection old enough to
    /// be worth alerting about
    AbnormalDisconnect {
        /// Endpoint path, `/ws/<method>`.
        endpoint: String,
        /// Whether any frame was ever received on this connection.
        ever_connected: bool,
    },
    /// Server reported a fatal error
    Fatal {
        /// Endpoint path, `/ws/<method>`.
        endpoint: String,
        /// The payload, unmodified.
        payload: StatusFrame,
    },
    /// A fresh socket is being opened after a close
    Reconnecting {
        /// Endpoint path, `/ws/<method>`.
        endpoint: String,
    },
}

impl ConnectionEvent {
    /// Alert text for events that warrant a blocking dialog with log export
    pub fn alert_message(&self) -> Option<&'static str> {
        match self {
            ConnectionEvent::AbnormalDisconnect {
                ever_connected: false,
                ..
            } => Some("Unable to establish a connection with the device service"),
            ConnectionEvent::AbnormalDisconnect {
                ever_connected: true,
                ..
            } => Some("The device service stopped responding; export the error log for support"),
            ConnectionEvent::Fatal { .. } => {
                Some("The device reported an unrecoverable error; the session has ended")
            }
            _ => None,
        }
    }

    /// True for events that should offer a diagnostic log export
    pub fn offers_log_export(&self) -> bool {
        self.alert_message().is_some()
    }
}

impl std::fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionEvent::Opened { endpoint } => write!(f, "Opened {}", endpoint),
            ConnectionEvent::Closed { endpoint, code } => {
                write!(f, "Closed {} (code {})", endpoint, code)
            }
            ConnectionEvent::AbnormalDisconnect {
                endpoint,
                ever_connected,
            } => write!(
                f,
                "Abnormal disconnection on {} (ever connected: {})",
                endpoint, ever_connected
            ),
            ConnectionEvent::Fatal { endpoint, payload } => {
                write!(f, "Fatal on {}: {}", endpoint, payload)
            }
            ConnectionEvent::Reconnecting { endpoint } => write!(f, "Reconnecting {}", endpoint),
        }
    }
}

/// Event dispatcher for publishing events to subscribers
#[derive(Clone)]
pub struct EventDispatcher {
    /// Broadcast sender channel for connection events.
    tx: broadcast::Sender<ConnectionEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the broadcast buffer (default 100)
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size);
        Self { tx }
    }

    /// Create a new event dispatcher with default buffer size
    pub fn default_with_buffer() -> Self {
        Self::new(100)
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers.
    ///
    /// Having no subscribers is not an error; the count of receivers reached
    /// is returned.
    pub fn publish(&self, event: ConnectionEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::default_with_buffer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let dispatcher = EventDispatcher::default();
        let mut rx = dispatcher.subscribe();
        assert_eq!(dispatcher.subscriber_count(), 1);

        let reached = dispatcher.publish(ConnectionEvent::Opened {
            endpoint: "/ws/usb-config".into(),
        });
        assert_eq!(reached, 1);

        match rx.recv().await.unwrap() {
            ConnectionEvent::Opened { endpoint } => assert_eq!(endpoint, "/ws/usb-config"),
            other => panic!("unexpected event {other}"),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let dispatcher = EventDispatcher::new(4);
        assert_eq!(
            dispatcher.publish(ConnectionEvent::Reconnecting {
                endpoint: "/ws/x".into()
            }),
            0
        );
    }

    #[test]
    fn test_alert_messages_differ_by_history() {
        let never = ConnectionEvent::AbnormalDisconnect {
            endpoint: "/ws/x".into(),
            ever_connected: false,
        };
        let after_use = ConnectionEvent::AbnormalDisconnect {
            endpoint: "/ws/x".into(),
            ever_connected: true,
        };
        assert_ne!(never.alert_message(), after_use.alert_message());
        assert!(never.offers_log_export());
        assert!(!ConnectionEvent::Opened {
            endpoint: "/ws/x".into()
        }
        .offers_log_export());
    }
}
