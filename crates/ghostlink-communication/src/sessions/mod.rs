//! Device session orchestrators
//!
//! Each session owns one [`CommandChannel`] to a daemon method and composes
//! the protocol primitives into a domain flow:
//!
//! | session | method |
//! |---|---|
//! | [`ControlSession`] | `control/<deviceId>` |
//! | [`ScanSession`] | `3d-scan-control/<deviceId>` |
//! | [`SlicingSession`] | `3dprint-slicing` |
//! | [`UsbConfigSession`] | `usb-config` |
//!
//! Sessions are explicit objects: construct one per device session and pass
//! it by reference.

pub mod control;
pub mod point_cloud;
pub mod scan;
pub mod slicing;
pub mod usb_config;

pub use control::{ControlSession, FileInfo, FilamentOperation, PrintJob};
pub use point_cloud::{ChunkAssembler, Point, PointCloud, POINT_SIZE};
pub use scan::{CapturedImage, ImageStream, ScanSession};
pub use slicing::{
    Artifact, ObjectTransform, OutputFormat, ParameterResult, SceneObject, SlicingSession,
};
pub use usb_config::{NetworkCheck, SignalStrength, UsbConfigSession, WifiNetwork};

use crate::communication::{Connector, TransportOptions};
use crate::protocol::{ChannelPolicy, CommandChannel};
use ghostlink_core::{ConnectionError, Endpoint, NoOpObserver, Result, SessionObserver};
use ghostlink_settings::Config;
use std::sync::Arc;

/// Everything a session needs from its surroundings
#[derive(Clone)]
pub struct SessionContext {
    config: Config,
    connector: Arc<dyn Connector>,
    observer: Arc<dyn SessionObserver>,
    key: Option<Arc<str>>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("config", &self.config)
            .field("has_key", &self.key.is_some())
            .finish()
    }
}

impl SessionContext {
    /// Context with a no-op observer and no key material
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            observer: Arc::new(NoOpObserver),
            key: None,
        }
    }

    /// Report progress, readiness and errors to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// RSA public key (PEM) sent as the session preamble
    pub fn with_key(mut self, pem: impl Into<String>) -> Self {
        self.key = Some(Arc::from(pem.into()));
        self
    }

    /// Client configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Observer shared by sessions opened from this context
    pub fn observer(&self) -> Arc<dyn SessionObserver> {
        self.observer.clone()
    }

    /// Endpoint for `method` on the configured daemon
    pub fn endpoint(&self, method: &str) -> Endpoint {
        self.config.connection.endpoint(method)
    }

    /// Key material, required by session-oriented endpoints
    pub fn key(&self) -> Result<&str> {
        self.key.as_deref().ok_or_else(|| {
            ConnectionError::Handshake {
                reason: "no RSA key material configured".to_string(),
            }
            .into()
        })
    }

    /// Open a channel to `method`; `auto_reconnect` overrides the config
    /// when set
    pub fn open_channel(
        &self,
        method: &str,
        auto_reconnect: Option<bool>,
    ) -> Result<CommandChannel> {
        let mut options = TransportOptions::from_config(&self.config);
        if let Some(auto_reconnect) = auto_reconnect {
            options = options.with_auto_reconnect(auto_reconnect);
        }
        CommandChannel::open(
            self.endpoint(method),
            self.connector.clone(),
            options,
            ChannelPolicy::Exclusive,
        )
    }
}
