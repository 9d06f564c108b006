//! # ghostlink
//!
//! Client for the device-control daemon that drives 3D printers, laser
//! cutters and 3D scanners over WebSocket.
//!
//! ## Architecture
//!
//! ghostlink is organized as a workspace with multiple crates:
//!
//! 1. **ghostlink-core** - Wire data model, errors, connection events, observer trait
//! 2. **ghostlink-settings** - Configuration file handling and validation
//! 3. **ghostlink-communication** - Transport, command channel, uploads, readiness gate
//!    and the device session orchestrators
//! 4. **ghostlink** - Command-line front-end that integrates all crates
//!
//! ## Sessions
//!
//! - **Control**: file listing, printing, firmware and toolhead updates, maintenance
//! - **Scan**: camera preview, calibration and point-cloud capture
//! - **Slicing**: model upload, placement, parameters and G-code/F-code generation
//! - **USB config**: serial port discovery, Wi-Fi, name and password setup

pub use ghostlink_communication::{communication, protocol, sessions};

pub use ghostlink_core::{
    ConnectionError, ConnectionEvent, ConnectionState, Endpoint, Error, EventDispatcher, Frame,
    NoOpObserver, ProtocolError, Result, SessionObserver, StatusFrame,
};

pub use ghostlink_communication::{
    ChannelPolicy, CommandChannel, Connector, ControlSession, LoopbackConnector, LoopbackPeer,
    NetworkCheck, OutputFormat, PointCloud, ReadinessGate, ScanSession, SessionContext,
    SlicingSession, Transport, TransportOptions, UsbConfigSession, WebSocketConnector,
};

pub use ghostlink_settings::{Config, ConnectionSettings, DiagnosticsSettings, ProtocolSettings};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging
///
/// Sets up structured logging with:
/// - Output on stderr, keeping stdout for command results
/// - RUST_LOG environment variable support
/// - `level` as the floor when RUST_LOG is unset
pub fn init_logging(level: tracing::Level) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
