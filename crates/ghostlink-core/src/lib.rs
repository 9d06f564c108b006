//! # ghostlink Core
//!
//! Core types, traits, and utilities shared by the ghostlink crates.
//! Provides the wire data model spoken with the device-control daemon,
//! the error taxonomy, connection events, and the observer contract used
//! by session orchestrators to report back to a front-end.

pub mod core;
pub mod data;
pub mod error;

pub use core::{
    event::{ConnectionEvent, EventDispatcher},
    listener::{NoOpObserver, SessionObserver},
};

pub use data::{CloseCode, ConnectionState, Endpoint, Frame, StatusFrame};

pub use error::{ConnectionError, Error, ProtocolError, Result};
