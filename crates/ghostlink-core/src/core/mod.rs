//! Connection events and observer contracts

pub mod event;
pub mod listener;

pub use event::{ConnectionEvent, EventDispatcher};
pub use listener::{NoOpObserver, SessionObserver};
