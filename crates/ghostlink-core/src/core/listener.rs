//! Session observer interface
//!
//! Defines the narrow callback contract through which session orchestrators
//! report to UI collaborators (progress sinks, ready notifications, error
//! banners).

use crate::data::StatusFrame;

/// Observer trait for session orchestrators
///
/// Implement this trait to receive progress, readiness and error
/// notifications. Every method has an empty default.
pub trait SessionObserver: Send + Sync {
    /// Called with `(step, total)` as a multi-step operation advances
    fn on_progress(&self, _step: usize, _total: usize) {}

    /// Called when a session-oriented endpoint reports `ready`
    fn on_ready(&self) {}

    /// Called with a structured error payload
    fn on_error(&self, _payload: &StatusFrame) {}

    /// Called with intermediate status frames (e.g. `loading`, `warning`)
    fn on_status(&self, _frame: &StatusFrame) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl SessionObserver for NoOpObserver {}
