//! Exportable per-connection traffic log
//!
//! Separate from `tracing`: this is the record a user attaches to a bug
//! report after an abnormal disconnection. Entries are short, timestamped,
//! and the buffer is bounded.

use super::WireMessage;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Maximum characters kept per entry
pub const ENTRY_LIMIT: usize = 100;

/// Marker appended when a socket drops without a close frame
pub const ABNORMAL_MARKER: &str = "**abnormal disconnection**";

/// Trim an entry to [`ENTRY_LIMIT`] characters, ending in `...` when cut
pub fn trim_entry(entry: &str) -> String {
    if entry.chars().count() > ENTRY_LIMIT {
        let mut trimmed: String = entry.chars().take(ENTRY_LIMIT - 3).collect();
        trimmed.push_str("...");
        trimmed
    } else {
        entry.to_string()
    }
}

fn time_label() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

/// Bounded log of sent and received traffic for one endpoint
#[derive(Debug)]
pub struct DiagnosticLog {
    path: String,
    capacity: usize,
    entries: Mutex<VecDeque<String>>,
}

impl DiagnosticLog {
    /// Create a log for the endpoint path `/ws/<method>`
    pub fn new(path: impl Into<String>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn push(&self, entry: String) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Record an outbound message
    pub fn record_sent(&self, message: &WireMessage) {
        self.push(trim_entry(&format!("{} sent {}", time_label(), message)));
    }

    /// Record a heartbeat ping
    pub fn record_ping(&self) {
        self.push("sent ping".to_string());
    }

    /// Record an inbound text message, before sanitizing
    pub fn record_received(&self, raw: &str) {
        self.push(trim_entry(&format!("{} recv {}", time_label(), raw)));
    }

    /// Record an inbound binary message
    pub fn record_received_binary(&self, len: usize) {
        self.push(format!("{} recv <binary {} bytes>", time_label(), len));
    }

    /// Record a free-form note such as [`ABNORMAL_MARKER`]
    pub fn record_note(&self, note: &str) {
        self.push(trim_entry(&format!("{} {}", time_label(), note)));
    }

    /// Endpoint path this log belongs to
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Snapshot of the entries, oldest first
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Number of entries held
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render for export: the endpoint path, then one entry per line
    pub fn export(&self) -> String {
        let entries = self.entries.lock();
        let mut out = String::with_capacity(self.path.len() + entries.len() * ENTRY_LIMIT);
        out.push_str(&self.path);
        out.push('\n');
        for entry in entries.iter() {
            out.push_str(entry);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_entry() {
        let long = "x".repeat(150);
        let trimmed = trim_entry(&long);
        assert_eq!(trimmed.chars().count(), ENTRY_LIMIT);
        assert!(trimmed.ends_with("..."));
        assert_eq!(trim_entry("short"), "short");
        assert_eq!(trim_entry(&"y".repeat(100)), "y".repeat(100));
    }

    #[test]
    fn test_log_is_bounded() {
        let log = DiagnosticLog::new("/ws/usb-config", 3);
        for i in 0..5 {
            log.record_note(&format!("note {i}"));
        }
        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].ends_with("note 2"));
        assert!(entries[2].ends_with("note 4"));
    }

    #[test]
    fn test_export_format() {
        let log = DiagnosticLog::new("/ws/3dprint-slicing", 10);
        log.record_sent(&WireMessage::from("get_path"));
        log.record_ping();
        log.record_received_binary(4096);

        let export = log.export();
        let lines: Vec<&str> = export.lines().collect();
        assert_eq!(lines[0], "/ws/3dprint-slicing");
        assert!(lines[1].ends_with("sent get_path"));
        assert_eq!(lines[2], "sent ping");
        assert!(lines[3].ends_with("recv <binary 4096 bytes>"));
    }
}
