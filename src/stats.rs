//! Process-wide monotonic counters (spec §3 "Stats counters").

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Monotonic broker-wide counters.
#[derive(Debug, Default)]
pub struct Stats {
    tool_calls: AtomicU64,
    tool_errors: AtomicU64,
    chat_requests: AtomicU64,
    chat_errors: AtomicU64,
    total_connections: AtomicU64,
    notifications: AtomicU64,
}

impl Stats {
    /// Create a fresh, zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tool call dispatch (invariant: `tool_calls >= tool_errors`).
    pub fn record_tool_call(&self) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tool call failure (routing, execution, or timeout).
    pub fn record_tool_error(&self) {
        self.tool_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a chat proxy request (invariant: `chat_requests >= chat_errors`).
    pub fn record_chat_request(&self) {
        self.chat_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a chat proxy failure.
    pub fn record_chat_error(&self) {
        self.chat_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a new provider connection (registration).
    pub fn record_connection(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stored notification.
    pub fn record_notification(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            tool_errors: self.tool_errors.load(Ordering::Relaxed),
            chat_requests: self.chat_requests.load(Ordering::Relaxed),
            chat_errors: self.chat_errors.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time read of [`Stats`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Total tool call dispatches.
    pub tool_calls: u64,
    /// Tool calls that resulted in an error (routing, execution, or timeout).
    pub tool_errors: u64,
    /// Total chat proxy requests.
    pub chat_requests: u64,
    /// Chat proxy requests that failed.
    pub chat_errors: u64,
    /// Total provider registrations since process start.
    pub total_connections: u64,
    /// Total notifications stored.
    pub notifications: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let stats = Stats::new();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.tool_calls, 0);
        assert_eq!(snapshot.tool_errors, 0);
    }

    #[test]
    fn tool_calls_never_less_than_errors() {
        let stats = Stats::new();
        stats.record_tool_call();
        stats.record_tool_call();
        stats.record_tool_error();
        let snapshot = stats.snapshot();
        assert!(snapshot.tool_calls >= snapshot.tool_errors);
        assert_eq!(snapshot.tool_calls, 2);
        assert_eq!(snapshot.tool_errors, 1);
    }

    #[test]
    fn chat_requests_never_less_than_errors() {
        let stats = Stats::new();
        stats.record_chat_request();
        stats.record_chat_error();
        let snapshot = stats.snapshot();
        assert!(snapshot.chat_requests >= snapshot.chat_errors);
    }

    #[test]
    fn connections_and_notifications_accumulate() {
        let stats = Stats::new();
        stats.record_connection();
        stats.record_connection();
        stats.record_notification();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_connections, 2);
        assert_eq!(snapshot.notifications, 1);
    }
}
