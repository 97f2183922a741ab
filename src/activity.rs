//! Activity log, notification ring buffers, and SSE fan-out to dashboard
//! observers (spec §3, §4.G).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Kind of an [`ActivityEntry`] (spec §3).
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// A provider registered.
    Connect,
    /// A provider's channel closed or was replaced.
    Disconnect,
    /// A tool call was dispatched to a provider.
    ToolCall,
    /// A tool call completed successfully.
    ToolResult,
    /// A tool call failed (routing, execution, or timeout).
    ToolError,
    /// A chat proxy round trip completed.
    Chat,
    /// A chat proxy round trip failed.
    ChatError,
    /// A provider stored a notification.
    Notification,
}

/// One entry in the bounded activity log.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    /// When the entry was recorded.
    pub time: DateTime<Utc>,
    /// Entry kind.
    pub kind: ActivityKind,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A stored provider notification (spec §3).
#[derive(Debug, Clone, Serialize)]
pub struct StoredNotification {
    /// Source provider id.
    pub provider_id: String,
    /// Opaque event payload.
    pub event: Value,
    /// When it was stored.
    pub time: DateTime<Utc>,
}

/// A frame pushed to dashboard SSE observers (spec §4.G).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// A full registry/stats snapshot (sent on connect and on state change).
    #[serde(rename = "state")]
    State {
        /// Arbitrary snapshot payload (shape matches `GET /api/status`).
        snapshot: Value,
    },
    /// One new activity log entry.
    #[serde(rename = "activity")]
    Activity {
        /// The appended entry.
        entry: ActivityEntry,
    },
    /// One new stored notification.
    #[serde(rename = "notification")]
    Notification {
        /// The stored notification.
        notification: StoredNotification,
    },
}

struct Ring<T> {
    items: VecDeque<T>,
    cap: usize,
}

impl<T> Ring<T> {
    fn new(cap: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(cap.min(1024)),
            cap,
        }
    }

    fn push(&mut self, item: T) {
        if self.cap == 0 {
            return;
        }
        if self.items.len() >= self.cap {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    fn last_n(&self, n: usize) -> Vec<T>
    where
        T: Clone,
    {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).cloned().collect()
    }

    fn all(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.items.iter().cloned().collect()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Capacities for the activity log and notification rings.
#[derive(Debug, Clone, Copy)]
pub struct BufferCaps {
    /// Activity log cap.
    pub activity: usize,
    /// Per-provider notification ring cap.
    pub per_provider_notifications: usize,
    /// Global notification ring cap.
    pub global_notifications: usize,
}

/// Process-wide activity log, notification rings, and observer fan-out.
pub struct Activity {
    log: RwLock<Ring<ActivityEntry>>,
    global_notifications: RwLock<Ring<StoredNotification>>,
    per_provider_notifications: DashMap<String, RwLock<Ring<StoredNotification>>>,
    per_provider_cap: usize,
    observers: broadcast::Sender<Frame>,
}

impl Activity {
    /// Create a new activity/notification store with the given capacities.
    #[must_use]
    pub fn new(caps: BufferCaps) -> Self {
        let (observers, _rx) = broadcast::channel(1024);
        Self {
            log: RwLock::new(Ring::new(caps.activity)),
            global_notifications: RwLock::new(Ring::new(caps.global_notifications)),
            per_provider_notifications: DashMap::new(),
            per_provider_cap: caps.per_provider_notifications,
            observers,
        }
    }

    /// Append one activity entry and fan it out to observers (spec §4.G:
    /// append-and-broadcast is one atomic step, keeping event order equal to
    /// state-change order).
    pub fn append(&self, kind: ActivityKind, message: impl Into<String>, data: Option<Value>) {
        let entry = ActivityEntry {
            time: Utc::now(),
            kind,
            message: message.into(),
            data,
        };
        self.log.write().push(entry.clone());
        let _ = self.observers.send(Frame::Activity { entry });
    }

    /// Broadcast a state snapshot to observers (on an observer's connect, or
    /// after a registry change).
    pub fn broadcast_state(&self, snapshot: Value) {
        let _ = self.observers.send(Frame::State { snapshot });
    }

    /// Store a notification for `provider_id` into both rings and broadcast
    /// it. Returns the storage timestamp (epoch millis) for `notification_ack`.
    pub fn store_notification(&self, provider_id: &str, event: Value) -> i64 {
        let notification = StoredNotification {
            provider_id: provider_id.to_string(),
            event,
            time: Utc::now(),
        };

        self.global_notifications.write().push(notification.clone());
        self.per_provider_notifications
            .entry(provider_id.to_string())
            .or_insert_with(|| RwLock::new(Ring::new(self.per_provider_cap)))
            .write()
            .push(notification.clone());

        let timestamp = notification.time.timestamp_millis();
        let _ = self.observers.send(Frame::Notification { notification });
        timestamp
    }

    /// Fetch the last `limit` notifications, scoped to one provider or
    /// global across all providers.
    #[must_use]
    pub fn notifications(&self, provider_id: Option<&str>, limit: usize) -> Vec<StoredNotification> {
        match provider_id {
            Some(id) => self
                .per_provider_notifications
                .get(id)
                .map(|ring| ring.read().last_n(limit))
                .unwrap_or_default(),
            None => self.global_notifications.read().last_n(limit),
        }
    }

    /// Drop a provider's per-provider notification ring. Called on explicit
    /// disconnect/unregister; replacement-by-reconnect intentionally does
    /// not call this, so notification history survives the reconnect gap
    /// (spec §9 open question, decided in DESIGN.md).
    pub fn clear_provider_notifications(&self, provider_id: &str) {
        self.per_provider_notifications.remove(provider_id);
    }

    /// The full bounded activity log, oldest first.
    #[must_use]
    pub fn activity_log(&self) -> Vec<ActivityEntry> {
        self.log.read().all()
    }

    /// Activity log filtered to entries whose `data.provider_id` (or message
    /// prefix) names `provider_id`. Used by `GET /api/client/:id/activity`.
    #[must_use]
    pub fn activity_log_for(&self, provider_id: &str) -> Vec<ActivityEntry> {
        self.log
            .read()
            .all()
            .into_iter()
            .filter(|e| {
                e.data
                    .as_ref()
                    .and_then(|d| d.get("provider_id"))
                    .and_then(Value::as_str)
                    == Some(provider_id)
            })
            .collect()
    }

    /// Number of entries currently in the activity log.
    #[must_use]
    pub fn activity_len(&self) -> usize {
        self.log.read().len()
    }

    /// Subscribe a new dashboard observer to the live frame stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.observers.subscribe()
    }
}
