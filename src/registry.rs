//! Provider registry — who is connected, what they publish, and the
//! replacement-on-reconnect policy (spec §3, §4.B).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::protocol::{ProviderMessage, ToolDescriptor};

/// A frame queued for a provider's outbound writer, or an instruction to
/// close the channel once any queued frames have drained.
#[derive(Debug)]
pub enum OutboundFrame {
    /// Write this frame to the provider's channel.
    Message(ProviderMessage),
    /// Close the channel after any prior frames have been written.
    Close,
}

/// Send side of a provider's channel, held by the Registry and by anything
/// dispatching a `tool_call`/`chat_response` to the provider.
#[derive(Debug, Clone)]
pub struct ProviderHandle {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl ProviderHandle {
    /// Wrap the sending half of a provider's outbound queue.
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        Self { tx }
    }

    /// Queue a frame for delivery. Returns `false` if the channel is gone.
    pub fn send(&self, message: ProviderMessage) -> bool {
        self.tx.send(OutboundFrame::Message(message)).is_ok()
    }

    /// Queue a session-level error frame followed by a close instruction —
    /// the replacement-on-reconnect policy (spec §4.B).
    pub fn close(&self, reason: &str) {
        let _ = self.tx.send(OutboundFrame::Message(ProviderMessage::Error {
            message: format!("Closed: {reason}"),
        }));
        let _ = self.tx.send(OutboundFrame::Close);
    }
}

/// A registered provider: its channel handle, published tools, and
/// registration epoch (used to reject a stale session's own cleanup after
/// it has been replaced).
pub struct ProviderEntry {
    /// Sanitized provider id.
    pub provider_id: String,
    /// Send side of this provider's channel.
    pub handle: ProviderHandle,
    /// Published tool descriptors, in declaration order.
    pub tools: Vec<ToolDescriptor>,
    /// When this registration was accepted.
    pub connected_at: DateTime<Utc>,
    /// Monotonic token identifying this particular registration; a session
    /// whose epoch no longer matches the live entry has been replaced and
    /// must not run its own disconnect cleanup.
    pub epoch: u64,
}

/// Dashboard-facing snapshot of one registered provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSnapshot {
    /// Provider id.
    pub id: String,
    /// Registration time (RFC 3339).
    pub connected_at: DateTime<Utc>,
    /// Tool names this provider publishes.
    pub tools: Vec<String>,
}

/// Process-wide map of connected providers.
#[derive(Default)]
pub struct Registry {
    entries: DashMap<String, Arc<ProviderEntry>>,
    epoch_counter: AtomicU64,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next registration epoch.
    pub fn next_epoch(&self) -> u64 {
        self.epoch_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert a new entry, returning whatever entry previously occupied
    /// that provider id (the caller is responsible for closing its channel
    /// — spec §4.B replacement policy).
    pub fn insert_or_replace(&self, entry: Arc<ProviderEntry>) -> Option<Arc<ProviderEntry>> {
        self.entries.insert(entry.provider_id.clone(), entry)
    }

    /// Look up a provider by id.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<Arc<ProviderEntry>> {
        self.entries.get(id).map(|e| Arc::clone(&e))
    }

    /// Remove an entry unconditionally (explicit `unregister`).
    pub fn remove(&self, id: &str) -> Option<Arc<ProviderEntry>> {
        self.entries.remove(id).map(|(_, v)| v)
    }

    /// Remove an entry only if it is still at the given epoch. Used by a
    /// session's own disconnect cleanup so a replaced session cannot evict
    /// the entry installed by its replacement.
    pub fn remove_if_current(&self, id: &str, epoch: u64) -> Option<Arc<ProviderEntry>> {
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(occupied) if occupied.get().epoch == epoch => Some(occupied.remove()),
            _ => None,
        }
    }

    /// All registered providers, for `tools/list` fan-out and dashboards.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ProviderSnapshot> {
        self.entries
            .iter()
            .map(|e| ProviderSnapshot {
                id: e.provider_id.clone(),
                connected_at: e.connected_at,
                tools: e.tools.iter().map(|t| t.name.clone()).collect(),
            })
            .collect()
    }

    /// Number of currently registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry has no registered providers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sanitize a requested client id to `[A-Za-z0-9_-]`, replacing any other
/// character with `_`. An empty result (including an absent id) is replaced
/// with a random `rc_<8 hex>` id (spec §3).
#[must_use]
pub fn sanitize_provider_id(requested: Option<&str>) -> String {
    let sanitized: String = requested
        .unwrap_or("")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();

    if sanitized.is_empty() {
        let suffix: [u8; 4] = rand::rng().random();
        format!("rc_{}", hex::encode(suffix))
    } else {
        sanitized
    }
}
