//! Call correlator — turns an asynchronous provider dispatch back into a
//! synchronous awaiter for the request that triggered it (spec §4.C).
//!
//! Used for both tool-call dispatch (`tool_call` → `tool_result`) and the
//! chat proxy (`chat_request` → `chat_response`/`chat_error`); each keyspace
//! gets its own `Correlator` instance so a collision between a `call_id` and
//! a `request_id` can never happen.

use std::time::Duration;

use dashmap::DashMap;
use rand::RngCore;
use tokio::sync::oneshot;

use crate::Error;
use crate::protocol::Content;

/// The outcome delivered to a pending call's awaiter.
#[derive(Debug)]
pub enum Outcome {
    /// A tool/chat result, success or provider-reported failure.
    Result {
        /// Result content items.
        content: Vec<Content>,
        /// Whether the provider reported failure.
        is_error: bool,
    },
    /// The broker itself failed to complete the call (timeout, routing).
    Failed(Error),
}

impl Outcome {
    /// Build a successful, single-text-item outcome.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Result {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }

    /// Build a failed, single-text-item outcome with `isError: true`.
    #[must_use]
    pub fn error_text(text: impl Into<String>) -> Self {
        Self::Result {
            content: vec![Content::text(text)],
            is_error: true,
        }
    }
}

/// Process-wide map of call/request ids awaiting a provider-side reply.
#[derive(Default)]
pub struct Correlator {
    pending: DashMap<String, oneshot::Sender<Outcome>>,
}

impl Correlator {
    /// Create an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending call, returning its id and the receiving half
    /// of its awaiter.
    pub fn begin(&self) -> (String, oneshot::Receiver<Outcome>) {
        let id = random_hex_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        (id, rx)
    }

    /// Resolve a pending call (invariant §8.1: exactly one of resolve/reject/
    /// timer-fire runs — `DashMap::remove` makes this the single winner of
    /// any race with a deadline firing in [`Self::wait`]).
    ///
    /// Returns `false` if no such call is pending (already completed, timed
    /// out, or the id was never valid) — callers should silently drop the
    /// result in that case (spec §8 boundary case: unknown `call_id`).
    pub fn complete(&self, id: &str, outcome: Outcome) -> bool {
        self.pending.remove(id).is_some_and(|(_, tx)| {
            let _ = tx.send(outcome);
            true
        })
    }

    /// Await a pending call's outcome, enforcing `deadline`. On timeout the
    /// entry is evicted so a late `complete` becomes a no-op.
    pub async fn wait(&self, id: &str, rx: oneshot::Receiver<Outcome>, deadline: Duration) -> Outcome {
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Outcome::Failed(Error::Internal("pending call dropped".to_string())),
            Err(_) => {
                self.pending.remove(id);
                Outcome::Failed(Error::Timeout(deadline.as_millis() as u64))
            }
        }
    }

    /// Number of calls currently awaiting a result.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

fn random_hex_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
