//! tool-broker
//!
//! A tool-routing broker bridging long-lived provider connections to a
//! JSON-RPC tool-invocation surface consumers can treat as a single server.
//!
//! # Components
//!
//! - **Provider Session** (`session`): per-connection frame loop over the
//!   WebSocket provider channel.
//! - **Registry** (`registry`): who is connected, what they publish.
//! - **Call Correlator** (`correlator`): turns an async provider dispatch
//!   back into a synchronous awaiter.
//! - **Router** (`router`): built-in tools and namespaced provider dispatch.
//! - **Chat Proxy** (`chat`): forwards provider chat requests upstream.
//! - **Activity & Event Fan-out** (`activity`): bounded logs, SSE observers.
//! - **Consumer Adapter** (`consumer`): the JSON-RPC `/mcp` surface.
//! - **Dashboard** (`dashboard`): snapshot, activity, and SSE HTTP endpoints.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod activity;
pub mod broker;
pub mod chat;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod correlator;
pub mod dashboard;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod session;
pub mod stats;
pub mod ws;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Set up global tracing/logging once at process start.
///
/// # Errors
///
/// This implementation never fails but returns a [`Result`] to match the
/// fallible shape of other setup steps.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
