//! Error types for the tool broker

use std::io;

use thiserror::Error;

/// Result type alias for the tool broker
pub type Result<T> = std::result::Result<T, Error>;

/// Broker errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A namespaced tool referenced a provider that is not currently registered
    #[error("Broker client \"{0}\" not connected")]
    ProviderNotConnected(String),

    /// No built-in or namespaced tool matched the requested name
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// A pending call or chat request's deadline elapsed before completion
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// Malformed or out-of-order provider channel message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Provider channel read/write failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Upstream HTTP error (chat proxy)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map to a JSON-RPC error code for the consumer-facing `/mcp` endpoint.
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::Protocol(_) => rpc_codes::INVALID_REQUEST,
            Self::UnknownTool(_) => rpc_codes::METHOD_NOT_FOUND,
            Self::ProviderNotConnected(_) | Self::Timeout(_) | Self::Transport(_) => {
                rpc_codes::SERVER_ERROR_START
            }
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }
}

/// Standard JSON-RPC error codes
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Server error range start
    pub const SERVER_ERROR_START: i32 = -32000;
}
