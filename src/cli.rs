//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// Tool-routing broker — bridges provider connections to a JSON-RPC tool surface
#[derive(Parser, Debug)]
#[command(name = "tool-broker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "BROKER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Provider channel (WebSocket) port
    #[arg(long, env = "BROKER_WS_PORT")]
    pub ws_port: Option<u16>,

    /// Consumer/dashboard HTTP port
    #[arg(long, env = "MCP_HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Upstream generative-model base URL
    #[arg(long, env = "OLLAMA_API_URL")]
    pub ollama_url: Option<String>,

    /// Default model for chat/ask requests
    #[arg(long, env = "OLLAMA_MODEL")]
    pub ollama_model: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "BROKER_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "BROKER_LOG_FORMAT")]
    pub log_format: Option<String>,
}
