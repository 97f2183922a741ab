//! Configuration management

use std::time::Duration;

use figment::{
    Figment,
    providers::{Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server (listener) configuration
    pub server: ServerConfig,
    /// Upstream generative-model endpoint configuration
    pub upstream: UpstreamConfig,
    /// Call correlator deadlines
    pub correlator: CorrelatorConfig,
    /// Ring buffer capacities for activity/notifications
    pub buffers: BufferConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            correlator: CorrelatorConfig::default(),
            buffers: BufferConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from an optional YAML file, overlaid with
    /// environment variables (`BROKER_*`, `OLLAMA_*`, `MCP_HTTP_PORT`).
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML file exists but fails to parse, or if
    /// environment variables fail to coerce into the expected types.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }

        // Environment overrides take precedence over both defaults and the
        // YAML file, so they're merged last. Routed through `figment` (as a
        // nested `Serialized` provider, skipping absent vars) rather than
        // hand-applied after extraction, so there is a single code path for
        // every source.
        figment = figment.merge(Serialized::defaults(EnvOverrides::from_process_env()));

        figment.extract().map_err(|e| crate::Error::Config(e.to_string()))
    }
}

/// Env-derived overrides, shaped to mirror [`Config`]'s nesting so they can
/// be merged in as a `figment` provider; absent vars serialize to nothing.
#[derive(Debug, Default, Serialize)]
struct EnvOverrides {
    #[serde(skip_serializing_if = "ServerOverrides::is_empty")]
    server: ServerOverrides,
    #[serde(skip_serializing_if = "UpstreamOverrides::is_empty")]
    upstream: UpstreamOverrides,
}

#[derive(Debug, Default, Serialize)]
struct ServerOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    ws_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    http_port: Option<u16>,
}

impl ServerOverrides {
    fn is_empty(&self) -> bool {
        self.ws_port.is_none() && self.http_port.is_none()
    }
}

#[derive(Debug, Default, Serialize)]
struct UpstreamOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    default_model: Option<String>,
}

impl UpstreamOverrides {
    fn is_empty(&self) -> bool {
        self.base_url.is_none() && self.default_model.is_none()
    }
}

impl EnvOverrides {
    fn from_process_env() -> Self {
        Self {
            server: ServerOverrides {
                ws_port: std::env::var("BROKER_WS_PORT").ok().and_then(|v| v.parse().ok()),
                http_port: std::env::var("MCP_HTTP_PORT").ok().and_then(|v| v.parse().ok()),
            },
            upstream: UpstreamOverrides {
                base_url: std::env::var("OLLAMA_API_URL").ok(),
                default_model: std::env::var("OLLAMA_MODEL").ok(),
            },
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Provider channel (WebSocket) bind host
    pub host: String,
    /// Provider channel (WebSocket) port
    pub ws_port: u16,
    /// Consumer/dashboard HTTP port
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            ws_port: 3099,
            http_port: 3098,
        }
    }
}

/// Upstream generative-model endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the upstream `/generate` endpoint
    pub base_url: String,
    /// Default model used when a request doesn't specify one
    pub default_model: String,
    /// HTTP client timeout for upstream calls
    #[serde(with = "humantime_duration")]
    pub request_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            default_model: "qwen2.5:14b".to_string(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Call correlator deadlines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    /// Deadline for a provider tool call
    #[serde(with = "humantime_duration")]
    pub tool_call_deadline: Duration,
    /// Deadline for a chat proxy round trip
    #[serde(with = "humantime_duration")]
    pub chat_deadline: Duration,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            tool_call_deadline: Duration::from_secs(300),
            chat_deadline: Duration::from_secs(120),
        }
    }
}

/// Ring buffer capacities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Activity log capacity
    pub activity_cap: usize,
    /// Per-provider notification ring capacity
    pub notifications_per_provider_cap: usize,
    /// Global notification ring capacity
    pub notifications_global_cap: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            activity_cap: 200,
            notifications_per_provider_cap: 100,
            notifications_global_cap: 500,
        }
    }
}

/// Minimal `Duration` (de)serialization as a `"<number><unit>"` string (e.g. `"300s"`),
/// matching the teacher's use of `humantime_serde` without the extra dependency.
mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{}s", d.as_secs()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        let digits: String = raw.chars().take_while(char::is_ascii_digit).collect();
        digits
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.server.ws_port, 3099);
        assert_eq!(config.server.http_port, 3098);
        assert_eq!(config.upstream.base_url, "http://localhost:11434");
        assert_eq!(config.upstream.default_model, "qwen2.5:14b");
        assert_eq!(config.correlator.tool_call_deadline, Duration::from_secs(300));
        assert_eq!(config.correlator.chat_deadline, Duration::from_secs(120));
        assert_eq!(config.buffers.activity_cap, 200);
        assert_eq!(config.buffers.notifications_per_provider_cap, 100);
        assert_eq!(config.buffers.notifications_global_cap, 500);
    }

    #[test]
    #[allow(unsafe_code)]
    fn env_overrides_apply() {
        // SAFETY-equivalent: sequential test process, no concurrent env mutation in this crate's test binary.
        unsafe {
            std::env::set_var("BROKER_WS_PORT", "4001");
            std::env::set_var("MCP_HTTP_PORT", "4002");
        }
        let config = Config::load(None).unwrap();
        assert_eq!(config.server.ws_port, 4001);
        assert_eq!(config.server.http_port, 4002);
        unsafe {
            std::env::remove_var("BROKER_WS_PORT");
            std::env::remove_var("MCP_HTTP_PORT");
        }
    }
}
