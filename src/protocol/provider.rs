//! Provider channel frames (spec §4.A).
//!
//! Every frame is a single UTF-8 JSON object with a `type` tag. The enum's
//! `#[serde(tag = "type")]` representation matches that wire shape exactly —
//! `serde_json::from_str::<ProviderMessage>(frame)` both validates and
//! dispatches in one step.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool descriptor published by a provider (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Provider-local tool name, matching `[A-Za-z0-9_-]+`
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// JSON-schema-like input shape; defaults to an empty object schema
    #[serde(default = "default_input_schema", rename = "inputSchema")]
    pub input_schema: Value,
}

fn default_input_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// A single content item in a tool result (spec §4.A `tool_result`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    /// Content kind, almost always `"text"`
    #[serde(rename = "type")]
    pub kind: String,
    /// Text payload
    #[serde(default)]
    pub text: String,
}

impl Content {
    /// Build a `{type: "text", text}` content item.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

/// One frame on the provider channel, direction noted per-variant below.
///
/// → = provider-to-broker, ← = broker-to-provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderMessage {
    /// → Register a provider and its published tools.
    #[serde(rename = "register")]
    Register {
        /// Requested client id; sanitized and possibly replaced by the broker.
        #[serde(rename = "clientId", default)]
        client_id: Option<String>,
        /// Published tool descriptors.
        #[serde(default)]
        tools: Vec<ToolDescriptor>,
    },
    /// ← Acknowledge registration with the assigned id.
    #[serde(rename = "registered")]
    Registered {
        /// Assigned client id.
        #[serde(rename = "clientId")]
        client_id: String,
    },
    /// → Remove this provider's registry entry.
    #[serde(rename = "unregister")]
    Unregister,
    /// ← Ask the provider to execute one of its tools.
    #[serde(rename = "tool_call")]
    ToolCall {
        /// Correlator id for the matching `tool_result`.
        #[serde(rename = "callId")]
        call_id: String,
        /// Provider-local tool name (unnamespaced).
        tool: String,
        /// Tool arguments.
        arguments: Value,
    },
    /// → The result of a `tool_call` this provider was asked to run.
    #[serde(rename = "tool_result")]
    ToolResult {
        /// Correlator id echoed back from the `tool_call`.
        #[serde(rename = "callId")]
        call_id: String,
        /// Result content; an empty/missing array becomes a placeholder text item.
        #[serde(default)]
        content: Vec<Content>,
        /// Whether the tool call failed.
        #[serde(rename = "isError", default)]
        is_error: bool,
    },
    /// → Ask the broker to proxy a chat/inference request upstream.
    #[serde(rename = "chat_request")]
    ChatRequest {
        /// Correlator id for the matching response/error.
        #[serde(rename = "requestId")]
        request_id: String,
        /// Chat payload (model, messages, prompt).
        payload: ChatRequestPayload,
    },
    /// ← Successful upstream chat result.
    #[serde(rename = "chat_response")]
    ChatResponse {
        /// Correlator id echoed back from the `chat_request`.
        #[serde(rename = "requestId")]
        request_id: String,
        /// Response payload.
        payload: ChatResponsePayload,
    },
    /// ← Upstream chat failure.
    #[serde(rename = "chat_error")]
    ChatError {
        /// Correlator id echoed back from the `chat_request`.
        #[serde(rename = "requestId")]
        request_id: String,
        /// Human-readable error message.
        error: String,
    },
    /// → Store an opaque event for this provider and broadcast it to observers.
    #[serde(rename = "notification")]
    Notification {
        /// Opaque event payload.
        event: Value,
    },
    /// ← Acknowledge notification storage.
    #[serde(rename = "notification_ack")]
    NotificationAck {
        /// Server timestamp (epoch millis) at storage time.
        timestamp: i64,
    },
    /// → Provider-initiated tool call, routed through the same Router as consumers.
    #[serde(rename = "call_tool")]
    CallTool {
        /// Optional correlator id supplied by the caller.
        #[serde(rename = "callId", default)]
        call_id: Option<String>,
        /// Tool name, built-in or namespaced.
        tool: String,
        /// Tool arguments.
        arguments: Value,
    },
    /// ← Result of a provider-initiated `call_tool`.
    #[serde(rename = "call_tool_result")]
    CallToolResult {
        /// Correlator id echoed back from the `call_tool`.
        #[serde(rename = "callId")]
        call_id: String,
        /// Result content.
        content: Vec<Content>,
        /// Whether the call failed.
        #[serde(rename = "isError")]
        is_error: bool,
    },
    /// ← Session-level error (invalid JSON, unknown type, out-of-order op).
    #[serde(rename = "error")]
    Error {
        /// Human-readable message.
        message: String,
    },
}

/// `chat_request` payload (spec §4.A, §4.E).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequestPayload {
    /// Requested model; falls back to the configured default when absent.
    #[serde(default)]
    pub model: Option<String>,
    /// Chat messages (role + content); concatenated into a prompt.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Prompt override, used when `messages` is empty.
    #[serde(default)]
    pub prompt: Option<String>,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role (`system`, `user`, `assistant`, ...).
    pub role: String,
    /// Message content.
    pub content: String,
}

/// `chat_response` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponsePayload {
    /// The generated assistant message.
    pub message: ChatMessage,
    /// The model that produced it (resolved, not necessarily the request's).
    pub model: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_descriptor_defaults_input_schema() {
        let json = serde_json::json!({"name": "greet"});
        let tool: ToolDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(tool.input_schema, default_input_schema());
    }

    #[test]
    fn register_frame_parses_by_tag() {
        let frame = serde_json::json!({
            "type": "register",
            "clientId": "hello-world",
            "tools": [{"name": "greet", "inputSchema": {"type": "object", "properties": {"name": {"type": "string"}}, "required": ["name"]}}]
        });
        let msg: ProviderMessage = serde_json::from_value(frame).unwrap();
        match msg {
            ProviderMessage::Register { client_id, tools } => {
                assert_eq!(client_id.as_deref(), Some("hello-world"));
                assert_eq!(tools.len(), 1);
                assert_eq!(tools[0].name, "greet");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn tool_result_round_trips_is_error() {
        let frame = serde_json::json!({
            "type": "tool_result",
            "callId": "abc123",
            "content": [{"type": "text", "text": "Hello, World!"}],
            "isError": false
        });
        let msg: ProviderMessage = serde_json::from_value(frame).unwrap();
        match msg {
            ProviderMessage::ToolResult { call_id, content, is_error } => {
                assert_eq!(call_id, "abc123");
                assert_eq!(content[0].text, "Hello, World!");
                assert!(!is_error);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let frame = serde_json::json!({"type": "not_a_real_type"});
        assert!(serde_json::from_value::<ProviderMessage>(frame).is_err());
    }
}
