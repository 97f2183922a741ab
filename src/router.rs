//! Router — resolves a tool name (built-in or namespaced) to a result
//! (spec §4.D, §6 built-in tools).

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::activity::{Activity, ActivityKind};
use crate::chat::ChatProxy;
use crate::correlator::{Correlator, Outcome};
use crate::protocol::{Content, ProviderMessage};
use crate::registry::Registry;
use crate::stats::Stats;

/// A tool invocation result, always well-formed (spec §4.F: errors never
/// surface as transport exceptions).
#[derive(Debug, Clone)]
pub struct CallResult {
    /// Result content items.
    pub content: Vec<Content>,
    /// Whether the call failed.
    pub is_error: bool,
}

impl CallResult {
    fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: true,
        }
    }
}

/// The built-in tool name the dashboard and `speak`/`speak_action` delegate
/// text-to-speech to.
const TTS_PROVIDER_ID: &str = "kokoro-tts";

const SPEAK_ACTION_SYSTEM_PROMPT: &str =
    "Rephrase the following action as a short, natural spoken announcement. Respond with only the announcement text.";

/// Fixed declaration order of built-in tool descriptors (spec §6), used by
/// the Consumer Adapter's `tools/list`.
pub const BUILTIN_TOOL_NAMES: [&str; 5] = ["list_broker_clients", "get_notifications", "speak", "speak_action", "ask_ai"];

/// Resolves tool names to built-in handlers or namespaced provider dispatch.
pub struct Router {
    registry: Arc<Registry>,
    correlator: Arc<Correlator>,
    activity: Arc<Activity>,
    stats: Arc<Stats>,
    chat: Arc<ChatProxy>,
    tool_call_deadline: Duration,
}

impl Router {
    /// Build a router over the shared broker state.
    #[must_use]
    pub fn new(registry: Arc<Registry>, correlator: Arc<Correlator>, activity: Arc<Activity>, stats: Arc<Stats>, chat: Arc<ChatProxy>, tool_call_deadline: Duration) -> Self {
        Self {
            registry,
            correlator,
            activity,
            stats,
            chat,
            tool_call_deadline,
        }
    }

    /// Resolve `name` against built-ins, then namespaced provider dispatch,
    /// then the unknown-tool fallback (spec §4.D resolution order).
    pub async fn call(&self, name: &str, arguments: Value) -> CallResult {
        self.stats.record_tool_call();

        let result = match name {
            "list_broker_clients" => self.list_broker_clients(),
            "get_notifications" => self.get_notifications(&arguments),
            "speak" => self.dispatch_to_provider(TTS_PROVIDER_ID, "speak", arguments).await,
            "speak_action" => self.speak_action(&arguments).await,
            "ask_ai" => self.ask_ai(&arguments).await,
            _ => match split_namespaced(name) {
                Some((provider_id, tool)) => self.dispatch_to_provider(provider_id, tool, arguments).await,
                None => CallResult::error(format!("Unknown tool: {name}")),
            },
        };

        if result.is_error {
            self.stats.record_tool_error();
            self.activity.append(
                ActivityKind::ToolError,
                format!("tool call failed: {name}"),
                Some(serde_json::json!({"tool": name})),
            );
        } else {
            self.activity.append(
                ActivityKind::ToolResult,
                format!("tool call succeeded: {name}"),
                Some(serde_json::json!({"tool": name})),
            );
        }

        result
    }

    fn list_broker_clients(&self) -> CallResult {
        let snapshot = self.registry.snapshot();
        let listing: Vec<_> = snapshot
            .into_iter()
            .map(|entry| serde_json::json!({"clientId": entry.id, "tools": entry.tools}))
            .collect();
        CallResult::text(serde_json::to_string(&listing).unwrap_or_else(|_| "[]".to_string()))
    }

    fn get_notifications(&self, arguments: &Value) -> CallResult {
        let client_id = arguments.get("clientId").and_then(Value::as_str);
        let limit = arguments.get("limit").and_then(Value::as_u64).unwrap_or(50) as usize;
        let notifications = self.activity.notifications(client_id, limit);
        CallResult::text(serde_json::to_string(&notifications).unwrap_or_else(|_| "[]".to_string()))
    }

    async fn speak_action(&self, arguments: &Value) -> CallResult {
        let Some(action) = arguments.get("action").and_then(Value::as_str) else {
            return CallResult::error("speak_action requires an \"action\" string");
        };

        let rephrased = match self.chat.generate(None, action, Some(SPEAK_ACTION_SYSTEM_PROMPT)).await {
            Ok((text, _model)) => text,
            Err(_) => action.to_string(),
        };

        self.dispatch_to_provider(TTS_PROVIDER_ID, "speak", serde_json::json!({"text": rephrased})).await
    }

    async fn ask_ai(&self, arguments: &Value) -> CallResult {
        let Some(prompt) = arguments.get("prompt").and_then(Value::as_str) else {
            return CallResult::error("ask_ai requires a \"prompt\" string");
        };
        let system = arguments.get("system").and_then(Value::as_str);
        let model = arguments.get("model").and_then(Value::as_str);
        let speak = arguments.get("speak").and_then(Value::as_bool).unwrap_or(false);

        self.stats.record_chat_request();
        let text = match self.chat.generate(model, prompt, system).await {
            Ok((text, _model)) => text,
            Err(e) => {
                self.stats.record_chat_error();
                self.activity.append(ActivityKind::ChatError, format!("ask_ai failed: {e}"), None);
                return CallResult::error(e.to_string());
            }
        };

        if speak {
            let _ = self.dispatch_to_provider(TTS_PROVIDER_ID, "speak", serde_json::json!({"text": text})).await;
        }

        CallResult::text(text)
    }

    /// Dispatch to a registered provider's tool and await its result (spec
    /// §4.D step 2, §4.D error mapping).
    pub async fn dispatch_to_provider(&self, provider_id: &str, tool: &str, arguments: Value) -> CallResult {
        let Some(entry) = self.registry.lookup(provider_id) else {
            return CallResult::error(format!("Broker client \"{provider_id}\" not connected"));
        };

        let (call_id, rx) = self.correlator.begin();
        let sent = entry.handle.send(ProviderMessage::ToolCall {
            call_id: call_id.clone(),
            tool: tool.to_string(),
            arguments,
        });
        if !sent {
            self.correlator.complete(&call_id, Outcome::text(""));
            return CallResult::error(format!("Broker client \"{provider_id}\" not connected"));
        }

        self.activity.append(
            ActivityKind::ToolCall,
            format!("dispatched {tool} to {provider_id}"),
            Some(serde_json::json!({"provider_id": provider_id, "tool": tool, "call_id": call_id})),
        );

        match self.correlator.wait(&call_id, rx, self.tool_call_deadline).await {
            Outcome::Result { content, is_error } => CallResult { content, is_error },
            Outcome::Failed(e) => CallResult::error(e.to_string()),
        }
    }
}

/// Split `"provider_id__tool_name"` at the first `__`. Returns `None` if
/// `name` contains no `__` separator (spec §3 "not namespaced").
#[must_use]
pub fn split_namespaced(name: &str) -> Option<(&str, &str)> {
    name.split_once("__")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_namespaced_finds_first_separator() {
        assert_eq!(split_namespaced("svc__tool"), Some(("svc", "tool")));
        assert_eq!(split_namespaced("svc__tool__with__dunders"), Some(("svc", "tool__with__dunders")));
        assert_eq!(split_namespaced("no-separator"), None);
    }
}
