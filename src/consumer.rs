//! Consumer Adapter — the JSON-RPC `tools/list`/`tools/call` surface at
//! `POST /mcp` (spec §4.F, §6).

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router as AxumRouter};
use serde_json::Value;

use crate::broker::AppState;
use crate::error::{Error, rpc_codes};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::router::BUILTIN_TOOL_NAMES;

/// Build the `/mcp` route.
pub fn router(state: Arc<AppState>) -> AxumRouter {
    AxumRouter::new()
        .route("/mcp", post(handle_rpc).get(method_not_allowed).delete(method_not_allowed))
        .with_state(state)
}

async fn method_not_allowed() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

async fn handle_rpc(State(state): State<Arc<AppState>>, body: Bytes) -> impl IntoResponse {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            let error = Error::Json(e);
            return Json(JsonRpcResponse::error(None, error.to_rpc_code(), error.to_string()));
        }
    };

    let response = match request.method.as_str() {
        "tools/list" => JsonRpcResponse::success(request.id, list_tools(&state)),
        "tools/call" => call_tool(&state, request.id, request.params).await,
        other => JsonRpcResponse::error(Some(request.id), rpc_codes::METHOD_NOT_FOUND, format!("Unknown method: {other}")),
    };
    Json(response)
}

fn list_tools(state: &Arc<AppState>) -> Value {
    let mut tools: Vec<Value> = builtin_descriptors();

    for provider in state.registry.snapshot() {
        for tool in provider_tool_descriptors(&provider.id, state) {
            tools.push(tool);
        }
    }

    serde_json::json!({ "tools": tools })
}

fn builtin_descriptors() -> Vec<Value> {
    BUILTIN_TOOL_NAMES
        .iter()
        .map(|name| {
            serde_json::json!({
                "name": name,
                "description": builtin_description(name),
                "inputSchema": builtin_input_schema(name),
            })
        })
        .collect()
}

fn builtin_description(name: &str) -> &'static str {
    match name {
        "list_broker_clients" => "List all connected broker clients and their published tools.",
        "get_notifications" => "Fetch recent notifications, per-client or global.",
        "speak" => "Speak text aloud via the text-to-speech provider.",
        "speak_action" => "Rephrase and speak an action description.",
        "ask_ai" => "Ask the upstream generative model a question.",
        _ => "",
    }
}

fn builtin_input_schema(name: &str) -> Value {
    match name {
        "list_broker_clients" => serde_json::json!({"type": "object", "properties": {}}),
        "get_notifications" => serde_json::json!({
            "type": "object",
            "properties": {"clientId": {"type": "string"}, "limit": {"type": "number"}},
        }),
        "speak" => serde_json::json!({
            "type": "object",
            "properties": {"text": {"type": "string"}, "voice": {"type": "string"}, "speed": {"type": "number"}},
            "required": ["text"],
        }),
        "speak_action" => serde_json::json!({
            "type": "object",
            "properties": {"action": {"type": "string"}},
            "required": ["action"],
        }),
        "ask_ai" => serde_json::json!({
            "type": "object",
            "properties": {
                "prompt": {"type": "string"},
                "system": {"type": "string"},
                "model": {"type": "string"},
                "speak": {"type": "boolean"},
            },
            "required": ["prompt"],
        }),
        _ => serde_json::json!({"type": "object", "properties": {}}),
    }
}

/// Provider tools rewritten to `"<id>__<name>"` with a `"[<id>] "`-prefixed
/// description (spec §4.F List).
fn provider_tool_descriptors(provider_id: &str, state: &Arc<AppState>) -> Vec<Value> {
    let Some(entry) = state.registry.lookup(provider_id) else {
        return Vec::new();
    };
    entry
        .tools
        .iter()
        .map(|tool| {
            serde_json::json!({
                "name": format!("{provider_id}__{}", tool.name),
                "description": format!("[{provider_id}] {}", tool.description),
                "inputSchema": tool.input_schema,
            })
        })
        .collect()
}

async fn call_tool(state: &Arc<AppState>, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
    let Some(params) = params else {
        return JsonRpcResponse::error(Some(id), rpc_codes::INVALID_PARAMS, "tools/call requires params");
    };
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return JsonRpcResponse::error(Some(id), rpc_codes::INVALID_PARAMS, "params.name is required");
    };
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| serde_json::json!({}));

    let result = state.router.call(name, arguments).await;

    // Spec §4.F: all Router errors surface as well-formed results, text
    // prefixed "Error: ", never as transport-layer exceptions.
    let content = if result.is_error {
        result
            .content
            .into_iter()
            .map(|c| crate::protocol::Content::text(format!("Error: {}", c.text)))
            .collect()
    } else {
        result.content
    };

    JsonRpcResponse::success(
        id,
        serde_json::json!({
            "content": content,
            "isError": result.is_error,
        }),
    )
}
