//! Dashboard HTTP surface — snapshot, activity, tool invocation, and SSE
//! event endpoints consumed by the (out-of-scope) static dashboard page
//! (spec §4.H, §6).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::BroadcastStream;

use crate::activity::Frame;
use crate::broker::AppState;

const DASHBOARD_HTML: &str = "<!doctype html><html><head><title>tool-broker</title></head><body><h1>tool-broker</h1><p>Dashboard UI is served separately; see /api/status and /api/events.</p></body></html>";

/// Build the dashboard HTTP route table.
pub fn router(state: Arc<AppState>) -> AxumRouter {
    AxumRouter::new()
        .route("/", get(index))
        .route("/api/status", get(status))
        .route("/api/activity", get(activity))
        .route("/api/call-tool", post(call_tool))
        .route("/api/events", get(events))
        .route("/api/client/{id}/status", get(client_status))
        .route("/api/client/{id}/activity", get(client_activity))
        .route("/api/client/{id}/events", get(client_events))
        .route("/api/chat", post(chat))
        .route("/api/speak-action", post(speak_action))
        .route("/api/ask-stream", post(ask_stream))
        .route("/api/metrics", get(metrics))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

fn status_snapshot(state: &Arc<AppState>) -> Value {
    let clients = state.registry.snapshot();
    let total_tools: usize = clients.iter().map(|c| c.tools.len()).sum();
    serde_json::json!({
        "uptime": (chrono::Utc::now() - state.started_at).num_seconds(),
        "startedAt": state.started_at,
        "connectedClients": clients.len(),
        "totalTools": total_tools,
        "stats": state.stats.snapshot(),
        "clients": clients,
    })
}

async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(status_snapshot(&state))
}

async fn activity(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(serde_json::json!(state.activity.activity_log()))
}

async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.render(&state.stats.snapshot())
}

#[derive(Debug, Deserialize)]
struct CallToolBody {
    #[serde(rename = "clientId", default)]
    client_id: Option<String>,
    tool: String,
    #[serde(default)]
    arguments: Option<Value>,
}

async fn call_tool(State(state): State<Arc<AppState>>, Json(body): Json<CallToolBody>) -> Json<Value> {
    let name = match &body.client_id {
        Some(id) => format!("{id}__{}", body.tool),
        None => body.tool.clone(),
    };
    let arguments = body.arguments.unwrap_or_else(|| serde_json::json!({}));

    let start = Instant::now();
    let result = state.router.call(&name, arguments).await;
    let duration = start.elapsed().as_millis();

    Json(serde_json::json!({
        "content": result.content,
        "isError": result.is_error,
        "duration": duration,
    }))
}

fn frame_to_event(frame: Frame) -> Option<Event> {
    serde_json::to_string(&frame).ok().map(|json| Event::default().data(json))
}

async fn events(State(state): State<Arc<AppState>>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let initial = Event::default().data(status_snapshot(&state).to_string());
    let receiver = state.activity.subscribe();
    let stream = stream! {
        yield Ok(initial);
        let mut frames = BroadcastStream::new(receiver);
        while let Some(item) = frames.next().await {
            if let Ok(frame) = item {
                if let Some(event) = frame_to_event(frame) {
                    yield Ok(event);
                }
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn client_status(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.registry.lookup(&id) {
        Some(entry) => Json(serde_json::json!({
            "id": entry.provider_id,
            "connectedAt": entry.connected_at,
            "tools": entry.tools,
        }))
        .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn client_activity(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Json<Value> {
    Json(serde_json::json!(state.activity.activity_log_for(&id)))
}

async fn client_events(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.activity.subscribe();
    let stream = stream! {
        let mut frames = BroadcastStream::new(receiver);
        while let Some(item) = frames.next().await {
            let Ok(frame) = item else { continue };
            let matches = match &frame {
                Frame::State { .. } => true,
                Frame::Activity { entry } => entry.data.as_ref().and_then(|d| d.get("provider_id")).and_then(Value::as_str) == Some(id.as_str()),
                Frame::Notification { notification } => notification.provider_id == id,
            };
            if matches {
                if let Some(event) = frame_to_event(frame) {
                    yield Ok(event);
                }
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    message: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    system: Option<String>,
}

async fn chat(State(state): State<Arc<AppState>>, Json(body): Json<ChatBody>) -> Json<Value> {
    state.stats.record_chat_request();
    let start = Instant::now();
    match state.chat.generate(body.model.as_deref(), &body.message, body.system.as_deref()).await {
        Ok((response, model)) => Json(serde_json::json!({
            "response": response,
            "model": model,
            "duration": start.elapsed().as_millis(),
        })),
        Err(e) => {
            state.stats.record_chat_error();
            Json(serde_json::json!({ "error": e.to_string() }))
        }
    }
}

#[derive(Debug, Deserialize)]
struct SpeakActionBody {
    action: String,
}

async fn speak_action(State(state): State<Arc<AppState>>, Json(body): Json<SpeakActionBody>) -> Json<Value> {
    let result = state.router.call("speak_action", serde_json::json!({"action": body.action})).await;
    Json(serde_json::json!({ "content": result.content, "isError": result.is_error }))
}

#[derive(Debug, Deserialize)]
struct AskStreamBody {
    prompt: String,
    #[serde(default)]
    system: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    speak: bool,
}

async fn ask_stream(State(state): State<Arc<AppState>>, Json(body): Json<AskStreamBody>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = stream! {
        let upstream = state.chat.generate_stream(body.model.as_deref(), &body.prompt, body.system.as_deref()).await;
        let mut response = match upstream {
            Ok(response) => response,
            Err(e) => {
                yield Ok(Event::default().data(serde_json::json!({"done": true, "fullText": "", "error": e.to_string()}).to_string()));
                return;
            }
        };

        let mut full_text = String::new();
        let mut buffer = Vec::new();
        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    yield Ok(Event::default().data(serde_json::json!({"done": true, "fullText": full_text, "error": e.to_string()}).to_string()));
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let line = &line[..line.len() - 1];
                if line.is_empty() {
                    continue;
                }
                if let Ok(parsed) = serde_json::from_slice::<crate::chat::GenerateChunk>(line) {
                    full_text.push_str(&parsed.response);
                    yield Ok(Event::default().data(serde_json::json!({"token": parsed.response}).to_string()));
                    if parsed.done {
                        break;
                    }
                }
            }
        }

        if body.speak {
            let _ = state.router.dispatch_to_provider("kokoro-tts", "speak", serde_json::json!({"text": full_text.clone()})).await;
        }

        yield Ok(Event::default().data(serde_json::json!({"done": true, "fullText": full_text}).to_string()));
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}
