//! Provider Session — the per-connection frame loop (spec §4.A).
//!
//! `NEW` → (`register`) → `REGISTERED` → (`unregister`|close|replaced) →
//! `TERMINATED`. Frames arrive in order and are handled one at a time; the
//! send side is a dedicated writer task draining a per-provider outbound
//! queue, so writes never interleave.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::activity::ActivityKind;
use crate::broker::AppState;
use crate::correlator::Outcome;
use crate::protocol::{ChatMessage, Content, ProviderMessage};
use crate::registry::{OutboundFrame, ProviderEntry, ProviderHandle, sanitize_provider_id};

/// Drive one provider connection to completion.
pub async fn run(stream: WebSocketStream<TcpStream>, state: Arc<AppState>) {
    let (mut sink, mut source) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                OutboundFrame::Message(message) => match serde_json::to_string(&message) {
                    Ok(json) => {
                        if sink.send(WsMessage::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to serialize outbound provider frame"),
                },
                OutboundFrame::Close => {
                    let _ = sink.close().await;
                    break;
                }
            }
        }
    });

    let handle = ProviderHandle::new(tx);
    let mut registration: Option<(String, u64)> = None;

    while let Some(message) = source.next().await {
        let text = match message {
            Ok(WsMessage::Text(text)) => text.to_string(),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "provider channel read error");
                break;
            }
        };

        match serde_json::from_str::<ProviderMessage>(&text) {
            Ok(frame) => {
                if !handle_frame(frame, &handle, &mut registration, &state).await {
                    break;
                }
            }
            Err(e) => {
                handle.send(ProviderMessage::Error {
                    message: format!("invalid message: {e}"),
                });
            }
        }
    }

    if let Some((provider_id, epoch)) = registration {
        terminate(&provider_id, epoch, &state).await;
    }
    handle.close("connection closed");
    let _ = writer.await;
}

/// Handle one inbound frame. Returns `false` when the session should end.
async fn handle_frame(frame: ProviderMessage, handle: &ProviderHandle, registration: &mut Option<(String, u64)>, state: &Arc<AppState>) -> bool {
    match frame {
        ProviderMessage::Register { client_id, tools } => {
            register(client_id.as_deref(), tools, handle, registration, state).await;
            true
        }
        ProviderMessage::Unregister => {
            if let Some((provider_id, epoch)) = registration.take() {
                terminate(&provider_id, epoch, state).await;
            } else {
                handle.send(ProviderMessage::Error {
                    message: "not registered".to_string(),
                });
            }
            false
        }
        ProviderMessage::ToolResult { call_id, content, is_error } => {
            let content = if content.is_empty() { vec![Content::text("No content returned")] } else { content };
            state.tool_correlator.complete(&call_id, Outcome::Result { content, is_error });
            true
        }
        ProviderMessage::ChatRequest { request_id, payload } => {
            if registration.is_none() {
                handle.send(ProviderMessage::Error {
                    message: "must register before chat_request".to_string(),
                });
                return true;
            }
            handle_chat_request(&request_id, payload.model, payload.messages, payload.prompt, handle, state).await;
            true
        }
        ProviderMessage::Notification { event } => {
            let Some((provider_id, _epoch)) = registration.as_ref() else {
                handle.send(ProviderMessage::Error {
                    message: "must register before notification".to_string(),
                });
                return true;
            };
            let timestamp = state.activity.store_notification(provider_id, event);
            state.stats.record_notification();
            state.activity.append(
                ActivityKind::Notification,
                format!("notification from {provider_id}"),
                Some(serde_json::json!({"provider_id": provider_id})),
            );
            handle.send(ProviderMessage::NotificationAck { timestamp });
            true
        }
        ProviderMessage::CallTool { call_id, tool, arguments } => {
            if registration.is_none() {
                handle.send(ProviderMessage::Error {
                    message: "must register before call_tool".to_string(),
                });
                return true;
            }
            let call_id = call_id.unwrap_or_else(random_call_id);
            let result = state.router.call(&tool, arguments).await;
            handle.send(ProviderMessage::CallToolResult {
                call_id,
                content: result.content,
                is_error: result.is_error,
            });
            true
        }
        other @ (ProviderMessage::Registered { .. }
        | ProviderMessage::ToolCall { .. }
        | ProviderMessage::ChatResponse { .. }
        | ProviderMessage::ChatError { .. }
        | ProviderMessage::NotificationAck { .. }
        | ProviderMessage::CallToolResult { .. }
        | ProviderMessage::Error { .. }) => {
            handle.send(ProviderMessage::Error {
                message: format!("unexpected message type: {}", frame_type_name(&other)),
            });
            true
        }
    }
}

async fn register(requested_id: Option<&str>, tools: Vec<crate::protocol::ToolDescriptor>, handle: &ProviderHandle, registration: &mut Option<(String, u64)>, state: &Arc<AppState>) {
    let provider_id = sanitize_provider_id(requested_id);
    let epoch = state.registry.next_epoch();

    let entry = Arc::new(ProviderEntry {
        provider_id: provider_id.clone(),
        handle: handle.clone(),
        tools,
        connected_at: chrono::Utc::now(),
        epoch,
    });

    // Spec §4.B: the old channel must be closed and the disconnect activity
    // emitted before the new entry is installed, so a concurrent snapshot
    // read can never observe the replacement with no disconnect recorded.
    if let Some(prior) = state.registry.lookup(&provider_id) {
        prior.handle.close("Replaced by new connection");
        state.activity.append(
            ActivityKind::Disconnect,
            format!("{provider_id} replaced by reconnect"),
            Some(serde_json::json!({"provider_id": provider_id})),
        );
    }

    state.registry.insert_or_replace(entry);
    state.stats.record_connection();
    *registration = Some((provider_id.clone(), epoch));

    handle.send(ProviderMessage::Registered { client_id: provider_id.clone() });
    state.activity.append(
        ActivityKind::Connect,
        format!("{provider_id} registered"),
        Some(serde_json::json!({"provider_id": provider_id})),
    );
    broadcast_snapshot(state);
    info!(provider_id = %provider_id, "provider registered");
}

async fn terminate(provider_id: &str, epoch: u64, state: &Arc<AppState>) {
    if state.registry.remove_if_current(provider_id, epoch).is_none() {
        // Already replaced; the replacement's own registration owns the
        // disconnect activity and notification lifecycle.
        return;
    }
    state.activity.clear_provider_notifications(provider_id);
    state.activity.append(
        ActivityKind::Disconnect,
        format!("{provider_id} disconnected"),
        Some(serde_json::json!({"provider_id": provider_id})),
    );
    broadcast_snapshot(state);
    info!(provider_id = %provider_id, "provider disconnected");
}

async fn handle_chat_request(request_id: &str, model: Option<String>, messages: Vec<ChatMessage>, prompt_override: Option<String>, handle: &ProviderHandle, state: &Arc<AppState>) {
    state.stats.record_chat_request();

    let (prompt, system) = if messages.is_empty() {
        (prompt_override.unwrap_or_default(), None)
    } else {
        crate::chat::ChatProxy::build_prompt(&messages)
    };

    let outcome = tokio::time::timeout(state.chat_deadline, state.chat.generate(model.as_deref(), &prompt, system.as_deref())).await;

    match outcome {
        Ok(Ok((text, resolved_model))) => {
            state.activity.append(ActivityKind::Chat, format!("chat request {request_id} resolved"), None);
            handle.send(ProviderMessage::ChatResponse {
                request_id: request_id.to_string(),
                payload: crate::protocol::ChatResponsePayload {
                    message: ChatMessage {
                        role: "assistant".to_string(),
                        content: text,
                    },
                    model: resolved_model,
                },
            });
        }
        Ok(Err(e)) => fail_chat(request_id, e.to_string(), handle, state),
        Err(_) => fail_chat(request_id, format!("timed out after {}ms", state.chat_deadline.as_millis()), handle, state),
    }
}

fn fail_chat(request_id: &str, error: String, handle: &ProviderHandle, state: &Arc<AppState>) {
    state.stats.record_chat_error();
    state.activity.append(ActivityKind::ChatError, format!("chat request {request_id} failed: {error}"), None);
    handle.send(ProviderMessage::ChatError {
        request_id: request_id.to_string(),
        error,
    });
}

/// Broadcast a fresh `state` frame built from the current registry snapshot.
pub fn broadcast_snapshot(state: &Arc<AppState>) {
    let snapshot = serde_json::json!({
        "connectedClients": state.registry.len(),
        "clients": state.registry.snapshot(),
        "stats": state.stats.snapshot(),
    });
    state.activity.broadcast_state(snapshot);
}

fn frame_type_name(message: &ProviderMessage) -> &'static str {
    match message {
        ProviderMessage::Register { .. } => "register",
        ProviderMessage::Registered { .. } => "registered",
        ProviderMessage::Unregister => "unregister",
        ProviderMessage::ToolCall { .. } => "tool_call",
        ProviderMessage::ToolResult { .. } => "tool_result",
        ProviderMessage::ChatRequest { .. } => "chat_request",
        ProviderMessage::ChatResponse { .. } => "chat_response",
        ProviderMessage::ChatError { .. } => "chat_error",
        ProviderMessage::Notification { .. } => "notification",
        ProviderMessage::NotificationAck { .. } => "notification_ack",
        ProviderMessage::CallTool { .. } => "call_tool",
        ProviderMessage::CallToolResult { .. } => "call_tool_result",
        ProviderMessage::Error { .. } => "error",
    }
}

fn random_call_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
