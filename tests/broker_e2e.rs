//! End-to-end scenarios over real loopback sockets: a provider connects over
//! the WebSocket channel, a consumer calls through the JSON-RPC `/mcp`
//! surface built with `tower::ServiceExt::oneshot`.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::Router as AxumRouter;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tower::ServiceExt;

use tool_broker::activity::{Activity, BufferCaps};
use tool_broker::broker::AppState;
use tool_broker::chat::ChatProxy;
use tool_broker::config::UpstreamConfig;
use tool_broker::consumer;
use tool_broker::correlator::Correlator;
use tool_broker::dashboard;
use tool_broker::metrics::MetricsHandle;
use tool_broker::registry::Registry;
use tool_broker::router::Router;
use tool_broker::stats::Stats;
use tool_broker::ws;

static METRICS: OnceLock<MetricsHandle> = OnceLock::new();

fn metrics_handle() -> MetricsHandle {
    METRICS.get_or_init(|| MetricsHandle::install().expect("install metrics recorder")).clone()
}

fn test_state(tool_call_deadline: Duration) -> Arc<AppState> {
    test_state_with_upstream(tool_call_deadline, "http://127.0.0.1:1", "test-model")
}

fn test_state_with_upstream(tool_call_deadline: Duration, upstream_base_url: &str, default_model: &str) -> Arc<AppState> {
    let registry = Arc::new(Registry::new());
    let tool_correlator = Arc::new(Correlator::new());
    let activity = Arc::new(Activity::new(BufferCaps {
        activity: 200,
        per_provider_notifications: 100,
        global_notifications: 500,
    }));
    let stats = Arc::new(Stats::new());
    let chat = Arc::new(ChatProxy::new(&UpstreamConfig {
        base_url: upstream_base_url.to_string(),
        default_model: default_model.to_string(),
        request_timeout: Duration::from_secs(5),
    }));

    let router = Arc::new(Router::new(
        Arc::clone(&registry),
        Arc::clone(&tool_correlator),
        Arc::clone(&activity),
        Arc::clone(&stats),
        Arc::clone(&chat),
        tool_call_deadline,
    ));

    Arc::new(AppState {
        registry,
        tool_correlator,
        activity,
        stats,
        router,
        chat,
        chat_deadline: Duration::from_secs(5),
        tool_call_deadline,
        started_at: chrono::Utc::now(),
        metrics: metrics_handle(),
    })
}

/// Stand up a throwaway `POST /generate` endpoint mimicking the upstream
/// generative-model API, for spec §8 scenario 5.
async fn start_mock_generate_server() -> SocketAddr {
    async fn generate(axum::Json(body): axum::Json<Value>) -> axum::Json<Value> {
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["prompt"], "hi");
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["stream"], false);
        axum::Json(json!({"response": "hello"}))
    }

    let app = AxumRouter::new().route("/generate", axum::routing::post(generate));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn start_ws_listener(state: Arc<AppState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = ws::serve(listener, state, std::future::pending()).await;
    });
    addr
}

async fn connect_provider(addr: SocketAddr) -> WebSocketStream<MaybeTlsStream<TcpStream>> {
    let (stream, _response) = connect_async(format!("ws://{addr}/")).await.unwrap();
    stream
}

async fn send_json(stream: &mut WebSocketStream<MaybeTlsStream<TcpStream>>, value: &Value) {
    stream
        .send(tokio_tungstenite::tungstenite::Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

async fn recv_json(stream: &mut WebSocketStream<MaybeTlsStream<TcpStream>>) -> Value {
    loop {
        match stream.next().await.expect("stream closed before a frame arrived").unwrap() {
            tokio_tungstenite::tungstenite::Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}

fn consumer_app(state: Arc<AppState>) -> AxumRouter {
    consumer::router(state)
}

async fn rpc_call(app: AxumRouter, body: Value) -> Value {
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn hello_registration_and_call() {
    let state = test_state(Duration::from_secs(5));
    let addr = start_ws_listener(Arc::clone(&state)).await;
    let mut provider = connect_provider(addr).await;

    send_json(
        &mut provider,
        &json!({
            "type": "register",
            "clientId": "hello-world",
            "tools": [{"name": "greet", "inputSchema": {"type": "object", "properties": {"name": {"type": "string"}}, "required": ["name"]}}]
        }),
    )
    .await;

    let registered = recv_json(&mut provider).await;
    assert_eq!(registered["type"], "registered");
    assert_eq!(registered["clientId"], "hello-world");

    let list = rpc_call(consumer_app(Arc::clone(&state)), json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})).await;
    let tool_names: Vec<&str> = list["result"]["tools"].as_array().unwrap().iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert!(tool_names.contains(&"hello-world__greet"));

    let consumer_task = tokio::spawn(rpc_call(
        consumer_app(Arc::clone(&state)),
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"name": "hello-world__greet", "arguments": {"name": "World"}}}),
    ));

    let tool_call = recv_json(&mut provider).await;
    assert_eq!(tool_call["type"], "tool_call");
    assert_eq!(tool_call["tool"], "greet");
    let call_id = tool_call["callId"].as_str().unwrap().to_string();

    send_json(
        &mut provider,
        &json!({
            "type": "tool_result",
            "callId": call_id,
            "content": [{"type": "text", "text": "Hello, World!"}],
            "isError": false
        }),
    )
    .await;

    let response = consumer_task.await.unwrap();
    assert_eq!(response["result"]["isError"], false);
    assert_eq!(response["result"]["content"][0]["text"], "Hello, World!");
}

#[tokio::test]
async fn reconnect_replace() {
    let state = test_state(Duration::from_secs(5));
    let addr = start_ws_listener(Arc::clone(&state)).await;

    let mut a = connect_provider(addr).await;
    send_json(&mut a, &json!({"type": "register", "clientId": "svc", "tools": []})).await;
    assert_eq!(recv_json(&mut a).await["type"], "registered");

    let mut b = connect_provider(addr).await;
    send_json(&mut b, &json!({"type": "register", "clientId": "svc", "tools": []})).await;
    assert_eq!(recv_json(&mut b).await["type"], "registered");

    let closed = recv_json(&mut a).await;
    assert_eq!(closed["type"], "error");
    assert!(closed["message"].as_str().unwrap().contains("Replaced by new connection"));

    let snapshot = state.registry.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, "svc");
}

#[tokio::test]
async fn unknown_tool_maps_to_consumer_error() {
    let state = test_state(Duration::from_secs(5));
    let before = state.stats.snapshot().tool_errors;

    let response = rpc_call(
        consumer_app(Arc::clone(&state)),
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "ghost__x", "arguments": {}}}),
    )
    .await;

    assert_eq!(response["result"]["isError"], true);
    assert_eq!(response["result"]["content"][0]["text"], "Error: Broker client \"ghost\" not connected");
    assert_eq!(state.stats.snapshot().tool_errors, before + 1);
}

#[tokio::test]
async fn tool_call_times_out() {
    let state = test_state(Duration::from_millis(50));
    let addr = start_ws_listener(Arc::clone(&state)).await;
    let mut provider = connect_provider(addr).await;

    send_json(&mut provider, &json!({"type": "register", "clientId": "slow", "tools": [{"name": "noop"}]})).await;
    assert_eq!(recv_json(&mut provider).await["type"], "registered");

    let response = rpc_call(
        consumer_app(Arc::clone(&state)),
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "slow__noop", "arguments": {}}}),
    )
    .await;

    assert_eq!(response["result"]["isError"], true);
    assert!(response["result"]["content"][0]["text"].as_str().unwrap().contains("timed out"));
    assert_eq!(state.tool_correlator.pending_count(), 0);
}

#[tokio::test]
async fn notification_storage_and_fan_out() {
    let state = test_state(Duration::from_secs(5));
    let addr = start_ws_listener(Arc::clone(&state)).await;
    let mut provider = connect_provider(addr).await;

    let mut observer = state.activity.subscribe();

    send_json(&mut provider, &json!({"type": "register", "clientId": "clock", "tools": []})).await;
    assert_eq!(recv_json(&mut provider).await["type"], "registered");

    send_json(&mut provider, &json!({"type": "notification", "event": {"type": "tick", "t": 1}})).await;
    let ack = recv_json(&mut provider).await;
    assert_eq!(ack["type"], "notification_ack");
    assert!(ack["timestamp"].as_i64().unwrap() > 0);

    let per_provider = state.activity.notifications(Some("clock"), 50);
    assert_eq!(per_provider.len(), 1);
    let global = state.activity.notifications(None, 50);
    assert_eq!(global.len(), 1);

    let notified = loop {
        match observer.recv().await.unwrap() {
            tool_broker::activity::Frame::Notification { notification } => break notification,
            _ => continue,
        }
    };
    assert_eq!(notified.provider_id, "clock");

    let result = state.router.call("get_notifications", json!({"clientId": "clock"})).await;
    assert!(!result.is_error);
    let stored: Value = serde_json::from_str(&result.content[0].text).unwrap();
    assert_eq!(stored[0]["provider_id"], "clock");
}

#[tokio::test]
async fn chat_proxy_round_trip() {
    let upstream_addr = start_mock_generate_server().await;
    let state = test_state_with_upstream(Duration::from_secs(5), &format!("http://{upstream_addr}"), "test-model");
    let addr = start_ws_listener(Arc::clone(&state)).await;
    let mut provider = connect_provider(addr).await;

    send_json(&mut provider, &json!({"type": "register", "clientId": "chatty", "tools": []})).await;
    assert_eq!(recv_json(&mut provider).await["type"], "registered");

    send_json(
        &mut provider,
        &json!({
            "type": "chat_request",
            "requestId": "r1",
            "payload": {"messages": [{"role": "system", "content": "be terse"}, {"role": "user", "content": "hi"}]}
        }),
    )
    .await;

    let response = recv_json(&mut provider).await;
    assert_eq!(response["type"], "chat_response");
    assert_eq!(response["requestId"], "r1");
    assert_eq!(response["payload"]["message"]["role"], "assistant");
    assert_eq!(response["payload"]["message"]["content"], "hello");
    assert_eq!(response["payload"]["model"], "test-model");
}

#[tokio::test]
async fn call_tool_before_register_is_rejected() {
    let state = test_state(Duration::from_secs(5));
    let addr = start_ws_listener(Arc::clone(&state)).await;
    let mut provider = connect_provider(addr).await;

    send_json(&mut provider, &json!({"type": "call_tool", "tool": "get_notifications", "arguments": {}})).await;

    let response = recv_json(&mut provider).await;
    assert_eq!(response["type"], "error");
    assert!(response["message"].as_str().unwrap().contains("must register"));
}

fn dashboard_app(state: Arc<AppState>) -> AxumRouter {
    dashboard::router(state)
}

async fn get_json(app: AxumRouter, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
    (status, value)
}

#[tokio::test]
async fn dashboard_status_and_activity() {
    let state = test_state(Duration::from_secs(5));
    state.activity.append(tool_broker::activity::ActivityKind::Connect, "test entry".to_string(), None);

    let (status, body) = get_json(dashboard_app(Arc::clone(&state)), "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connectedClients"], 0);

    let (status, body) = get_json(dashboard_app(Arc::clone(&state)), "/api/activity").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn dashboard_unknown_client_status_is_404() {
    let state = test_state(Duration::from_secs(5));
    let (status, _body) = get_json(dashboard_app(state), "/api/client/ghost/status").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dashboard_call_tool_routes_through_router() {
    let state = test_state(Duration::from_secs(5));
    let request = Request::builder()
        .method("POST")
        .uri("/api/call-tool")
        .header("content-type", "application/json")
        .body(Body::from(json!({"tool": "list_broker_clients"}).to_string()))
        .unwrap();
    let response = dashboard_app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["isError"], false);
}

#[tokio::test]
async fn mcp_get_and_delete_are_method_not_allowed() {
    let state = test_state(Duration::from_secs(5));
    let app = consumer_app(state);

    let get_request = Request::builder().method("GET").uri("/mcp").body(Body::empty()).unwrap();
    let get_response = app.clone().oneshot(get_request).await.unwrap();
    assert_eq!(get_response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let delete_request = Request::builder().method("DELETE").uri("/mcp").body(Body::empty()).unwrap();
    let delete_response = app.oneshot(delete_request).await.unwrap();
    assert_eq!(delete_response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn mcp_malformed_json_maps_to_parse_error() {
    let state = test_state(Duration::from_secs(5));
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = consumer_app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], -32700);
}
