//! Top-level wiring: shared state construction, the WebSocket provider
//! listener, and the consumer/dashboard HTTP server, with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::activity::{Activity, BufferCaps};
use crate::chat::ChatProxy;
use crate::config::Config;
use crate::consumer;
use crate::correlator::Correlator;
use crate::dashboard;
use crate::metrics::MetricsHandle;
use crate::registry::Registry;
use crate::router::Router;
use crate::stats::Stats;
use crate::ws;
use crate::{Error, Result};

/// Shared, process-wide broker state reachable from every task.
pub struct AppState {
    /// Provider registry.
    pub registry: Arc<Registry>,
    /// Correlator for provider tool-call dispatch.
    pub tool_correlator: Arc<Correlator>,
    /// Activity log and notification rings.
    pub activity: Arc<Activity>,
    /// Process-wide counters.
    pub stats: Arc<Stats>,
    /// Tool router (built-ins + namespaced dispatch).
    pub router: Arc<Router>,
    /// Upstream chat proxy client.
    pub chat: Arc<ChatProxy>,
    /// Deadline applied to chat proxy round trips.
    pub chat_deadline: Duration,
    /// Deadline applied to provider tool calls.
    pub tool_call_deadline: Duration,
    /// Process start time, for `/api/status` uptime.
    pub started_at: DateTime<Utc>,
    /// Prometheus metrics recorder (no-op when the `metrics` feature is off).
    pub metrics: MetricsHandle,
}

/// Owns the two listeners (provider WebSocket channel, consumer/dashboard
/// HTTP) and runs them to completion.
pub struct Broker {
    state: Arc<AppState>,
    ws_addr: SocketAddr,
    http_addr: SocketAddr,
}

impl Broker {
    /// Build the broker from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics recorder fails to install.
    pub fn new(config: &Config) -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let tool_correlator = Arc::new(Correlator::new());
        let activity = Arc::new(Activity::new(BufferCaps {
            activity: config.buffers.activity_cap,
            per_provider_notifications: config.buffers.notifications_per_provider_cap,
            global_notifications: config.buffers.notifications_global_cap,
        }));
        let stats = Arc::new(Stats::new());
        let chat = Arc::new(ChatProxy::new(&config.upstream));

        let router = Arc::new(Router::new(
            Arc::clone(&registry),
            Arc::clone(&tool_correlator),
            Arc::clone(&activity),
            Arc::clone(&stats),
            Arc::clone(&chat),
            config.correlator.tool_call_deadline,
        ));

        let state = Arc::new(AppState {
            registry,
            tool_correlator,
            activity,
            stats,
            router,
            chat,
            chat_deadline: config.correlator.chat_deadline,
            tool_call_deadline: config.correlator.tool_call_deadline,
            started_at: Utc::now(),
            metrics: MetricsHandle::install()?,
        });

        let ws_addr = SocketAddr::new(config.server.host.parse().unwrap_or_else(|_| [0, 0, 0, 0].into()), config.server.ws_port);
        let http_addr = SocketAddr::new(config.server.host.parse().unwrap_or_else(|_| [0, 0, 0, 0].into()), config.server.http_port);

        Ok(Self { state, ws_addr, http_addr })
    }

    /// Bind both listeners and run until shutdown is signalled.
    ///
    /// # Errors
    ///
    /// Returns an error if either listener fails to bind (spec §7: only
    /// fatal startup errors terminate the process).
    pub async fn run(self) -> Result<()> {
        let ws_listener = TcpListener::bind(self.ws_addr).await.map_err(|e| Error::Transport(format!("bind {}: {e}", self.ws_addr)))?;
        let http_listener = TcpListener::bind(self.http_addr).await.map_err(|e| Error::Transport(format!("bind {}: {e}", self.http_addr)))?;

        info!(addr = %self.ws_addr, "provider channel listening");
        info!(addr = %self.http_addr, "consumer/dashboard http listening");

        let ws_state = Arc::clone(&self.state);
        let ws_task = tokio::spawn(async move {
            if let Err(e) = ws::serve(ws_listener, ws_state, shutdown_signal()).await {
                error!(error = %e, "provider channel listener exited");
            }
        });

        let app = dashboard::router(Arc::clone(&self.state))
            .merge(consumer::router(Arc::clone(&self.state)))
            .layer(CatchPanicLayer::new())
            .layer(CompressionLayer::new())
            .layer(TraceLayer::new_for_http());
        let http_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(http_listener, app).with_graceful_shutdown(shutdown_signal()).await {
                error!(error = %e, "http server exited");
            }
        });

        let _ = tokio::join!(ws_task, http_task);
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c, shutting down"),
        () = terminate => info!("received sigterm, shutting down"),
    }
}
