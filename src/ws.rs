//! Provider channel listener — accepts WebSocket connections on the
//! dedicated provider port and spawns a session per connection (spec §6).

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::broker::AppState;
use crate::session;
use crate::{Error, Result};

/// Accept connections from `listener` until it errors or `shutdown`
/// resolves, spawning one [`session::run`] task per connection.
pub async fn serve(listener: TcpListener, state: Arc<AppState>, shutdown: impl Future<Output = ()>) -> Result<()> {
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted.map_err(|e| Error::Transport(format!("accept: {e}")))?;
                let state = Arc::clone(&state);

                tokio::spawn(async move {
                    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
                        Ok(ws_stream) => ws_stream,
                        Err(e) => {
                            warn!(%peer, error = %e, "websocket handshake failed");
                            return;
                        }
                    };
                    debug!(%peer, "provider channel connected");
                    session::run(ws_stream, state).await;
                    debug!(%peer, "provider channel closed");
                });
            }
            () = &mut shutdown => {
                info!("provider channel listener shutting down");
                return Ok(());
            }
        }
    }
}
