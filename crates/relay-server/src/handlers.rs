//! Connection handlers for the relay server.
//!
//! One listener serves both the WebSocket relay and the plain-text health
//! check: a `GET` on any path that asks for a WebSocket upgrade becomes a
//! relay connection, every other `GET` gets `200 OK`.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use dndex_relay_core::{Hub, HubHandle, Outbound};
use futures_util::{Sink, SinkExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Body returned by the health check.
pub const HEALTH_BODY: &str = "DnDex Relay: OK";

/// How often room gauges are refreshed when metrics are enabled.
const STATS_REFRESH: Duration = Duration::from_secs(5);

/// A write that makes no progress for this long closes the connection.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared server state.
pub struct AppState {
    /// Handle to the relay hub.
    pub hub: HubHandle,
}

/// Build the HTTP application.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(get(entry_handler))
        .with_state(state)
}

/// Run the relay until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind relay listener on {addr}"))?;

    let (hub, hub_task) = Hub::spawn(config.relay_config());

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
        tokio::spawn(refresh_registry_gauges(hub.clone()));
    }

    let state = Arc::new(AppState { hub: hub.clone() });
    let result = serve(listener, state, shutdown_signal()).await;

    if hub.shutdown().is_ok() {
        let _ = hub_task.await;
    }
    result
}

/// Serve the relay on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("DnDex relay listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("DnDex relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

async fn refresh_registry_gauges(hub: HubHandle) {
    let mut ticker = tokio::time::interval(STATS_REFRESH);
    loop {
        ticker.tick().await;
        match hub.stats().await {
            Ok(stats) => metrics::set_registry_stats(&stats),
            Err(_) => break,
        }
    }
}

/// Entry point for every path: WebSocket upgrade or health check.
async fn entry_handler(
    ws: Option<WebSocketUpgrade>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match ws {
        Some(ws) => ws
            .on_upgrade(move |socket| handle_websocket(socket, state))
            .into_response(),
        None => health_response(),
    }
}

fn health_response() -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/plain"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        HEALTH_BODY,
    )
        .into_response()
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (connection_id, mut outbound) = match state.hub.register() {
        Ok(registered) => registered,
        Err(e) => {
            error!(error = %e, "Rejecting WebSocket, relay hub unavailable");
            return;
        }
    };

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            biased;

            // Frames queued by the hub
            frame = outbound.recv() => match frame {
                Some(Outbound::Text(text)) => {
                    metrics::record_message(text.len(), "outbound");
                    if !send_frame(&mut sender, Message::Text(text)).await {
                        break;
                    }
                }
                Some(Outbound::Ping) => {
                    if !send_frame(&mut sender, Message::Ping(Vec::new())).await {
                        break;
                    }
                }
                Some(Outbound::Terminate) => {
                    debug!(connection = %connection_id, "Terminating unresponsive connection");
                    metrics::record_eviction();
                    break;
                }
                None => {
                    debug!(connection = %connection_id, "Connection dropped by relay");
                    break;
                }
            },

            // Receive from WebSocket
            msg = receiver.next() => {
                let frame = match msg {
                    Some(Ok(Message::Text(text))) => Bytes::from(text),
                    Some(Ok(Message::Binary(data))) => Bytes::from(data),
                    Some(Ok(Message::Ping(data))) => {
                        if !send_frame(&mut sender, Message::Pong(data)).await {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        if state.hub.pong(&connection_id).is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                };

                metrics::record_message(frame.len(), "inbound");
                if state.hub.inbound(&connection_id, frame).is_err() {
                    break;
                }
            }
        }
    }

    // Cleanup: leave the room and forget the connection
    let _ = state.hub.disconnect(&connection_id);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Write one frame, giving up after [`WRITE_TIMEOUT`].
///
/// Returns `false` when the connection should be closed.
async fn send_frame<S>(sender: &mut S, message: Message) -> bool
where
    S: Sink<Message> + Unpin,
{
    match tokio::time::timeout(WRITE_TIMEOUT, sender.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(_)) => false,
        Err(_) => {
            warn!("WebSocket write stalled for {:?}, closing", WRITE_TIMEOUT);
            metrics::record_error("write_timeout");
            false
        }
    }
}
