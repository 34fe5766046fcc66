//! Server wiring and the HTTP status endpoint.
//!
//! The broker API is served on the WebSocket bus; a separate axum server
//! reports health and channel state.

use crate::api::Broker;
use crate::config::Config;
use crate::metrics;
use anyhow::{Context, Result};
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tenvis_switchboard_core::{ChannelKind, Coordinator, Dispatcher, Model};
use tenvis_switchboard_transport::WebSocketBus;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Shared HTTP state.
pub struct AppState {
    /// Channel coordinator, read for status.
    pub coordinator: Arc<Coordinator>,
    /// Dispatcher, read for connected clients.
    pub dispatcher: Arc<Dispatcher>,
}

/// Status of a single channel.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    pub members: usize,
    pub has_context: bool,
}

/// Run the broker.
///
/// # Errors
///
/// Returns an error if the channel set is invalid or a listener cannot be
/// bound.
pub async fn run_server(config: Config) -> Result<()> {
    let model = Arc::new(Model::new(config.desktop_channels()).context("Invalid channel set")?);
    let broker = Broker::new(model, config.service.clone());

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
        metrics::observe(broker.dispatcher(), broker.coordinator());
    }

    let bus = WebSocketBus::new(config.websocket_config()?);
    broker
        .start(&bus)
        .await
        .context("Failed to start provider")?;

    if let Some(addr) = bus.local_addr() {
        info!("Switchboard listening on ws://{}", addr);
    }

    if config.http.enabled {
        let state = Arc::new(AppState {
            coordinator: broker.coordinator().clone(),
            dispatcher: broker.dispatcher().clone(),
        });

        let addr = config.http_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind HTTP listener on {}", addr))?;
        info!("HTTP status endpoint: http://{}/health", addr);

        axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        shutdown_signal().await;
    }

    info!("Switchboard stopped");
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/channels", get(channels_handler))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.dispatcher.get_client_connections().len(),
        "windows": state.coordinator.model().window_count(),
    }))
}

/// Channel status handler.
async fn channels_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ChannelStatus>> {
    Json(channel_status(&state.coordinator))
}

fn channel_status(coordinator: &Coordinator) -> Vec<ChannelStatus> {
    coordinator
        .model()
        .channels()
        .iter()
        .map(|channel| ChannelStatus {
            id: channel.id().to_string(),
            kind: channel.kind().clone(),
            members: coordinator.get_channel_members(channel).len(),
            has_context: channel.stored_context().is_some(),
        })
        .collect()
}
