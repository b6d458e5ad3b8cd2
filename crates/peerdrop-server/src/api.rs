use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::Method,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use peerdrop_shared::types::{FilePayload, PeerId, PeerRecord};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::lifecycle::Lifecycle;
use crate::relay::Relay;
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub lifecycle: Arc<Lifecycle>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/api/peers", get(list_peers))
        .route("/api/peers/:id", get(get_peer))
        .route("/api/mailbox/:id", get(get_mailbox))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    peers: usize,
    connections: usize,
    pending_payloads: usize,
    liveness_interval_secs: u64,
    grace_period_secs: u64,
    max_payload_size: usize,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    let (peers, connections, pending_payloads) = state.relay.stats().await;
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        peers,
        connections,
        pending_payloads,
        liveness_interval_secs: state.config.liveness_interval.as_secs(),
        grace_period_secs: state.config.grace_period.as_secs(),
        max_payload_size: state.config.max_payload_size,
    })
}

/// Current presence snapshot, in registration order.
async fn list_peers(State(state): State<AppState>) -> Json<Vec<PeerRecord>> {
    let (_, peers) = state.relay.snapshot().await;
    Json(peers)
}

async fn get_peer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PeerRecord>, ServerError> {
    let id = parse_peer_id(&id)?;
    state
        .relay
        .find(&id)
        .await
        .map(Json)
        .ok_or(ServerError::PeerNotFound(id))
}

/// Mailbox contents for any identity; empty when nothing is held.
async fn get_mailbox(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<FilePayload>>, ServerError> {
    let id = parse_peer_id(&id)?;
    Ok(Json(state.relay.fetch(&id).await))
}

fn parse_peer_id(raw: &str) -> Result<PeerId, ServerError> {
    raw.trim()
        .parse()
        .map_err(|e| ServerError::BadRequest(format!("Invalid peer id: {e}")))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Starting HTTP/WebSocket server");
    serve_on(state, listener).await
}

pub async fn serve_on(state: AppState, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
