//! Local operator API — registry inspection and destination control as JSON.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use meshlink_core::wire::DEFAULT_BINDING;
use meshlink_core::Listener;
use meshlink_services::{LinkRegistry, LinksInspectResult};

const INSPECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct StatusState {
    pub registry: LinkRegistry,
}

// ── /links ────────────────────────────────────────────────────────────────────

async fn handle_links(State(state): State<StatusState>) -> Json<LinksInspectResult> {
    Json(state.registry.inspect(INSPECT_TIMEOUT).await)
}

// ── /destinations ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct DestinationRequest {
    pub id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_healthy")]
    pub healthy: bool,
    #[serde(default)]
    pub listeners: Vec<Listener>,
}

fn default_healthy() -> bool {
    true
}

#[derive(Serialize)]
pub struct DestinationResponse {
    pub id: String,
    pub accepted: bool,
}

async fn handle_update_destination(
    State(state): State<StatusState>,
    Json(mut req): Json<DestinationRequest>,
) -> Result<Json<DestinationResponse>, (StatusCode, String)> {
    if req.id.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "id is required".to_string()));
    }
    if let Some(l) = req.listeners.iter().find(|l| l.address.is_empty()) {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("listener with protocol '{}' has no address", l.protocol),
        ));
    }

    for l in req.listeners.iter_mut().filter(|l| l.groups.is_empty()) {
        l.groups.push(DEFAULT_BINDING.to_string());
    }

    tracing::info!(
        dest = %req.id,
        healthy = req.healthy,
        listeners = req.listeners.len(),
        "destination updated via API"
    );
    state
        .registry
        .update_link_destination(&req.id, &req.version, req.healthy, req.listeners);

    Ok(Json(DestinationResponse {
        id: req.id,
        accepted: true,
    }))
}

async fn handle_remove_destination(
    State(state): State<StatusState>,
    Path(id): Path<String>,
) -> Json<DestinationResponse> {
    tracing::info!(dest = %id, "destination removed via API");
    state.registry.remove_link_destination(&id);
    Json(DestinationResponse { id, accepted: true })
}

// ── /links/{id}/forget ────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ForgetResponse {
    pub link_id: String,
    pub forgotten: bool,
}

async fn handle_forget_link(
    State(state): State<StatusState>,
    Path(link_id): Path<String>,
) -> Result<Json<ForgetResponse>, (StatusCode, String)> {
    let forgotten = state.registry.debug_forget_link(&link_id);
    if !forgotten {
        return Err((StatusCode::NOT_FOUND, "link not found".to_string()));
    }
    Ok(Json(ForgetResponse { link_id, forgotten }))
}

// ── Router ────────────────────────────────────────────────────────────────────

pub fn router(state: StatusState) -> Router {
    let api_routes = Router::new()
        .route("/links", get(handle_links))
        .route("/links/{id}/forget", post(handle_forget_link))
        .route("/destinations", post(handle_update_destination))
        .route("/destinations/{id}", delete(handle_remove_destination))
        .with_state(state);

    Router::new().nest("/api", api_routes)
}

pub async fn serve(state: StatusState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "API listening on 127.0.0.1");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
