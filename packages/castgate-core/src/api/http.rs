//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the session machine.

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::response::{api_ok, api_success};
use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::error::CastResult;
use crate::protocol_constants::SERVICE_ID;
use crate::session::{Ack, SessionEvent};

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct EnabledRequest {
    enabled: bool,
}

#[derive(Deserialize)]
struct DecisionRequest {
    decision: String,
}

#[derive(Deserialize)]
struct StopConnectionRequest {
    mac: String,
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerStateRequest {
    mac: String,
    state: String,
    #[serde(default)]
    reason_code: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/session", get(get_session))
        .route("/api/enabled", get(get_enabled).post(set_enabled))
        .route("/api/connection/accept", post(accept_connection))
        .route("/api/connection/stop", post(stop_connection))
        .route("/api/player/state", post(update_player_state))
        .route("/api/p2p-backend-discovery", post(set_p2p_backend_discovery))
        .route("/api/events", post(post_event))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "connections": state.ws_manager.connection_count(),
        "clients": state.ws_manager.clients(),
    }))
}

async fn get_session(State(state): State<AppState>) -> impl IntoResponse {
    api_success(state.machine.snapshot())
}

async fn get_enabled(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({ "enabled": state.machine.is_enabled() }))
}

async fn set_enabled(
    State(state): State<AppState>,
    Json(payload): Json<EnabledRequest>,
) -> CastResult<Json<Ack>> {
    Ok(Json(state.machine.set_enabled(payload.enabled)?))
}

async fn accept_connection(
    State(state): State<AppState>,
    Json(payload): Json<DecisionRequest>,
) -> CastResult<Json<Ack>> {
    Ok(Json(state.machine.accept_client_connection(&payload.decision)?))
}

async fn stop_connection(
    State(state): State<AppState>,
    Json(payload): Json<StopConnectionRequest>,
) -> CastResult<Json<Ack>> {
    Ok(Json(
        state
            .machine
            .stop_client_connection(&payload.mac, &payload.name)?,
    ))
}

async fn update_player_state(
    State(state): State<AppState>,
    Json(payload): Json<PlayerStateRequest>,
) -> CastResult<Json<Ack>> {
    Ok(Json(state.machine.update_player_state(
        &payload.mac,
        &payload.state,
        payload.reason_code,
    )?))
}

async fn set_p2p_backend_discovery(
    State(state): State<AppState>,
    Json(payload): Json<EnabledRequest>,
) -> Json<Ack> {
    Json(state.machine.set_p2p_backend_discovery(payload.enabled))
}

/// Accepts a collaborator callback over HTTP instead of the WebSocket.
async fn post_event(
    State(state): State<AppState>,
    Json(event): Json<SessionEvent>,
) -> impl IntoResponse {
    log::debug!("[API] Event: {:?}", event);
    state.machine.dispatch(event);
    api_ok()
}
