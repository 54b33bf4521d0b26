//! HTTP routes of the tracker service

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tracking::{DriverId, DriverPosition, IssuedLink, LocationReport};

use crate::{error::ApiResult, live::live_updates, state::AppState};

/// Create the router for the tracker service
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/generate-link", get(generate_link))
        .route("/api/driver-location/:driver_id", get(driver_location))
        .route("/api/all-drivers", get(all_drivers))
        .route("/ws", get(live_updates))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = if state.query.storage_reachable().await {
        "connected"
    } else {
        "error"
    };

    Json(json!({
        "status": "ok",
        "service": "driver-tracking",
        "database": database
    }))
}

/// Mint a new driver session and return its tracking link
pub async fn generate_link(State(state): State<AppState>) -> ApiResult<Json<IssuedLink>> {
    Ok(Json(state.sessions.issue_link().await?))
}

/// Latest report of one driver, `null` if it never reported
pub async fn driver_location(
    State(state): State<AppState>,
    Path(driver_id): Path<String>,
) -> ApiResult<Json<Option<LocationReport>>> {
    let latest = state.query.latest_for(&DriverId::from(driver_id)).await?;
    Ok(Json(latest))
}

/// Every active driver with its latest position
pub async fn all_drivers(State(state): State<AppState>) -> ApiResult<Json<Vec<DriverPosition>>> {
    Ok(Json(state.query.all_active().await?))
}
