//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes over DetectionRepository
//! - Request validation
//! - Response formatting
//!
//! The query surface is independent of the bridge loop; handlers share the
//! same bounded read-only pool.

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_connected = state.repository.ping().await;

    let response = HealthResponse {
        status: if db_connected { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        schema_variant: state.repository.variant().to_string(),
        db_connected,
        mqtt_enabled: state.config.mqtt.is_some(),
    };

    Json(response)
}
